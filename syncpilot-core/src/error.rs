use thiserror::Error;
use uuid::Uuid;

/// Result type used throughout the sync core.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while queueing or reconciling operations.
///
/// Payloads are plain strings so a finished pass (including its error) can be
/// handed to every caller that collapsed onto it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The durable queue store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A queued operation or conflict does not exist.
    #[error("not found: {0}")]
    NotFound(Uuid),

    /// A remote call failed and the pass was configured to stop on errors.
    #[error("remote call failed: {0}")]
    Remote(String),

    /// A conflict strategy could not produce a resolution.
    #[error("conflict resolution failed: {0}")]
    Resolution(String),

    /// The pass was cancelled.
    #[error("aborted")]
    Aborted,

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An external collaborator did not answer in time.
    #[error("operation timed out")]
    Timeout,

    /// The in-flight pass went away before publishing a result.
    #[error("channel closed")]
    ChannelClosed,
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        SyncError::Storage(e.to_string())
    }
}
