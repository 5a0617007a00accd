use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::error::{Result, SyncError};
use crate::models::conflict::ConflictType;
use crate::sync::types::{ArrayMergeStrategy, ConflictStrategy};

/// Behaviour of a synchronization pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Keep going after a permanently failed operation
    pub continue_on_error: bool,

    /// Attempts after which a failing operation counts as exhausted
    pub max_retries: u32,

    /// Remove exhausted operations from the queue instead of retaining them
    pub discard_exhausted: bool,

    /// Re-send resolved conflict data before marking the operation synced
    pub resubmit_resolved: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            continue_on_error: true,
            max_retries: 3,
            discard_exhausted: false,
            resubmit_resolved: false,
        }
    }
}

/// Strategy selection and merge tuning for the conflict resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub default_strategy: ConflictStrategy,
    pub entity_strategies: HashMap<String, ConflictStrategy>,
    pub conflict_type_strategies: HashMap<ConflictType, ConflictStrategy>,
    pub array_strategy: ArrayMergeStrategy,

    /// Upper bound on fetching a base version before falling back
    pub base_fetch_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            default_strategy: ConflictStrategy::ServerWins,
            entity_strategies: HashMap::new(),
            conflict_type_strategies: HashMap::new(),
            array_strategy: ArrayMergeStrategy::default(),
            base_fetch_timeout: Duration::from_secs(5),
        }
    }
}

/// Settings for the `worker` binary, read from the environment.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub remote_url: String,
    pub interval_seconds: u64,
    pub request_timeout: Duration,
    pub sync: SyncConfig,
    pub resolver: ResolverConfig,
}

impl WorkerConfig {
    /// Reads the worker settings from the process environment.
    ///
    /// `SYNC_REMOTE_URL` is required; everything else has a default.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let remote_url = lookup("SYNC_REMOTE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| SyncError::Config("SYNC_REMOTE_URL must be set".to_string()))?;

        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://syncpilot.db".to_string());

        let interval_seconds = parse_or(&lookup, "SYNC_INTERVAL_SECONDS", 30u64);
        let request_timeout = Duration::from_secs(parse_or(&lookup, "SYNC_REQUEST_TIMEOUT_SECONDS", 30u64));

        let mut sync = SyncConfig::default();
        sync.continue_on_error = parse_or(&lookup, "SYNC_CONTINUE_ON_ERROR", sync.continue_on_error);
        sync.max_retries = parse_or(&lookup, "SYNC_MAX_RETRIES", sync.max_retries);
        sync.discard_exhausted = parse_or(&lookup, "SYNC_DISCARD_EXHAUSTED", sync.discard_exhausted);

        let mut resolver = ResolverConfig::default();
        if let Some(raw) = lookup("SYNC_DEFAULT_STRATEGY") {
            resolver.default_strategy = ConflictStrategy::from_str(&raw)?;
        }

        Ok(Self {
            database_url,
            remote_url,
            interval_seconds,
            request_timeout,
            sync,
            resolver,
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}", key, raw);
            default
        }),
        None => default,
    }
}
