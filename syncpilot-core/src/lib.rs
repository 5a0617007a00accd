//! Offline-first synchronization core.
//!
//! Mutations made while offline are recorded in an [`OperationQueue`] and
//! replayed against the server by a [`SyncOrchestrator`], which orders them by
//! their dependencies, detects conflicts with server state and resolves them
//! with a configurable strategy.

pub mod config;
pub mod error;
pub mod models;
pub mod queue;
pub mod remote;
pub mod sync;
pub mod worker;

pub use config::{ResolverConfig, SyncConfig, WorkerConfig};
pub use error::{Result, SyncError};
pub use models::*;
pub use queue::{MemoryQueueStore, OperationQueue, QueueStore, SqliteQueueStore};
pub use remote::{HttpRemote, RemoteCall, RemoteOutcome};
pub use sync::{
    ConflictResolver, ConflictStrategy, EventChannel, SyncEvent, SyncOrchestrator,
};
pub use worker::SyncScheduler;
