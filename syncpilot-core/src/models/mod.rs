pub mod conflict;
pub mod operation;
pub mod progress;

pub use conflict::{Conflict, ConflictResolution, ConflictType};
pub use operation::{OperationError, OperationKind, QueuedOperation};
pub use progress::{SyncProgress, SyncResult, SyncStatus};
