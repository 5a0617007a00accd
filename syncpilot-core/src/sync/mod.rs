pub mod conflict;
pub mod dependency;
pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod state_machine;
pub mod types;


pub use conflict::{
    BaseVersionSource, ConflictDetector, ConflictLog, ConflictResolver, CustomResolver, ManualPrompt,
};
pub use dependency::{DependencyResolver, DependencyRule, DependencyState};
pub use events::{EventChannel, Subscription, SyncEvent, TimestampedEvent};
pub use executor::{AttemptOutcome, OperationExecutor};
pub use orchestrator::{SyncOrchestrator, SyncOrchestratorBuilder, CIRCULAR_DEPENDENCY, FAILED_DEPENDENCY};
pub use state_machine::{PassEvent, PassStateMachine, Transition};
pub use types::*;
