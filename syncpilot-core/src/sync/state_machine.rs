use std::fmt;
use tracing::warn;

use crate::models::progress::SyncStatus;

/// Something that happens to a synchronization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassEvent {
    /// A pass begins
    Start,

    /// Every round ran; `failed` operations ended permanently failed
    Finish { failed: usize },

    /// The pass was cancelled or stopped on an error
    Abort,
}

impl fmt::Display for PassEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassEvent::Start => write!(f, "start"),
            PassEvent::Finish { failed } => write!(f, "finish({} failed)", failed),
            PassEvent::Abort => write!(f, "abort"),
        }
    }
}

/// Transition rules for the orchestrator status.
///
/// IDLE or any terminal state moves to SYNCING on start; SYNCING moves to
/// COMPLETED, PARTIALLY_COMPLETED or FAILED. Anything else is ignored.
pub trait Transition {
    fn transition(current: SyncStatus, event: PassEvent) -> SyncStatus;

    fn initial_state() -> SyncStatus {
        SyncStatus::Idle
    }
}

pub struct PassStateMachine;

impl Transition for PassStateMachine {
    fn transition(current: SyncStatus, event: PassEvent) -> SyncStatus {
        match (current, event) {
            (_, PassEvent::Start) => SyncStatus::Syncing,
            (SyncStatus::Syncing, PassEvent::Finish { failed: 0 }) => SyncStatus::Completed,
            (SyncStatus::Syncing, PassEvent::Finish { .. }) => SyncStatus::PartiallyCompleted,
            (SyncStatus::Syncing, PassEvent::Abort) => SyncStatus::Failed,
            (state, event) => {
                warn!("Ignoring pass event {} in state {}", event, state);
                state
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        assert_eq!(PassStateMachine::initial_state(), SyncStatus::Idle);
    }

    #[test]
    fn test_start_from_idle_and_terminal_states() {
        for state in [
            SyncStatus::Idle,
            SyncStatus::Completed,
            SyncStatus::PartiallyCompleted,
            SyncStatus::Failed,
        ] {
            assert_eq!(
                PassStateMachine::transition(state, PassEvent::Start),
                SyncStatus::Syncing
            );
        }
    }

    #[test]
    fn test_finish() {
        assert_eq!(
            PassStateMachine::transition(SyncStatus::Syncing, PassEvent::Finish { failed: 0 }),
            SyncStatus::Completed
        );
        assert_eq!(
            PassStateMachine::transition(SyncStatus::Syncing, PassEvent::Finish { failed: 2 }),
            SyncStatus::PartiallyCompleted
        );
    }

    #[test]
    fn test_abort() {
        assert_eq!(
            PassStateMachine::transition(SyncStatus::Syncing, PassEvent::Abort),
            SyncStatus::Failed
        );
    }

    #[test]
    fn test_events_outside_a_pass_are_ignored() {
        assert_eq!(
            PassStateMachine::transition(SyncStatus::Idle, PassEvent::Abort),
            SyncStatus::Idle
        );
        assert_eq!(
            PassStateMachine::transition(SyncStatus::Completed, PassEvent::Finish { failed: 1 }),
            SyncStatus::Completed
        );
    }
}
