use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::conflict::Conflict;
use crate::sync::types::SyncOperation;

/// Status of the synchronization orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Completed,
    Failed,
    PartiallyCompleted,
}

impl SyncStatus {
    /// Whether a pass in this status has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Completed | SyncStatus::Failed | SyncStatus::PartiallyCompleted
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Idle => write!(f, "idle"),
            SyncStatus::Syncing => write!(f, "syncing"),
            SyncStatus::Completed => write!(f, "completed"),
            SyncStatus::Failed => write!(f, "failed"),
            SyncStatus::PartiallyCompleted => write!(f, "partially_completed"),
        }
    }
}

/// Snapshot of the pass currently (or most recently) running.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub current_operation: Option<Uuid>,
    pub status: SyncStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncProgress {
    pub fn remaining(&self) -> usize {
        self.total
            .saturating_sub(self.completed + self.failed + self.skipped)
    }
}

/// Terminal summary of one synchronization pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub status: SyncStatus,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failed_operations: Vec<SyncOperation>,
    pub skipped_operations: Vec<SyncOperation>,
    pub conflicts: Vec<Conflict>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,

    /// Error that aborted the pass, if any
    pub error: Option<String>,
}

impl SyncResult {
    /// Result of a pass that found nothing to do.
    pub fn empty() -> Self {
        let now = Utc::now();
        Self {
            status: SyncStatus::Completed,
            total: 0,
            completed: 0,
            failed: 0,
            skipped: 0,
            failed_operations: Vec::new(),
            skipped_operations: Vec::new(),
            conflicts: Vec::new(),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            error: None,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.status == SyncStatus::Completed && self.failed == 0
    }

    /// Reasons operations were skipped, keyed by operation id.
    pub fn skip_reasons(&self) -> Vec<(Uuid, String)> {
        self.skipped_operations
            .iter()
            .map(|op| (op.id(), op.skip_reason.clone().unwrap_or_default()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_result_is_completed() {
        let result = SyncResult::empty();
        assert_eq!(result.status, SyncStatus::Completed);
        assert_eq!(result.total, 0);
        assert!(result.all_succeeded());
    }

    #[test]
    fn test_remaining() {
        let progress = SyncProgress {
            total: 5,
            completed: 2,
            failed: 1,
            skipped: 1,
            ..Default::default()
        };
        assert_eq!(progress.remaining(), 1);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!SyncStatus::Idle.is_terminal());
        assert!(!SyncStatus::Syncing.is_terminal());
        assert!(SyncStatus::Completed.is_terminal());
        assert!(SyncStatus::PartiallyCompleted.is_terminal());
        assert!(SyncStatus::Failed.is_terminal());
    }
}
