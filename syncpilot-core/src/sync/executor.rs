use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::models::conflict::Conflict;
use crate::models::operation::QueuedOperation;
use crate::queue::OperationQueue;
use crate::remote::RemoteCall;
use crate::sync::conflict::{ConflictDetector, ConflictLog, ConflictResolver};
use crate::sync::events::{EventChannel, SyncEvent};
use crate::sync::types::{ConflictStrategy, SyncOperation};

pub const SKIPPED_BY_RESOLUTION: &str = "skipped by conflict resolution";

/// What a single attempt did to an operation.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    /// The remote call succeeded
    Synced,

    /// The call conflicted and the resolution was applied as the result
    Resolved { conflict: Conflict },

    /// The call conflicted and resolution chose to drop the operation
    Dropped { conflict: Conflict },

    /// The operation failed permanently for this pass
    Failed {
        error: String,
        exhausted: bool,
        conflict: Option<Conflict>,
    },
}

/// Runs one operation against the remote and settles its queue entry.
///
/// The queue entry is marked processing before the call and removed only
/// after a terminal outcome, so a crash mid-attempt leaves it re-attemptable.
pub struct OperationExecutor {
    queue: OperationQueue,
    remote: Arc<dyn RemoteCall>,
    detector: ConflictDetector,
    resolver: Arc<ConflictResolver>,
    conflicts: ConflictLog,
    events: EventChannel,
    config: SyncConfig,
}

impl OperationExecutor {
    pub fn new(
        queue: OperationQueue,
        remote: Arc<dyn RemoteCall>,
        resolver: Arc<ConflictResolver>,
        conflicts: ConflictLog,
        events: EventChannel,
        config: SyncConfig,
    ) -> Self {
        Self {
            queue,
            remote,
            detector: ConflictDetector::new(),
            resolver,
            conflicts,
            events,
            config,
        }
    }

    /// Attempts `op` once.
    ///
    /// # Errors
    ///
    /// Returns an error only when the queue store fails; remote failures are
    /// reported through [`AttemptOutcome::Failed`].
    pub async fn execute(&self, op: &mut SyncOperation) -> Result<AttemptOutcome> {
        let id = op.id();
        op.operation.processing = true;
        self.persist(&op.operation).await?;

        debug!(
            "Attempting {} {} on {}:{} ({})",
            op.operation.kind,
            op.operation.method,
            op.operation.entity_type,
            op.operation.entity_id.as_deref().unwrap_or("-"),
            id
        );

        let outcome = self
            .remote
            .invoke(&op.operation.method, &op.operation.params)
            .await;

        if outcome.success {
            op.operation.processing = false;
            self.queue.remove(id).await?;
            op.mark_synced(outcome.data);
            info!("Synced operation {} ({})", id, op.operation.method);
            return Ok(AttemptOutcome::Synced);
        }

        let error = outcome.error_message();
        op.operation.record_failure(error.clone(), outcome.code.clone());
        self.persist(&op.operation).await?;
        warn!(
            "Operation {} failed (attempt {}): {}",
            id, op.operation.retry_count, error
        );

        let Some(mut conflict) = self.detector.detect(op, &outcome) else {
            return self.fail(op, error, None).await;
        };

        self.conflicts.record(conflict.clone()).await;
        self.events.emit(SyncEvent::ConflictDetected(conflict.clone()));

        let resolution = self.resolver.resolve(&mut conflict).await;
        self.conflicts.store(&conflict).await;
        self.events.emit(SyncEvent::ConflictResolved {
            conflict: conflict.clone(),
            resolution: resolution.clone(),
        });

        if !resolution.success {
            let error = resolution
                .error
                .clone()
                .unwrap_or_else(|| "conflict resolution failed".to_string());
            return self.fail(op, error, Some(conflict)).await;
        }

        if resolution.strategy == ConflictStrategy::Skip {
            self.queue.remove(id).await?;
            op.mark_skipped(SKIPPED_BY_RESOLUTION);
            info!("Dropped operation {} after conflict {}", id, conflict.id);
            return Ok(AttemptOutcome::Dropped { conflict });
        }

        let mut result = resolution.data.clone();
        if self.config.resubmit_resolved {
            if let Some(Value::Object(params)) = &resolution.data {
                let resubmitted = self.remote.invoke(&op.operation.method, params).await;
                if !resubmitted.success {
                    let error = format!("resubmission failed: {}", resubmitted.error_message());
                    return self.fail(op, error, Some(conflict)).await;
                }
                if resubmitted.data.is_some() {
                    result = resubmitted.data;
                }
            }
        }

        self.queue.remove(id).await?;
        op.mark_synced(result);
        info!("Synced operation {} through conflict {}", id, conflict.id);
        Ok(AttemptOutcome::Resolved { conflict })
    }

    async fn fail(
        &self,
        op: &mut SyncOperation,
        error: String,
        conflict: Option<Conflict>,
    ) -> Result<AttemptOutcome> {
        op.mark_failed();
        let exhausted = op.operation.retry_count >= self.config.max_retries;

        if exhausted && self.config.discard_exhausted {
            self.queue.remove(op.id()).await?;
            warn!(
                "Discarded operation {} after {} attempt(s)",
                op.id(),
                op.operation.retry_count
            );
        } else if exhausted {
            warn!(
                "Operation {} exhausted {} attempt(s), keeping it queued",
                op.id(),
                op.operation.retry_count
            );
        }

        Ok(AttemptOutcome::Failed {
            error,
            exhausted,
            conflict,
        })
    }

    /// Writes the operation back; operations supplied outside the queue are
    /// not persisted.
    async fn persist(&self, operation: &QueuedOperation) -> Result<()> {
        match self.queue.update(operation).await {
            Err(SyncError::NotFound(id)) => {
                debug!("Operation {} is not queued, skipping write-back", id);
                Ok(())
            }
            other => other,
        }
    }
}
