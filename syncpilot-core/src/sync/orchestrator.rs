use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::models::conflict::{Conflict, ConflictResolution};
use crate::models::operation::QueuedOperation;
use crate::models::progress::{SyncProgress, SyncResult, SyncStatus};
use crate::queue::OperationQueue;
use crate::remote::RemoteCall;
use crate::sync::conflict::{ConflictLog, ConflictResolver};
use crate::sync::dependency::{dependency_state, index_operations, DependencyResolver, DependencyState};
use crate::sync::events::{EventChannel, Subscription, SyncEvent};
use crate::sync::executor::{AttemptOutcome, OperationExecutor};
use crate::sync::state_machine::{PassEvent, PassStateMachine, Transition};
use crate::sync::types::SyncOperation;

pub const FAILED_DEPENDENCY: &str = "failed dependency";
pub const CIRCULAR_DEPENDENCY: &str = "circular dependency";

type PassOutcome = Result<SyncResult>;
type InFlight = Mutex<Option<watch::Receiver<Option<PassOutcome>>>>;

enum Role {
    Leader(watch::Sender<Option<PassOutcome>>),
    Follower(watch::Receiver<Option<PassOutcome>>),
}

/// Clears the in-flight slot when the leading pass ends, even if its future
/// is dropped early.
struct InFlightGuard<'a> {
    slot: &'a InFlight,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Drives synchronization passes over the operation queue.
///
/// One pass runs at a time; concurrent callers of [`synchronize`] share the
/// in-flight pass's result instead of starting another one.
///
/// [`synchronize`]: SyncOrchestrator::synchronize
pub struct SyncOrchestrator {
    queue: OperationQueue,
    executor: OperationExecutor,
    dependencies: DependencyResolver,
    resolver: Arc<ConflictResolver>,
    conflicts: ConflictLog,
    events: EventChannel,
    config: SyncConfig,
    progress: Arc<RwLock<SyncProgress>>,
    cancelled: Arc<AtomicBool>,
    in_flight: InFlight,
}

impl SyncOrchestrator {
    pub fn builder(queue: OperationQueue, remote: Arc<dyn RemoteCall>) -> SyncOrchestratorBuilder {
        SyncOrchestratorBuilder {
            queue,
            remote,
            config: SyncConfig::default(),
            resolver: ConflictResolver::default(),
            dependencies: DependencyResolver::new(),
            events: EventChannel::default(),
            conflicts: ConflictLog::new(),
        }
    }

    /// Runs a pass over everything currently queued.
    pub async fn synchronize(&self) -> Result<SyncResult> {
        self.run(None).await
    }

    /// Runs a pass over an explicit list of operations.
    ///
    /// Operations that are not in the queue are executed but never written
    /// back to it.
    pub async fn synchronize_operations(&self, operations: Vec<QueuedOperation>) -> Result<SyncResult> {
        self.run(Some(operations)).await
    }

    /// Requests cooperative cancellation of the in-flight pass.
    ///
    /// Observed before the next dependency check; the remote call already in
    /// progress is allowed to finish.
    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub async fn progress(&self) -> SyncProgress {
        self.progress.read().await.clone()
    }

    pub async fn status(&self) -> SyncStatus {
        self.progress.read().await.status
    }

    pub async fn is_syncing(&self) -> bool {
        self.status().await == SyncStatus::Syncing
    }

    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    pub fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    pub fn conflicts(&self) -> &ConflictLog {
        &self.conflicts
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    /// Resolves a logged conflict outside of a pass and reports it.
    pub async fn resolve_conflict(&self, id: Uuid) -> Result<ConflictResolution> {
        let resolution = self.conflicts.resolve(id, &self.resolver).await?;
        if let Some(conflict) = self.conflicts.get(id).await {
            self.events.emit(SyncEvent::ConflictResolved {
                conflict,
                resolution: resolution.clone(),
            });
        }
        Ok(resolution)
    }

    async fn run(&self, supplied: Option<Vec<QueuedOperation>>) -> Result<SyncResult> {
        let role = {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref().filter(|rx| rx.has_changed().is_ok()).cloned() {
                Some(rx) => Role::Follower(rx),
                None => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Some(rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Follower(mut rx) => {
                info!("Synchronization already in progress, waiting for its result");
                let outcome = rx
                    .wait_for(Option::is_some)
                    .await
                    .map_err(|_| SyncError::ChannelClosed)?
                    .clone();
                outcome.unwrap_or(Err(SyncError::ChannelClosed))
            }
            Role::Leader(tx) => {
                let _guard = InFlightGuard {
                    slot: &self.in_flight,
                };
                let outcome = self.run_pass(supplied).await;
                tx.send_replace(Some(outcome.clone()));
                outcome
            }
        }
    }

    async fn run_pass(&self, supplied: Option<Vec<QueuedOperation>>) -> PassOutcome {
        self.cancelled.store(false, Ordering::SeqCst);
        let started_at = Utc::now();

        {
            let mut progress = self.progress.write().await;
            let status = PassStateMachine::transition(progress.status, PassEvent::Start);
            *progress = SyncProgress {
                status,
                started_at: Some(started_at),
                ..Default::default()
            };
        }
        info!("Starting synchronization pass");

        let snapshot = match supplied {
            Some(operations) => operations,
            None => match self.queue.list().await {
                Ok(operations) => operations,
                Err(e) => {
                    let result = self.finish(Vec::new(), Vec::new(), started_at, Some(e.clone())).await;
                    error!("Synchronization pass could not read the queue: {}", e);
                    self.events.emit(SyncEvent::PassFailed {
                        error: e.to_string(),
                        result,
                    });
                    return Err(e);
                }
            },
        };

        if snapshot.is_empty() {
            debug!("Queue is empty, nothing to synchronize");
            let result = self.finish(Vec::new(), Vec::new(), started_at, None).await;
            self.events.emit(SyncEvent::PassCompleted(result.clone()));
            return Ok(result);
        }

        let mut ops = self.dependencies.resolve(snapshot);
        self.update_progress(|p| p.total = ops.len()).await;

        for op in ops.iter_mut().filter(|op| op.operation.processing) {
            warn!(
                "Operation {} was left processing by an interrupted attempt",
                op.id()
            );
            op.operation.processing = false;
        }

        let mut conflicts = Vec::new();
        let abort = self.run_rounds(&mut ops, &mut conflicts).await;

        if abort.is_none() {
            for op in ops.iter_mut().filter(|op| !op.is_settled()) {
                warn!("Operation {} is part of a dependency cycle, skipping", op.id());
                op.mark_skipped(CIRCULAR_DEPENDENCY);
            }
        }

        let result = self.finish(ops, conflicts, started_at, abort.clone()).await;
        match abort {
            Some(e @ SyncError::Storage(_)) => {
                error!("Synchronization pass failed: {}", e);
                self.events.emit(SyncEvent::PassFailed {
                    error: e.to_string(),
                    result,
                });
                Err(e)
            }
            Some(e) => {
                warn!("Synchronization pass aborted: {}", e);
                self.events.emit(SyncEvent::PassFailed {
                    error: e.to_string(),
                    result: result.clone(),
                });
                Ok(result)
            }
            None => {
                info!(
                    "Synchronization pass {}: {} synced, {} failed, {} skipped in {}ms",
                    result.status, result.completed, result.failed, result.skipped, result.duration_ms
                );
                self.events.emit(SyncEvent::PassCompleted(result.clone()));
                Ok(result)
            }
        }
    }

    /// Executes ready operations until a round makes no progress.
    ///
    /// Returns the error that aborted the pass, if any.
    async fn run_rounds(&self, ops: &mut [SyncOperation], conflicts: &mut Vec<Conflict>) -> Option<SyncError> {
        let index = index_operations(ops);
        let mut round = 0usize;

        loop {
            round += 1;
            let mut progressed = false;

            for i in 0..ops.len() {
                if ops[i].is_settled() {
                    continue;
                }
                if self.cancelled.load(Ordering::SeqCst) {
                    return Some(SyncError::Aborted);
                }

                match dependency_state(&ops[i], ops, &index) {
                    DependencyState::Waiting => continue,
                    DependencyState::Blocked(blocker) => {
                        debug!("Skipping {}: dependency {} did not sync", ops[i].id(), blocker);
                        ops[i].mark_skipped(FAILED_DEPENDENCY);
                        progressed = true;
                        self.report(|p| p.skipped += 1).await;
                        continue;
                    }
                    DependencyState::Ready => {}
                }

                let id = ops[i].id();
                self.update_progress(|p| p.current_operation = Some(id)).await;

                let outcome = match self.executor.execute(&mut ops[i]).await {
                    Ok(outcome) => outcome,
                    Err(e) => return Some(e),
                };
                progressed = true;

                match outcome {
                    AttemptOutcome::Synced => self.report_synced(&ops[i]).await,
                    AttemptOutcome::Resolved { conflict } => {
                        conflicts.push(conflict);
                        self.report_synced(&ops[i]).await;
                    }
                    AttemptOutcome::Dropped { conflict } => {
                        conflicts.push(conflict);
                        self.report(|p| p.skipped += 1).await;
                    }
                    AttemptOutcome::Failed { error, conflict, .. } => {
                        conflicts.extend(conflict);
                        self.events.emit(SyncEvent::OperationFailed {
                            operation: ops[i].clone(),
                            error: error.clone(),
                        });
                        self.report(|p| p.failed += 1).await;
                        if !self.config.continue_on_error {
                            return Some(SyncError::Remote(error));
                        }
                    }
                }
            }

            if !progressed {
                debug!("Round {} made no progress, stopping", round);
                return None;
            }
        }
    }

    async fn report_synced(&self, op: &SyncOperation) {
        self.events.emit(SyncEvent::OperationSynced {
            operation: op.clone(),
        });
        self.report(|p| p.completed += 1).await;
    }

    /// Applies a counter change and publishes the new progress.
    async fn report<F>(&self, f: F)
    where
        F: FnOnce(&mut SyncProgress),
    {
        let snapshot = self.update_progress(f).await;
        self.events.emit(SyncEvent::Progress(snapshot));
    }

    async fn update_progress<F>(&self, f: F) -> SyncProgress
    where
        F: FnOnce(&mut SyncProgress),
    {
        let mut progress = self.progress.write().await;
        f(&mut progress);
        progress.clone()
    }

    async fn finish(
        &self,
        ops: Vec<SyncOperation>,
        conflicts: Vec<Conflict>,
        started_at: chrono::DateTime<Utc>,
        abort: Option<SyncError>,
    ) -> SyncResult {
        let finished_at = Utc::now();
        let completed = ops.iter().filter(|op| op.synced).count();
        let failed_operations: Vec<SyncOperation> = ops.iter().filter(|op| op.failed).cloned().collect();
        let skipped_operations: Vec<SyncOperation> = ops.iter().filter(|op| op.skipped).cloned().collect();

        let event = match abort {
            Some(_) => PassEvent::Abort,
            None => PassEvent::Finish {
                failed: failed_operations.len(),
            },
        };

        let status = {
            let mut progress = self.progress.write().await;
            progress.status = PassStateMachine::transition(progress.status, event);
            progress.completed = completed;
            progress.failed = failed_operations.len();
            progress.skipped = skipped_operations.len();
            progress.current_operation = None;
            progress.finished_at = Some(finished_at);
            progress.status
        };

        SyncResult {
            status,
            total: ops.len(),
            completed,
            failed: failed_operations.len(),
            skipped: skipped_operations.len(),
            failed_operations,
            skipped_operations,
            conflicts,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
            error: abort.map(|e| e.to_string()),
        }
    }
}

pub struct SyncOrchestratorBuilder {
    queue: OperationQueue,
    remote: Arc<dyn RemoteCall>,
    config: SyncConfig,
    resolver: ConflictResolver,
    dependencies: DependencyResolver,
    events: EventChannel,
    conflicts: ConflictLog,
}

impl SyncOrchestratorBuilder {
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn dependency_resolver(mut self, dependencies: DependencyResolver) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn events(mut self, events: EventChannel) -> Self {
        self.events = events;
        self
    }

    pub fn conflict_log(mut self, conflicts: ConflictLog) -> Self {
        self.conflicts = conflicts;
        self
    }

    pub fn build(self) -> SyncOrchestrator {
        let resolver = Arc::new(self.resolver);
        let executor = OperationExecutor::new(
            self.queue.clone(),
            self.remote,
            resolver.clone(),
            self.conflicts.clone(),
            self.events.clone(),
            self.config.clone(),
        );

        SyncOrchestrator {
            queue: self.queue,
            executor,
            dependencies: self.dependencies,
            resolver,
            conflicts: self.conflicts,
            events: self.events,
            config: self.config,
            progress: Arc::new(RwLock::new(SyncProgress::default())),
            cancelled: Arc::new(AtomicBool::new(false)),
            in_flight: Mutex::new(None),
        }
    }
}
