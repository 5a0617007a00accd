use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::models::progress::{SyncResult, SyncStatus};
use crate::sync::SyncOrchestrator;

/// Runs synchronization passes on a polling interval.
///
/// Each tick drains whatever accumulated in the queue while offline.
/// Failed passes are logged and retried on the next tick.
pub struct SyncScheduler {
    /// Orchestrator shared with the host application
    orchestrator: Arc<SyncOrchestrator>,

    /// Delay between two passes
    poll_interval: Duration,

    /// Whether the scheduler is running (wrapped in Arc for sharing)
    running: Arc<RwLock<bool>>,
}

impl SyncScheduler {
    /// Creates a new scheduler.
    ///
    /// # Arguments
    ///
    /// * `orchestrator` - The orchestrator that runs each pass
    /// * `poll_interval_seconds` - Seconds between passes (default: 30)
    pub fn new(orchestrator: Arc<SyncOrchestrator>, poll_interval_seconds: Option<u64>) -> Self {
        Self {
            orchestrator,
            poll_interval: Duration::from_secs(poll_interval_seconds.unwrap_or(30)),
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Starts the scheduler loop and returns once [`stop`](Self::stop) is
    /// called.
    pub async fn start(&self) {
        *self.running.write().await = true;
        info!(
            "SyncScheduler started with poll interval: {:?}",
            self.poll_interval
        );

        while *self.running.read().await {
            match self.tick().await {
                Ok(result) if result.total > 0 => info!(
                    "Pass {}: {}/{} synced, {} failed, {} skipped",
                    result.status, result.completed, result.total, result.failed, result.skipped
                ),
                Ok(_) => {}
                Err(e) => error!("Error in scheduler loop: {}", e),
            }

            sleep(self.poll_interval).await;
        }

        info!("SyncScheduler stopped");
    }

    /// Stops the loop after the current iteration.
    pub async fn stop(&self) {
        info!("Stopping SyncScheduler...");
        *self.running.write().await = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Runs a single pass.
    pub async fn tick(&self) -> Result<SyncResult> {
        let result = self.orchestrator.synchronize().await?;
        if result.status == SyncStatus::Failed {
            warn!(
                "Pass aborted: {}",
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(result)
    }
}
