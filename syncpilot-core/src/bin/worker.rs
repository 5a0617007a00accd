use dotenv::dotenv;
use std::sync::Arc;
use syncpilot_core::config::WorkerConfig;
use syncpilot_core::queue::{OperationQueue, SqliteQueueStore};
use syncpilot_core::remote::HttpRemote;
use syncpilot_core::sync::{ConflictResolver, SyncEvent, SyncOrchestrator};
use syncpilot_core::worker::SyncScheduler;
use tokio::signal;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Worker binary entry point for the background sync agent.
///
/// This binary:
/// - Opens the durable operation queue
/// - Replays queued operations against the remote on an interval
/// - Logs conflicts and pass outcomes
///
/// Queued operations survive restarts because the queue lives in SQLite.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive(LevelFilter::INFO.into());

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    info!("Starting SyncPilot worker...");

    let config = WorkerConfig::from_env()?;

    let store = SqliteQueueStore::connect(&config.database_url).await?;
    let queue = OperationQueue::new(Arc::new(store));
    info!("Operation queue opened with {} pending operation(s)", queue.len().await?);

    let remote = HttpRemote::new(config.remote_url.clone(), config.request_timeout)?;
    let orchestrator = Arc::new(
        SyncOrchestrator::builder(queue, Arc::new(remote))
            .config(config.sync.clone())
            .resolver(ConflictResolver::new(config.resolver.clone()))
            .build(),
    );

    let mut events = orchestrator.subscribe();
    let event_logger = tokio::spawn(async move {
        while let Ok(envelope) = events.recv().await {
            match envelope.event {
                SyncEvent::ConflictDetected(conflict) => info!(
                    "Conflict {} ({}) on {}:{}",
                    conflict.id,
                    conflict.conflict_type,
                    conflict.entity_type(),
                    conflict.entity_id().unwrap_or("-")
                ),
                SyncEvent::ConflictResolved { conflict, resolution } if !resolution.success => warn!(
                    "Conflict {} left unresolved: {}",
                    conflict.id,
                    resolution.error.unwrap_or_default()
                ),
                SyncEvent::OperationFailed { operation, error } => warn!(
                    "Operation {} ({}) failed: {}",
                    operation.id(),
                    operation.operation.method,
                    error
                ),
                SyncEvent::PassFailed { error, .. } => warn!("Pass failed: {}", error),
                _ => {}
            }
        }
    });

    let scheduler = Arc::new(SyncScheduler::new(
        orchestrator.clone(),
        Some(config.interval_seconds),
    ));

    let scheduler_handle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.start().await })
    };

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            scheduler.stop().await;
            orchestrator.cancel();
        }
        _ = scheduler_handle => {
            info!("Scheduler task completed");
        }
    }

    event_logger.abort();
    info!("SyncPilot worker stopped");
    Ok(())
}
