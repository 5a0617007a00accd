use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{trace, warn};

use crate::error::{Result, SyncError};
use crate::models::conflict::{Conflict, ConflictResolution};
use crate::models::progress::{SyncProgress, SyncResult};
use crate::sync::types::SyncOperation;

const DEFAULT_CAPACITY: usize = 256;

/// Notification published by the orchestrator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SyncEvent {
    Progress(SyncProgress),
    PassCompleted(SyncResult),
    PassFailed { error: String, result: SyncResult },
    OperationSynced { operation: SyncOperation },
    OperationFailed { operation: SyncOperation, error: String },
    ConflictDetected(Conflict),
    ConflictResolved { conflict: Conflict, resolution: ConflictResolution },
}

impl SyncEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::Progress(_) => "progress",
            SyncEvent::PassCompleted(_) => "pass_completed",
            SyncEvent::PassFailed { .. } => "pass_failed",
            SyncEvent::OperationSynced { .. } => "operation_synced",
            SyncEvent::OperationFailed { .. } => "operation_failed",
            SyncEvent::ConflictDetected(_) => "conflict_detected",
            SyncEvent::ConflictResolved { .. } => "conflict_resolved",
        }
    }
}

/// A [`SyncEvent`] with the moment it was published.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent {
    pub timestamp: DateTime<Utc>,
    pub event: SyncEvent,
}

/// Typed publish/subscribe channel for sync notifications.
///
/// Publishing never blocks; subscribers that fall behind lose the oldest
/// events.
#[derive(Debug, Clone)]
pub struct EventChannel {
    sender: broadcast::Sender<TimestampedEvent>,
}

impl EventChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes to every current subscriber; returns how many received it.
    pub fn emit(&self, event: SyncEvent) -> usize {
        trace!("Emitting {} event", event.name());
        self.sender
            .send(TimestampedEvent {
                timestamp: Utc::now(),
                event,
            })
            .unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Handle returned by [`EventChannel::subscribe`]. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<TimestampedEvent>,
}

impl Subscription {
    /// Waits for the next event, skipping over any the subscriber missed.
    pub async fn recv(&mut self) -> Result<TimestampedEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Ok(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event subscriber lagged, {} event(s) dropped", skipped);
                }
                Err(RecvError::Closed) => return Err(SyncError::ChannelClosed),
            }
        }
    }

    /// Returns an already-published event without waiting.
    pub fn try_recv(&mut self) -> Option<TimestampedEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Event subscriber lagged, {} event(s) dropped", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drains everything published so far.
    pub fn drain(&mut self) -> Vec<TimestampedEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn unsubscribe(self) {}
}
