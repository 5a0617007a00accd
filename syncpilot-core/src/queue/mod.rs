//! Durable queue of pending mutations.
//!
//! The queue itself is thin: it assigns ids and timestamps and forwards every
//! mutation to a [`QueueStore`], which owns persistence. Operations leave the
//! queue only through [`OperationQueue::remove`].

pub mod memory;
pub mod sqlite;

pub use memory::MemoryQueueStore;
pub use sqlite::SqliteQueueStore;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::models::operation::{OperationKind, QueuedOperation};

/// Persistence backend for queued operations.
///
/// Implementations must return operations from [`get_all`](QueueStore::get_all)
/// in insertion order and must tolerate concurrent enqueue and drain.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn get_all(&self) -> Result<Vec<QueuedOperation>>;

    async fn get(&self, id: Uuid) -> Result<Option<QueuedOperation>>;

    async fn add(&self, operation: &QueuedOperation) -> Result<()>;

    /// Replaces the stored record with the same id.
    async fn update(&self, operation: &QueuedOperation) -> Result<()>;

    /// Returns `true` if a record was removed.
    async fn remove(&self, id: Uuid) -> Result<bool>;

    async fn clear(&self) -> Result<()>;
}

/// Ordered collection of operations waiting to be synchronized.
#[derive(Clone)]
pub struct OperationQueue {
    store: Arc<dyn QueueStore>,
}

impl OperationQueue {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Queue backed by a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryQueueStore::new()))
    }

    /// Records a mutation that could not reach the server.
    ///
    /// # Arguments
    ///
    /// * `kind` - CREATE, UPDATE or DELETE
    /// * `method` - Remote method that applies the mutation
    /// * `params` - Method arguments; must be a JSON object
    /// * `entity_type` - Type of the targeted entity
    /// * `entity_id` - Identifier of the targeted entity, if known
    ///
    /// # Returns
    ///
    /// Returns the id of the new operation.
    pub async fn enqueue(
        &self,
        kind: OperationKind,
        method: &str,
        params: Value,
        entity_type: &str,
        entity_id: Option<&str>,
    ) -> Result<Uuid> {
        let params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(SyncError::Serialization(format!(
                    "operation params must be an object, got {}",
                    other
                )))
            }
        };

        let operation = QueuedOperation::new(
            kind,
            method,
            params,
            entity_type,
            entity_id.map(str::to_string),
        );
        self.store.add(&operation).await?;

        info!(
            "Enqueued {} {} for {}:{} ({})",
            operation.kind,
            operation.method,
            operation.entity_type,
            operation.entity_id.as_deref().unwrap_or("-"),
            operation.id
        );
        Ok(operation.id)
    }

    /// All pending operations in insertion order.
    pub async fn list(&self) -> Result<Vec<QueuedOperation>> {
        self.store.get_all().await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<QueuedOperation>> {
        self.store.get(id).await
    }

    /// Persists in-place changes (retry count, processing flag, last error).
    pub async fn update(&self, operation: &QueuedOperation) -> Result<()> {
        self.store.update(operation).await
    }

    pub async fn remove(&self, id: Uuid) -> Result<bool> {
        let removed = self.store.remove(id).await?;
        if removed {
            debug!("Removed operation {} from queue", id);
        }
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<()> {
        info!("Clearing operation queue");
        self.store.clear().await
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.store.get_all().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
