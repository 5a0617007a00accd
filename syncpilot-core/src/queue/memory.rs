use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::models::operation::QueuedOperation;
use crate::queue::QueueStore;

/// Non-durable store keeping operations in a vector.
///
/// Useful for tests and for hosts that persist the queue some other way.
#[derive(Default)]
pub struct MemoryQueueStore {
    operations: RwLock<Vec<QueuedOperation>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn get_all(&self) -> Result<Vec<QueuedOperation>> {
        Ok(self.operations.read().await.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueuedOperation>> {
        Ok(self
            .operations
            .read()
            .await
            .iter()
            .find(|op| op.id == id)
            .cloned())
    }

    async fn add(&self, operation: &QueuedOperation) -> Result<()> {
        let mut operations = self.operations.write().await;
        if operations.iter().any(|op| op.id == operation.id) {
            return Err(SyncError::Storage(format!(
                "operation {} already queued",
                operation.id
            )));
        }
        operations.push(operation.clone());
        Ok(())
    }

    async fn update(&self, operation: &QueuedOperation) -> Result<()> {
        let mut operations = self.operations.write().await;
        match operations.iter_mut().find(|op| op.id == operation.id) {
            Some(slot) => {
                *slot = operation.clone();
                Ok(())
            }
            None => Err(SyncError::NotFound(operation.id)),
        }
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        let mut operations = self.operations.write().await;
        let before = operations.len();
        operations.retain(|op| op.id != id);
        Ok(operations.len() != before)
    }

    async fn clear(&self) -> Result<()> {
        self.operations.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::operation::OperationKind;
    use serde_json::Map;

    fn op() -> QueuedOperation {
        QueuedOperation::new(OperationKind::Create, "createTask", Map::new(), "task", None)
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = MemoryQueueStore::new();
        let missing = op();
        assert_eq!(
            store.update(&missing).await,
            Err(SyncError::NotFound(missing.id))
        );
    }

    #[tokio::test]
    async fn test_duplicate_add_is_rejected() {
        let store = MemoryQueueStore::new();
        let operation = op();
        store.add(&operation).await.unwrap();
        assert!(store.add(&operation).await.is_err());
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }
}
