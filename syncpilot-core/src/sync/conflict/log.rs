use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::models::conflict::{Conflict, ConflictResolution};
use crate::sync::conflict::resolver::ConflictResolver;

/// Session-scoped record of every detected conflict.
///
/// Independent of the queue: conflicts stay inspectable after their
/// operation has been removed.
#[derive(Clone, Default)]
pub struct ConflictLog {
    conflicts: Arc<RwLock<Vec<Conflict>>>,
}

impl ConflictLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, conflict: Conflict) {
        self.conflicts.write().await.push(conflict);
    }

    /// Replaces the stored copy of a conflict (e.g. after resolution).
    pub async fn store(&self, conflict: &Conflict) {
        let mut conflicts = self.conflicts.write().await;
        match conflicts.iter_mut().find(|c| c.id == conflict.id) {
            Some(slot) => *slot = conflict.clone(),
            None => conflicts.push(conflict.clone()),
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<Conflict> {
        self.conflicts.read().await.iter().find(|c| c.id == id).cloned()
    }

    pub async fn all(&self) -> Vec<Conflict> {
        self.conflicts.read().await.clone()
    }

    pub async fn unresolved(&self) -> Vec<Conflict> {
        self.conflicts
            .read()
            .await
            .iter()
            .filter(|c| !c.resolved)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.conflicts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Resolves a logged conflict and stores the outcome.
    pub async fn resolve(&self, id: Uuid, resolver: &ConflictResolver) -> Result<ConflictResolution> {
        let mut conflict = self.get(id).await.ok_or(SyncError::NotFound(id))?;
        let resolution = resolver.resolve(&mut conflict).await;
        self.store(&conflict).await;
        Ok(resolution)
    }

    /// Drops resolved conflicts, returning how many were removed.
    pub async fn clear_resolved(&self) -> usize {
        let mut conflicts = self.conflicts.write().await;
        let before = conflicts.len();
        conflicts.retain(|c| !c.resolved);
        before - conflicts.len()
    }

    pub async fn clear(&self) {
        self.conflicts.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::conflict::ConflictType;
    use crate::models::operation::{OperationKind, QueuedOperation};
    use crate::sync::types::{ConflictStrategy, SyncOperation};
    use serde_json::{json, Map};

    fn conflict() -> Conflict {
        let op = SyncOperation::new(QueuedOperation::new(
            OperationKind::Update,
            "updateTask",
            Map::new(),
            "task",
            Some("t1".to_string()),
        ));
        Conflict::new(ConflictType::UpdateUpdate, op, Some(json!({"title": "s"})), None)
    }

    #[tokio::test]
    async fn test_resolve_by_id_updates_record() {
        let log = ConflictLog::new();
        let c = conflict();
        let id = c.id;
        log.record(c).await;
        assert_eq!(log.unresolved().await.len(), 1);

        let resolver = ConflictResolver::builder().build();
        let resolution = log.resolve(id, &resolver).await.unwrap();

        assert!(resolution.success);
        assert_eq!(resolution.strategy, ConflictStrategy::ServerWins);
        assert!(log.unresolved().await.is_empty());
        assert_eq!(log.get(id).await.unwrap().resolution, Some(resolution));
    }

    #[tokio::test]
    async fn test_resolve_unknown_id() {
        let log = ConflictLog::new();
        let resolver = ConflictResolver::builder().build();
        let missing = Uuid::new_v4();
        assert_eq!(
            log.resolve(missing, &resolver).await,
            Err(SyncError::NotFound(missing))
        );
    }

    #[tokio::test]
    async fn test_clear_resolved_keeps_open_conflicts() {
        let log = ConflictLog::new();
        let mut done = conflict();
        done.resolved = true;
        log.record(done).await;
        log.record(conflict()).await;

        assert_eq!(log.clear_resolved().await, 1);
        assert_eq!(log.len().await, 1);
        assert!(!log.all().await[0].resolved);
    }
}
