use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::models::operation::{OperationKind, QueuedOperation};
use crate::sync::types::{Dependency, DependencyKind, SyncOperation};

/// Caller-supplied rule producing extra (usually custom) dependencies.
///
/// Receives the operation being decorated and the whole batch.
pub type DependencyRule =
    Arc<dyn Fn(&SyncOperation, &[SyncOperation]) -> Vec<Dependency> + Send + Sync>;

/// Readiness of an operation given the state of its prerequisites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyState {
    /// Every prerequisite is synced (and validated).
    Ready,
    /// At least one prerequisite has not reached an outcome yet.
    Waiting,
    /// The given prerequisite failed or was skipped.
    Blocked(Uuid),
}

/// Computes the partial order between operations of one pass.
///
/// Built-in edges:
/// - an UPDATE/DELETE with an entity id depends on every earlier unsynced
///   CREATE of the same `(entity_type, entity_id)`;
/// - every operation on an entity depends on every earlier operation on it.
#[derive(Clone, Default)]
pub struct DependencyResolver {
    rules: Vec<DependencyRule>,
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a rule contributing additional dependencies.
    pub fn with_rule<F>(mut self, rule: F) -> Self
    where
        F: Fn(&SyncOperation, &[SyncOperation]) -> Vec<Dependency> + Send + Sync + 'static,
    {
        self.rules.push(Arc::new(rule));
        self
    }

    /// Decorates a batch of queued operations with fresh dependencies.
    ///
    /// Input order is preserved in the output.
    pub fn resolve(&self, operations: Vec<QueuedOperation>) -> Vec<SyncOperation> {
        let mut ops: Vec<SyncOperation> = operations.into_iter().map(SyncOperation::new).collect();

        let mut groups: HashMap<(String, String), Vec<usize>> = HashMap::new();
        for (index, op) in ops.iter().enumerate() {
            if let Some((entity_type, entity_id)) = op.operation.entity_key() {
                groups
                    .entry((entity_type.to_string(), entity_id.to_string()))
                    .or_default()
                    .push(index);
            }
        }

        for members in groups.values() {
            let mut ordered = members.clone();
            // Ties on timestamp fall back to batch position.
            ordered.sort_by_key(|&i| (ops[i].operation.timestamp, i));

            for (position, &index) in ordered.iter().enumerate() {
                let earlier = &ordered[..position];

                // Only a CREATE made before the edit can be its prerequisite.
                if matches!(
                    ops[index].operation.kind,
                    OperationKind::Update | OperationKind::Delete
                ) {
                    let creates: Vec<Uuid> = earlier
                        .iter()
                        .filter(|&&i| ops[i].operation.kind == OperationKind::Create && !ops[i].synced)
                        .map(|&i| ops[i].id())
                        .collect();
                    for create in creates {
                        ops[index].add_dependency(Dependency::entity(create));
                    }
                }

                let earlier_ids: Vec<Uuid> = earlier.iter().map(|&i| ops[i].id()).collect();
                for id in earlier_ids {
                    ops[index].add_dependency(Dependency::order(id));
                }
            }
        }

        if !self.rules.is_empty() {
            let extra: Vec<Vec<Dependency>> = ops
                .iter()
                .map(|op| self.rules.iter().flat_map(|rule| rule(op, &ops)).collect())
                .collect();
            for (op, deps) in ops.iter_mut().zip(extra) {
                for dep in deps {
                    op.add_dependency(dep);
                }
            }
        }

        let edges: usize = ops.iter().map(|op| op.dependencies.len()).sum();
        debug!("Resolved {} dependency edge(s) across {} operation(s)", edges, ops.len());
        ops
    }
}

/// Position of every operation in a pass, by id.
pub fn index_operations(ops: &[SyncOperation]) -> HashMap<Uuid, usize> {
    ops.iter().enumerate().map(|(i, op)| (op.id(), i)).collect()
}

/// Evaluates whether `op` may run now.
///
/// A dependency is satisfied when its target was processed in this pass and
/// synced; custom dependencies additionally need their validator to agree.
/// A failed or skipped target blocks the operation permanently.
pub fn dependency_state(
    op: &SyncOperation,
    ops: &[SyncOperation],
    index: &HashMap<Uuid, usize>,
) -> DependencyState {
    let mut ready = true;

    for dep in &op.dependencies {
        let Some(target) = index.get(&dep.depends_on).map(|&i| &ops[i]) else {
            ready = false;
            continue;
        };

        if target.failed || target.skipped {
            return DependencyState::Blocked(target.id());
        }
        if !target.synced {
            ready = false;
            continue;
        }
        if dep.kind == DependencyKind::Custom {
            if let Some(validator) = &dep.validator {
                if !validator.check(target, op) {
                    ready = false;
                }
            }
        }
    }

    if ready {
        DependencyState::Ready
    } else {
        DependencyState::Waiting
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::types::DependencyValidator;
    use chrono::Duration;
    use serde_json::Map;

    fn op(kind: OperationKind, entity_type: &str, entity_id: Option<&str>) -> QueuedOperation {
        QueuedOperation::new(kind, "call", Map::new(), entity_type, entity_id.map(str::to_string))
    }

    fn kinds_of(op: &SyncOperation) -> Vec<(Uuid, DependencyKind)> {
        op.dependencies.iter().map(|d| (d.depends_on, d.kind)).collect()
    }

    #[test]
    fn test_update_depends_on_create_of_same_entity() {
        let create = op(OperationKind::Create, "task", Some("t1"));
        let update = op(OperationKind::Update, "task", Some("t1"));
        let (create_id, update_id) = (create.id, update.id);

        let ops = DependencyResolver::new().resolve(vec![create, update]);

        assert!(ops[0].dependencies.is_empty());
        assert_eq!(kinds_of(&ops[1]), vec![(create_id, DependencyKind::Entity)]);
        assert_eq!(ops[1].id(), update_id);
    }

    #[test]
    fn test_order_dependencies_chain_same_entity() {
        let mut a = op(OperationKind::Update, "task", Some("t1"));
        let mut b = op(OperationKind::Update, "task", Some("t1"));
        let mut c = op(OperationKind::Delete, "task", Some("t1"));
        let base = a.timestamp;
        b.timestamp = base + Duration::milliseconds(1);
        c.timestamp = base + Duration::milliseconds(2);
        a.timestamp = base;
        let (a_id, b_id) = (a.id, b.id);

        // Supplied out of order; timestamps decide.
        let ops = DependencyResolver::new().resolve(vec![c, a, b]);

        assert_eq!(
            kinds_of(&ops[0]),
            vec![(a_id, DependencyKind::Order), (b_id, DependencyKind::Order)]
        );
        assert!(ops[1].dependencies.is_empty());
        assert_eq!(kinds_of(&ops[2]), vec![(a_id, DependencyKind::Order)]);
    }

    #[test]
    fn test_entity_edge_not_duplicated_by_order_edge() {
        let create = op(OperationKind::Create, "task", Some("t1"));
        let update = op(OperationKind::Update, "task", Some("t1"));
        let ops = DependencyResolver::new().resolve(vec![create, update]);
        assert_eq!(ops[1].dependencies.len(), 1);
    }

    #[test]
    fn test_later_create_is_not_a_prerequisite() {
        let mut delete = op(OperationKind::Delete, "task", Some("t1"));
        let mut create = op(OperationKind::Create, "task", Some("t1"));
        let base = delete.timestamp;
        delete.timestamp = base;
        create.timestamp = base + Duration::milliseconds(1);
        let delete_id = delete.id;

        let ops = DependencyResolver::new().resolve(vec![delete, create]);

        assert!(ops[0].dependencies.is_empty());
        assert_eq!(kinds_of(&ops[1]), vec![(delete_id, DependencyKind::Order)]);
    }

    #[test]
    fn test_unrelated_entities_are_independent() {
        let ops = DependencyResolver::new().resolve(vec![
            op(OperationKind::Create, "task", Some("t1")),
            op(OperationKind::Update, "task", Some("t2")),
            op(OperationKind::Update, "note", Some("t1")),
            op(OperationKind::Create, "task", None),
            op(OperationKind::Create, "task", None),
        ]);
        assert!(ops.iter().all(|o| o.dependencies.is_empty()));
    }

    #[test]
    fn test_custom_rule_adds_edges() {
        let a = op(OperationKind::Create, "project", Some("p1"));
        let b = op(OperationKind::Create, "task", Some("t1"));
        let a_id = a.id;

        let resolver = DependencyResolver::new().with_rule(|op, all| {
            if op.operation.entity_type != "task" {
                return Vec::new();
            }
            all.iter()
                .filter(|other| other.operation.entity_type == "project")
                .map(|other| Dependency::custom(other.id(), None))
                .collect()
        });
        let ops = resolver.resolve(vec![a, b]);

        assert_eq!(kinds_of(&ops[1]), vec![(a_id, DependencyKind::Custom)]);
    }

    #[test]
    fn test_dependency_state_transitions() {
        let create = op(OperationKind::Create, "task", Some("t1"));
        let update = op(OperationKind::Update, "task", Some("t1"));
        let mut ops = DependencyResolver::new().resolve(vec![create, update]);
        let index = index_operations(&ops);

        assert_eq!(dependency_state(&ops[0], &ops, &index), DependencyState::Ready);
        assert_eq!(dependency_state(&ops[1], &ops, &index), DependencyState::Waiting);

        ops[0].mark_synced(None);
        assert_eq!(dependency_state(&ops[1], &ops, &index), DependencyState::Ready);

        ops[0].synced = false;
        ops[0].failed = true;
        let blocker = ops[0].id();
        assert_eq!(
            dependency_state(&ops[1], &ops, &index),
            DependencyState::Blocked(blocker)
        );
    }

    #[test]
    fn test_custom_validator_gates_readiness() {
        let a = op(OperationKind::Create, "project", Some("p1"));
        let b = op(OperationKind::Create, "task", Some("t1"));
        let a_id = a.id;
        let mut ops = DependencyResolver::new().resolve(vec![a, b]);
        ops[1].add_dependency(Dependency::custom(
            a_id,
            Some(DependencyValidator::new(|prereq, _| prereq.result.is_some())),
        ));
        let index = index_operations(&ops);

        ops[0].mark_synced(None);
        assert_eq!(dependency_state(&ops[1], &ops, &index), DependencyState::Waiting);

        ops[0].mark_synced(Some(serde_json::json!({"id": "p1"})));
        assert_eq!(dependency_state(&ops[1], &ops, &index), DependencyState::Ready);
    }

    #[test]
    fn test_missing_target_keeps_waiting() {
        let mut ops = DependencyResolver::new().resolve(vec![op(OperationKind::Create, "task", None)]);
        ops[0].add_dependency(Dependency::custom(Uuid::new_v4(), None));
        let index = index_operations(&ops);
        assert_eq!(dependency_state(&ops[0], &ops, &index), DependencyState::Waiting);
    }
}
