use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::SyncError;
use crate::models::operation::QueuedOperation;

/// Why one operation has to wait for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Update/delete waits for the create of the same entity.
    Entity,
    /// Later edit of an entity waits for earlier edits of it.
    Order,
    /// Caller-defined constraint, optionally guarded by a validator.
    Custom,
}

/// Predicate deciding whether a custom dependency is satisfied.
///
/// Called with `(prerequisite, dependent)` once the prerequisite is synced.
#[derive(Clone)]
pub struct DependencyValidator(Arc<dyn Fn(&SyncOperation, &SyncOperation) -> bool + Send + Sync>);

impl DependencyValidator {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&SyncOperation, &SyncOperation) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn check(&self, prerequisite: &SyncOperation, dependent: &SyncOperation) -> bool {
        (self.0)(prerequisite, dependent)
    }
}

impl fmt::Debug for DependencyValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DependencyValidator(..)")
    }
}

/// Edge in the per-pass dependency graph.
#[derive(Debug, Clone, Serialize)]
pub struct Dependency {
    /// Operation that must be synced first
    pub depends_on: Uuid,

    pub kind: DependencyKind,

    #[serde(skip)]
    pub validator: Option<DependencyValidator>,
}

impl Dependency {
    pub fn entity(depends_on: Uuid) -> Self {
        Self {
            depends_on,
            kind: DependencyKind::Entity,
            validator: None,
        }
    }

    pub fn order(depends_on: Uuid) -> Self {
        Self {
            depends_on,
            kind: DependencyKind::Order,
            validator: None,
        }
    }

    pub fn custom(depends_on: Uuid, validator: Option<DependencyValidator>) -> Self {
        Self {
            depends_on,
            kind: DependencyKind::Custom,
            validator,
        }
    }
}

/// A queued operation decorated with pass-scoped state.
///
/// Dependencies and flags live only for one synchronization pass; nothing
/// here is written back to the queue except the wrapped operation.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOperation {
    pub operation: QueuedOperation,
    pub dependencies: Vec<Dependency>,
    pub synced: bool,
    pub skipped: bool,
    pub skip_reason: Option<String>,
    pub failed: bool,
    pub result: Option<Value>,
}

impl SyncOperation {
    pub fn new(operation: QueuedOperation) -> Self {
        Self {
            operation,
            dependencies: Vec::new(),
            synced: false,
            skipped: false,
            skip_reason: None,
            failed: false,
            result: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.operation.id
    }

    /// True once the operation reached an outcome in this pass.
    pub fn is_settled(&self) -> bool {
        self.synced || self.skipped || self.failed
    }

    /// Adds an edge unless an edge to the same operation already exists.
    ///
    /// Returns `false` when the edge was a duplicate.
    pub fn add_dependency(&mut self, dependency: Dependency) -> bool {
        if dependency.depends_on == self.operation.id
            || self.depends_on(dependency.depends_on)
        {
            return false;
        }
        self.dependencies.push(dependency);
        true
    }

    pub fn depends_on(&self, id: Uuid) -> bool {
        self.dependencies.iter().any(|d| d.depends_on == id)
    }

    pub fn mark_synced(&mut self, result: Option<Value>) {
        self.synced = true;
        self.result = result;
    }

    pub fn mark_skipped(&mut self, reason: impl Into<String>) {
        self.skipped = true;
        self.skip_reason = Some(reason.into());
    }

    pub fn mark_failed(&mut self) {
        self.failed = true;
    }
}

/// Conflict resolution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictStrategy {
    /// Keep the parameters the client submitted
    ClientWins,

    /// Server version wins (default)
    #[default]
    ServerWins,

    /// Shallow field union, server fields win on collision
    Merge,

    /// Field-wise merge against the common ancestor
    ThreeWayMerge,

    /// Recursive merge with per-field functions and array modes
    StructuralMerge,

    /// Apply client and server diffs onto the common ancestor
    Differential,

    /// Ask the host application for the resolved value
    Manual,

    /// Drop the operation without applying it
    Skip,

    /// A resolver registered for the entity type produced the value
    Custom,
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictStrategy::ClientWins => "client_wins",
            ConflictStrategy::ServerWins => "server_wins",
            ConflictStrategy::Merge => "merge",
            ConflictStrategy::ThreeWayMerge => "three_way_merge",
            ConflictStrategy::StructuralMerge => "structural_merge",
            ConflictStrategy::Differential => "differential",
            ConflictStrategy::Manual => "manual",
            ConflictStrategy::Skip => "skip",
            ConflictStrategy::Custom => "custom",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ConflictStrategy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "client_wins" => Ok(ConflictStrategy::ClientWins),
            "server_wins" => Ok(ConflictStrategy::ServerWins),
            "merge" => Ok(ConflictStrategy::Merge),
            "three_way_merge" => Ok(ConflictStrategy::ThreeWayMerge),
            "structural_merge" => Ok(ConflictStrategy::StructuralMerge),
            "differential" => Ok(ConflictStrategy::Differential),
            "manual" => Ok(ConflictStrategy::Manual),
            "skip" => Ok(ConflictStrategy::Skip),
            other => Err(SyncError::Config(format!("unknown conflict strategy: {}", other))),
        }
    }
}

/// How arrays are combined by the structural merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayMergeStrategy {
    /// Union of both arrays without duplicates
    Append,
    /// Take the server array
    Replace,
    /// Merge items by `id`, or positionally when items carry no id
    #[default]
    Merge,
}
