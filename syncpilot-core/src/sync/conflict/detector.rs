use tracing::{debug, info};

use crate::models::conflict::{Conflict, ConflictType};
use crate::models::operation::OperationKind;
use crate::remote::RemoteOutcome;
use crate::sync::types::SyncOperation;

/// Classifier fragments identifying transport-level failures.
///
/// Such failures are retried on a later pass instead of being treated as a
/// divergence from server state.
const TRANSIENT_MARKERS: [&str; 4] = ["network", "timeout", "unavailable", "offline"];

/// Classifies failed remote calls into conflict types.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        Self
    }

    /// Inspects a remote outcome for a conflict signal.
    ///
    /// # Arguments
    ///
    /// * `operation` - The operation whose remote call failed
    /// * `outcome` - What the remote collaborator returned
    ///
    /// # Returns
    ///
    /// Returns `None` for successful outcomes and for failures that carry no
    /// classifier token or a transient one; otherwise the classified conflict,
    /// carrying the server-reported state from `outcome.data`.
    pub fn detect(&self, operation: &SyncOperation, outcome: &RemoteOutcome) -> Option<Conflict> {
        if outcome.success {
            return None;
        }

        let Some(token) = outcome.code.as_deref().map(str::to_ascii_lowercase) else {
            debug!(
                "Failure of {} carries no classifier, not a conflict",
                operation.id()
            );
            return None;
        };
        if TRANSIENT_MARKERS.iter().any(|marker| token.contains(marker)) {
            debug!(
                "Failure of {} is transient ({}), not a conflict",
                operation.id(),
                token
            );
            return None;
        }

        let conflict_type = classify(operation.operation.kind, &token);
        info!(
            "Conflict detected: {} for {} {}:{}",
            conflict_type,
            operation.operation.kind,
            operation.operation.entity_type,
            operation.operation.entity_id.as_deref().unwrap_or("-")
        );

        Some(Conflict::new(
            conflict_type,
            operation.clone(),
            outcome.data.clone(),
            None,
        ))
    }
}

fn classify(kind: OperationKind, token: &str) -> ConflictType {
    let has = |needles: &[&str]| needles.iter().any(|n| token.contains(n));

    if has(&["version_conflict", "concurrent_modification"]) {
        match kind {
            OperationKind::Update => return ConflictType::UpdateUpdate,
            OperationKind::Delete => return ConflictType::DeleteUpdate,
            OperationKind::Create => {}
        }
    }
    if kind == OperationKind::Update && has(&["not_found", "deleted"]) {
        return ConflictType::UpdateDelete;
    }
    if kind == OperationKind::Create && has(&["duplicate", "already_exists"]) {
        return ConflictType::CreateCreate;
    }
    ConflictType::Generic
}
