use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::sync::types::{ConflictStrategy, SyncOperation};

/// Classification of a divergence between client and server state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    /// Both sides updated the entity
    UpdateUpdate,
    /// Client updated an entity the server deleted
    UpdateDelete,
    /// Client deleted an entity the server updated
    DeleteUpdate,
    /// Both sides created the same entity
    CreateCreate,
    Generic,
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictType::UpdateUpdate => write!(f, "UPDATE_UPDATE"),
            ConflictType::UpdateDelete => write!(f, "UPDATE_DELETE"),
            ConflictType::DeleteUpdate => write!(f, "DELETE_UPDATE"),
            ConflictType::CreateCreate => write!(f, "CREATE_CREATE"),
            ConflictType::Generic => write!(f, "GENERIC"),
        }
    }
}

/// Outcome of resolving a single conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub strategy: ConflictStrategy,
    pub data: Option<Value>,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ConflictResolution {
    pub fn resolved(strategy: ConflictStrategy, data: Option<Value>) -> Self {
        Self {
            strategy,
            data,
            success: true,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(strategy: ConflictStrategy, error: impl Into<String>) -> Self {
        Self {
            strategy,
            data: None,
            success: false,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// A detected divergence for one operation.
#[derive(Debug, Clone, Serialize)]
pub struct Conflict {
    pub id: Uuid,
    pub conflict_type: ConflictType,
    pub operation: SyncOperation,

    /// State reported by the server alongside the failure
    pub server_data: Option<Value>,

    /// Local state before the operation was applied, when known
    pub local_data: Option<Value>,

    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
    pub resolution: Option<ConflictResolution>,
}

impl Conflict {
    pub fn new(
        conflict_type: ConflictType,
        operation: SyncOperation,
        server_data: Option<Value>,
        local_data: Option<Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conflict_type,
            operation,
            server_data,
            local_data,
            timestamp: Utc::now(),
            resolved: false,
            resolution: None,
        }
    }

    /// Data the client tried to apply.
    pub fn client_data(&self) -> Value {
        self.operation.operation.params_value()
    }

    pub fn entity_type(&self) -> &str {
        &self.operation.operation.entity_type
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.operation.operation.entity_id.as_deref()
    }
}
