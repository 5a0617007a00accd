use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::SyncError;

/// Kind of mutation recorded in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "CREATE"),
            OperationKind::Update => write!(f, "UPDATE"),
            OperationKind::Delete => write!(f, "DELETE"),
        }
    }
}

impl FromStr for OperationKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATE" => Ok(OperationKind::Create),
            "UPDATE" => Ok(OperationKind::Update),
            "DELETE" => Ok(OperationKind::Delete),
            other => Err(SyncError::Serialization(format!(
                "unknown operation kind: {}",
                other
            ))),
        }
    }
}

/// Error recorded on an operation after a failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationError {
    pub message: String,
    pub code: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl OperationError {
    pub fn new(message: impl Into<String>, code: Option<String>) -> Self {
        Self {
            message: message.into(),
            code,
            timestamp: Utc::now(),
        }
    }
}

/// A locally originated mutation that has not been confirmed by the server.
///
/// Operations are created by [`OperationQueue::enqueue`](crate::queue::OperationQueue::enqueue),
/// updated in place after every attempt and removed once they reach a
/// terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Unique identifier assigned at enqueue time
    pub id: Uuid,

    /// When the operation was enqueued
    pub timestamp: DateTime<Utc>,

    /// CREATE, UPDATE or DELETE
    pub kind: OperationKind,

    /// Name of the remote method that applies this mutation
    pub method: String,

    /// Arguments passed to the remote method
    pub params: Map<String, Value>,

    /// Entity type the mutation targets (e.g. "task")
    pub entity_type: String,

    /// Entity identifier; absent for creates without a client-assigned id
    pub entity_id: Option<String>,

    /// Number of failed attempts so far
    pub retry_count: u32,

    /// True only while an attempt is in flight
    pub processing: bool,

    /// Error from the most recent failed attempt
    pub last_error: Option<OperationError>,
}

impl QueuedOperation {
    /// Creates a fresh pending operation with a new id and the current time.
    pub fn new(
        kind: OperationKind,
        method: impl Into<String>,
        params: Map<String, Value>,
        entity_type: impl Into<String>,
        entity_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            method: method.into(),
            params,
            entity_type: entity_type.into(),
            entity_id,
            retry_count: 0,
            processing: false,
            last_error: None,
        }
    }

    /// Key grouping operations that touch the same remote entity.
    ///
    /// Operations without an entity id are never grouped.
    pub fn entity_key(&self) -> Option<(&str, &str)> {
        self.entity_id
            .as_deref()
            .map(|id| (self.entity_type.as_str(), id))
    }

    /// Parameters as a JSON object value.
    pub fn params_value(&self) -> Value {
        Value::Object(self.params.clone())
    }

    /// Records a failed attempt.
    pub fn record_failure(&mut self, message: impl Into<String>, code: Option<String>) {
        self.retry_count += 1;
        self.processing = false;
        self.last_error = Some(OperationError::new(message, code));
    }
}
