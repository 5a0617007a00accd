use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::models::operation::{OperationError, OperationKind, QueuedOperation};
use crate::queue::QueueStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queued_operations (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    kind TEXT NOT NULL,
    method TEXT NOT NULL,
    params TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    processing INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
)
"#;

/// Queue store persisted in a SQLite database.
///
/// Rows are ordered by an autoincrement sequence so `get_all` always returns
/// operations in the order they were enqueued.
#[derive(Clone)]
pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    /// Opens (or creates) the database at `database_url` and prepares the schema.
    ///
    /// Operations left with the processing flag set by an interrupted attempt
    /// are reset so the next pass retries them.
    ///
    /// # Arguments
    ///
    /// * `database_url` - e.g. `sqlite://queue.db` or `sqlite::memory:`
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // An in-memory database lives only as long as its connection.
        let in_memory = database_url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.migrate().await?;

        let recovered = store.reset_processing().await?;
        if recovered > 0 {
            warn!(
                "Recovered {} operation(s) interrupted mid-attempt",
                recovered
            );
        }

        info!("Opened SQLite queue store at {}", database_url);
        Ok(store)
    }

    /// Wraps an existing pool; the schema is created if missing.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Clears stale processing flags, returning how many rows changed.
    pub async fn reset_processing(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE queued_operations SET processing = 0 WHERE processing = 1")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    fn row_to_operation(row: &SqliteRow) -> Result<QueuedOperation> {
        let id: String = row.try_get("id")?;
        let created_at: String = row.try_get("created_at")?;
        let kind: String = row.try_get("kind")?;
        let params: String = row.try_get("params")?;
        let retry_count: i64 = row.try_get("retry_count")?;
        let last_error: Option<String> = row.try_get("last_error")?;

        let params: Map<String, Value> = serde_json::from_str(&params)?;
        let last_error: Option<OperationError> = match last_error {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };

        Ok(QueuedOperation {
            id: Uuid::parse_str(&id)
                .map_err(|e| SyncError::Serialization(format!("invalid operation id {}: {}", id, e)))?,
            timestamp: parse_timestamp(&created_at)?,
            kind: kind.parse::<OperationKind>()?,
            method: row.try_get("method")?,
            params,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
            processing: row.try_get("processing")?,
            last_error,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::Serialization(format!("invalid timestamp {}: {}", raw, e)))
}

fn encode_error(error: &Option<OperationError>) -> Result<Option<String>> {
    match error {
        Some(err) => Ok(Some(serde_json::to_string(err)?)),
        None => Ok(None),
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn get_all(&self) -> Result<Vec<QueuedOperation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, created_at, kind, method, params, entity_type, entity_id,
                   retry_count, processing, last_error
            FROM queued_operations
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_operation).collect()
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueuedOperation>> {
        let row = sqlx::query(
            r#"
            SELECT id, created_at, kind, method, params, entity_type, entity_id,
                   retry_count, processing, last_error
            FROM queued_operations
            WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_operation).transpose()
    }

    async fn add(&self, operation: &QueuedOperation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO queued_operations (
                id, created_at, kind, method, params, entity_type, entity_id,
                retry_count, processing, last_error
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(operation.id.to_string())
        .bind(operation.timestamp.to_rfc3339())
        .bind(operation.kind.to_string())
        .bind(&operation.method)
        .bind(serde_json::to_string(&operation.params)?)
        .bind(&operation.entity_type)
        .bind(operation.entity_id.as_deref())
        .bind(i64::from(operation.retry_count))
        .bind(operation.processing)
        .bind(encode_error(&operation.last_error)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, operation: &QueuedOperation) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE queued_operations
            SET kind = ?2,
                method = ?3,
                params = ?4,
                entity_type = ?5,
                entity_id = ?6,
                retry_count = ?7,
                processing = ?8,
                last_error = ?9
            WHERE id = ?1
            "#,
        )
        .bind(operation.id.to_string())
        .bind(operation.kind.to_string())
        .bind(&operation.method)
        .bind(serde_json::to_string(&operation.params)?)
        .bind(&operation.entity_type)
        .bind(operation.entity_id.as_deref())
        .bind(i64::from(operation.retry_count))
        .bind(operation.processing)
        .bind(encode_error(&operation.last_error)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::NotFound(operation.id));
        }
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM queued_operations WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM queued_operations")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
