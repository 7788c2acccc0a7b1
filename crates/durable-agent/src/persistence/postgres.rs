//! PostgreSQL implementation of the workflow stores
//!
//! Production persistence with:
//! - Per-workflow append serialization via transaction-scoped advisory locks
//! - The unique `(workflow_id, sequence_number)` constraint as the last line
//!   against racing writers
//! - Checkpoint retention in a single statement

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, error, instrument};

use super::store::*;
use crate::workflow::{WorkflowEvent, WorkflowMetadata, WorkflowStatus};

/// PostgreSQL implementation of [`EventStore`], [`CheckpointManager`] and
/// [`MetadataReader`]
///
/// Uses a connection pool; cloning is cheap.
///
/// # Example
///
/// ```ignore
/// use durable_agent::PostgresWorkflowStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/mydb").await?;
/// let store = PostgresWorkflowStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresWorkflowStore {
    pool: PgPool,
}

impl PostgresWorkflowStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to run migrations: {}", e);
                StoreError::Database(e.to_string())
            })
    }

    /// Serialize appends to one workflow and return its current tail
    async fn lock_tail(
        tx: &mut Transaction<'_, Postgres>,
        workflow_id: &str,
    ) -> Result<i64, StoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(workflow_id)
            .execute(&mut **tx)
            .await
            .map_err(db_error)?;

        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(sequence_number), 0) AS latest
            FROM workflow_events
            WHERE workflow_id = $1
            "#,
        )
        .bind(workflow_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(db_error)?;

        Ok(row.get("latest"))
    }

    async fn insert_event(
        tx: &mut Transaction<'_, Postgres>,
        event: &WorkflowEvent,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_events (
                id, workflow_id, sequence_number, event_type, event_data, timestamp, checkpoint_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id)
        .bind(&event.workflow_id)
        .bind(event.sequence_number)
        .bind(&event.event_type)
        .bind(&event.event_data)
        .bind(event.timestamp)
        .bind(event.checkpoint_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| insert_error(e, &event.workflow_id, event.sequence_number))?;

        Ok(())
    }
}

#[async_trait]
impl EventStore for PostgresWorkflowStore {
    #[instrument(skip(self, event), fields(workflow_id = %event.workflow_id))]
    async fn append_event(&self, mut event: WorkflowEvent) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let latest = Self::lock_tail(&mut tx, &event.workflow_id).await?;
        event.sequence_number = next_sequence(&event.workflow_id, latest, event.sequence_number)?;
        Self::insert_event(&mut tx, &event).await?;

        tx.commit().await.map_err(db_error)?;

        debug!(
            sequence_number = event.sequence_number,
            event_type = %event.event_type,
            "appended event"
        );
        Ok(event.sequence_number)
    }

    #[instrument(skip(self, events), fields(count = events.len()))]
    async fn append_events(&self, events: Vec<WorkflowEvent>) -> Result<Vec<i64>, StoreError> {
        let Some(workflow_id) = events.first().map(|e| e.workflow_id.clone()) else {
            return Ok(vec![]);
        };
        if events.iter().any(|e| e.workflow_id != workflow_id) {
            return Err(StoreError::InvalidBatch(
                "all events of a batch must belong to one workflow".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let mut latest = Self::lock_tail(&mut tx, &workflow_id).await?;

        let mut numbers = Vec::with_capacity(events.len());
        for mut event in events {
            // Any error drops the transaction and rolls the whole batch back
            latest = next_sequence(&workflow_id, latest, event.sequence_number)?;
            event.sequence_number = latest;
            Self::insert_event(&mut tx, &event).await?;
            numbers.push(latest);
        }

        tx.commit().await.map_err(db_error)?;

        debug!(%workflow_id, latest, "appended events");
        Ok(numbers)
    }

    #[instrument(skip(self))]
    async fn get_events(
        &self,
        workflow_id: &str,
        from_sequence: i64,
        to_sequence: Option<i64>,
    ) -> Result<Vec<WorkflowEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, sequence_number, event_type, event_data, timestamp, checkpoint_id
            FROM workflow_events
            WHERE workflow_id = $1
              AND sequence_number >= $2
              AND ($3::BIGINT IS NULL OR sequence_number <= $3)
            ORDER BY sequence_number
            "#,
        )
        .bind(workflow_id)
        .bind(from_sequence)
        .bind(to_sequence)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load events: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(rows.iter().map(event_from_row).collect())
    }

    #[instrument(skip(self))]
    async fn get_latest_sequence(&self, workflow_id: &str) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(sequence_number), 0) AS latest
            FROM workflow_events
            WHERE workflow_id = $1
            "#,
        )
        .bind(workflow_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.get("latest"))
    }

    #[instrument(skip(self))]
    async fn get_events_by_type(
        &self,
        workflow_id: &str,
        event_type: &str,
    ) -> Result<Vec<WorkflowEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, sequence_number, event_type, event_data, timestamp, checkpoint_id
            FROM workflow_events
            WHERE workflow_id = $1 AND event_type = $2
            ORDER BY sequence_number
            "#,
        )
        .bind(workflow_id)
        .bind(event_type)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.iter().map(event_from_row).collect())
    }

    #[instrument(skip(self))]
    async fn delete_events(&self, workflow_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM workflow_events WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to delete events: {}", e);
                StoreError::Database(e.to_string())
            })?;

        debug!(%workflow_id, deleted = result.rows_affected(), "deleted events");
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn get_event_count(&self, workflow_id: &str) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM workflow_events WHERE workflow_id = $1")
            .bind(workflow_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(row.get::<i64, _>("count") as u64)
    }
}

#[async_trait]
impl CheckpointManager for PostgresWorkflowStore {
    #[instrument(skip(self, checkpoint), fields(workflow_id = %checkpoint.workflow_id, sequence_number = checkpoint.sequence_number))]
    async fn save(&self, checkpoint: WorkflowCheckpoint) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_checkpoints (id, workflow_id, sequence_number, state, created_at, size_bytes)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(checkpoint.id)
        .bind(&checkpoint.workflow_id)
        .bind(checkpoint.sequence_number)
        .bind(&checkpoint.state)
        .bind(checkpoint.created_at)
        .bind(checkpoint.size_bytes)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save checkpoint: {}", e);
            StoreError::Database(e.to_string())
        })?;

        debug!(size_bytes = checkpoint.size_bytes, "saved checkpoint");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_latest(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowCheckpoint>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_id, sequence_number, state, created_at, size_bytes
            FROM workflow_checkpoints
            WHERE workflow_id = $1
            ORDER BY sequence_number DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.as_ref().map(checkpoint_from_row))
    }

    #[instrument(skip(self))]
    async fn get_latest_before(
        &self,
        workflow_id: &str,
        sequence_number: i64,
    ) -> Result<Option<WorkflowCheckpoint>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_id, sequence_number, state, created_at, size_bytes
            FROM workflow_checkpoints
            WHERE workflow_id = $1 AND sequence_number < $2
            ORDER BY sequence_number DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(workflow_id)
        .bind(sequence_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.as_ref().map(checkpoint_from_row))
    }

    #[instrument(skip(self))]
    async fn get_all(&self, workflow_id: &str) -> Result<Vec<WorkflowCheckpoint>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, sequence_number, state, created_at, size_bytes
            FROM workflow_checkpoints
            WHERE workflow_id = $1
            ORDER BY sequence_number, created_at
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.iter().map(checkpoint_from_row).collect())
    }

    #[instrument(skip(self))]
    async fn prune_old_checkpoints(
        &self,
        workflow_id: &str,
        keep_count: usize,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM workflow_checkpoints
            WHERE workflow_id = $1
              AND id NOT IN (
                SELECT id FROM workflow_checkpoints
                WHERE workflow_id = $1
                ORDER BY sequence_number DESC, created_at DESC
                LIMIT $2
              )
            "#,
        )
        .bind(workflow_id)
        .bind(keep_count as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to prune checkpoints: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if result.rows_affected() > 0 {
            debug!(%workflow_id, pruned = result.rows_affected(), "pruned checkpoints");
        }
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn delete_all(&self, workflow_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM workflow_checkpoints WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl MetadataReader for PostgresWorkflowStore {
    #[instrument(skip(self))]
    async fn get_metadata(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowMetadata>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT workflow_id, project_id, task, status, owner_id, created_at, updated_at,
                   completed_at, parent_workflow_id, version
            FROM workflow_metadata
            WHERE workflow_id = $1
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref().map(metadata_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<WorkflowMetadata>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT workflow_id, project_id, task, status, owner_id, created_at, updated_at,
                   completed_at, parent_workflow_id, version
            FROM workflow_metadata
            WHERE owner_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(metadata_from_row).collect()
    }
}

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn insert_error(e: sqlx::Error, workflow_id: &str, sequence_number: i64) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return StoreError::ConstraintViolation {
                workflow_id: workflow_id.to_string(),
                sequence_number,
            };
        }
    }
    error!("Failed to append event: {}", e);
    StoreError::Database(e.to_string())
}

fn event_from_row(row: &PgRow) -> WorkflowEvent {
    WorkflowEvent {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        sequence_number: row.get("sequence_number"),
        event_type: row.get("event_type"),
        event_data: row.get("event_data"),
        timestamp: row.get("timestamp"),
        checkpoint_id: row.get("checkpoint_id"),
    }
}

fn checkpoint_from_row(row: &PgRow) -> WorkflowCheckpoint {
    WorkflowCheckpoint {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        sequence_number: row.get("sequence_number"),
        state: row.get("state"),
        created_at: row.get("created_at"),
        size_bytes: row.get("size_bytes"),
    }
}

fn metadata_from_row(row: &PgRow) -> Result<WorkflowMetadata, StoreError> {
    let status: String = row.get("status");
    let status = status
        .parse::<WorkflowStatus>()
        .map_err(StoreError::Serialization)?;

    Ok(WorkflowMetadata {
        workflow_id: row.get("workflow_id"),
        project_id: row.get("project_id"),
        task: row.get("task"),
        status,
        owner_id: row.get("owner_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
        parent_workflow_id: row.get("parent_workflow_id"),
        version: row.get("version"),
    })
}
