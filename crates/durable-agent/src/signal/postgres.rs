//! PostgreSQL signal queue

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::sync::Notify;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::queue::{SignalError, SignalQueue};
use crate::persistence::StoreError;
use crate::workflow::WorkflowSignal;

/// Default interval at which waiters pick up signals written by other processes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// PostgreSQL implementation of [`SignalQueue`]
///
/// Signals enqueued through this instance wake local waiters at once; signals
/// written by other processes are seen on the next re-check. Claims use
/// `FOR UPDATE SKIP LOCKED`, so competing waiters never receive the same row.
#[derive(Clone)]
pub struct PostgresSignalQueue {
    pool: PgPool,
    notifiers: Arc<DashMap<String, Arc<Notify>>>,
    poll_interval: Duration,
}

impl PostgresSignalQueue {
    /// Create a queue over the given pool
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            notifiers: Arc::new(DashMap::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the cross-process re-check interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(10));
        self
    }
}

#[async_trait]
impl SignalQueue for PostgresSignalQueue {
    #[instrument(skip(self, signal), fields(workflow_id = %signal.workflow_id, signal_name = %signal.signal_name))]
    async fn enqueue(&self, signal: WorkflowSignal) -> Result<Uuid, SignalError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_signals (
                id, workflow_id, signal_name, signal_data, received_at, processed, processed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(signal.id)
        .bind(&signal.workflow_id)
        .bind(&signal.signal_name)
        .bind(&signal.signal_data)
        .bind(signal.received_at)
        .bind(signal.is_processed())
        .bind(signal.processed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to enqueue signal: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if let Some(notify) = self.notifiers.get(&signal.workflow_id) {
            notify.notify_waiters();
        }

        debug!(signal_id = %signal.id, "enqueued signal");
        Ok(signal.id)
    }

    #[instrument(skip(self))]
    async fn claim(
        &self,
        workflow_id: &str,
        signal_name: Option<&str>,
    ) -> Result<Option<WorkflowSignal>, SignalError> {
        let row = sqlx::query(
            r#"
            UPDATE workflow_signals
            SET processed = TRUE, processed_at = NOW()
            WHERE id = (
                SELECT id FROM workflow_signals
                WHERE workflow_id = $1
                  AND processed = FALSE
                  AND ($2::TEXT IS NULL OR signal_name = $2)
                ORDER BY received_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, workflow_id, signal_name, signal_data, received_at, processed_at
            "#,
        )
        .bind(workflow_id)
        .bind(signal_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to claim signal: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(row.as_ref().map(signal_from_row))
    }

    #[instrument(skip(self))]
    async fn get_unprocessed_signals(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<WorkflowSignal>, SignalError> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, signal_name, signal_data, received_at, processed_at
            FROM workflow_signals
            WHERE workflow_id = $1 AND processed = FALSE
            ORDER BY received_at, id
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.iter().map(signal_from_row).collect())
    }

    #[instrument(skip(self))]
    async fn mark_as_processed(&self, signal_id: Uuid) -> Result<(), SignalError> {
        sqlx::query(
            r#"
            UPDATE workflow_signals
            SET processed = TRUE, processed_at = COALESCE(processed_at, NOW())
            WHERE id = $1
            "#,
        )
        .bind(signal_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to mark signal processed: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn purge(&self, workflow_id: &str) -> Result<u64, SignalError> {
        let result = sqlx::query("DELETE FROM workflow_signals WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        self.release_notifier(workflow_id);
        Ok(result.rows_affected())
    }

    fn notifier(&self, workflow_id: &str) -> Arc<Notify> {
        self.notifiers
            .entry(workflow_id.to_string())
            .or_default()
            .clone()
    }

    fn release_notifier(&self, workflow_id: &str) {
        self.notifiers
            .remove_if(workflow_id, |_, notify| Arc::strong_count(notify) == 1);
    }

    fn recheck_interval(&self) -> Option<Duration> {
        Some(self.poll_interval)
    }
}

fn signal_from_row(row: &PgRow) -> WorkflowSignal {
    WorkflowSignal {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        signal_name: row.get("signal_name"),
        signal_data: row.get("signal_data"),
        received_at: row.get("received_at"),
        processed_at: row.get("processed_at"),
    }
}
