//! Store trait definitions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::{WorkflowEvent, WorkflowMetadata, WorkflowState};

/// Checkpoints kept per workflow when no explicit count is given
pub const DEFAULT_KEEP_CHECKPOINTS: usize = 5;

/// Error type for store operations
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    /// `(workflow_id, sequence_number)` already exists
    ///
    /// Raised when two writers race on the same workflow.
    #[error("constraint violation: workflow {workflow_id} already has sequence {sequence_number}")]
    ConstraintViolation {
        workflow_id: String,
        sequence_number: i64,
    },

    /// Appending would leave a hole in the sequence
    #[error("sequence gap in workflow {workflow_id}: expected {expected}, got {actual}")]
    SequenceGap {
        workflow_id: String,
        expected: i64,
        actual: i64,
    },

    /// A batch mixed several workflows
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// Workflow not found
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Validate the sequence number an append asks for against the log tail
pub(crate) fn next_sequence(workflow_id: &str, latest: i64, requested: i64) -> Result<i64, StoreError> {
    if requested <= 0 {
        return Ok(latest + 1);
    }
    if requested <= latest {
        return Err(StoreError::ConstraintViolation {
            workflow_id: workflow_id.to_string(),
            sequence_number: requested,
        });
    }
    if requested != latest + 1 {
        return Err(StoreError::SequenceGap {
            workflow_id: workflow_id.to_string(),
            expected: latest + 1,
            actual: requested,
        });
    }
    Ok(requested)
}

/// Point-in-time snapshot of a workflow's folded state
///
/// A checkpoint at sequence `N` is only written after every event `<= N` is
/// durably appended, so folding the events after `N` onto the restored state
/// gives the same result as folding the whole log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    pub id: Uuid,
    pub workflow_id: String,
    pub sequence_number: i64,
    /// Serialized [`WorkflowState`]
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: i64,
}

impl WorkflowCheckpoint {
    /// Snapshot `state` as of its last folded event
    pub fn capture(state: &WorkflowState) -> Result<Self, StoreError> {
        let serialized = serde_json::to_string(state)?;
        Ok(Self {
            id: Uuid::now_v7(),
            workflow_id: state.workflow_id.clone(),
            sequence_number: state.last_event_sequence,
            size_bytes: serialized.len() as i64,
            state: serialized,
            created_at: Utc::now(),
        })
    }

    /// Deserialize the snapshot, the exact inverse of [`capture`](Self::capture)
    pub fn restore_state(&self) -> Result<WorkflowState, StoreError> {
        Ok(serde_json::from_str(&self.state)?)
    }
}

/// Append-only, per-workflow sequenced event log
///
/// Implementations must be safe for concurrent writers on different
/// workflows. Writers of one workflow are expected to be serialized by the
/// caller; the unique `(workflow_id, sequence_number)` constraint exists to
/// detect when they are not.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Durably append one event, returning its sequence number
    ///
    /// A `sequence_number <= 0` lets the store assign the next number.
    async fn append_event(&self, event: WorkflowEvent) -> Result<i64, StoreError>;

    /// Append a batch of events for one workflow, all or nothing
    async fn append_events(&self, events: Vec<WorkflowEvent>) -> Result<Vec<i64>, StoreError>;

    /// Load events in ascending order, bounds inclusive
    ///
    /// `to_sequence = None` reads to the latest event.
    async fn get_events(
        &self,
        workflow_id: &str,
        from_sequence: i64,
        to_sequence: Option<i64>,
    ) -> Result<Vec<WorkflowEvent>, StoreError>;

    /// Highest sequence number of the workflow, 0 when it has no events
    async fn get_latest_sequence(&self, workflow_id: &str) -> Result<i64, StoreError>;

    /// Events of one type, ascending (diagnostics only)
    async fn get_events_by_type(
        &self,
        workflow_id: &str,
        event_type: &str,
    ) -> Result<Vec<WorkflowEvent>, StoreError>;

    /// Delete the whole log of a workflow, returning the number of events removed
    async fn delete_events(&self, workflow_id: &str) -> Result<u64, StoreError>;

    /// Number of events in the workflow log
    async fn get_event_count(&self, workflow_id: &str) -> Result<u64, StoreError>;
}

/// Store for workflow checkpoints
#[async_trait]
pub trait CheckpointManager: Send + Sync + 'static {
    /// Persist a checkpoint; older checkpoints are left alone
    async fn save(&self, checkpoint: WorkflowCheckpoint) -> Result<(), StoreError>;

    /// Checkpoint with the highest sequence number
    async fn get_latest(&self, workflow_id: &str)
        -> Result<Option<WorkflowCheckpoint>, StoreError>;

    /// Highest checkpoint strictly below `sequence_number`
    async fn get_latest_before(
        &self,
        workflow_id: &str,
        sequence_number: i64,
    ) -> Result<Option<WorkflowCheckpoint>, StoreError>;

    /// All checkpoints, ascending by sequence number
    async fn get_all(&self, workflow_id: &str) -> Result<Vec<WorkflowCheckpoint>, StoreError>;

    /// Keep the `keep_count` most recent checkpoints, returning how many were deleted
    async fn prune_old_checkpoints(
        &self,
        workflow_id: &str,
        keep_count: usize,
    ) -> Result<u64, StoreError>;

    /// Delete every checkpoint of a workflow
    async fn delete_all(&self, workflow_id: &str) -> Result<u64, StoreError>;

    /// Deserialize a checkpoint's state
    fn restore_state(&self, checkpoint: &WorkflowCheckpoint) -> Result<WorkflowState, StoreError> {
        checkpoint.restore_state()
    }
}

/// Read access to the metadata the surrounding service maintains
#[async_trait]
pub trait MetadataReader: Send + Sync + 'static {
    /// Metadata of a workflow, if it exists
    async fn get_metadata(&self, workflow_id: &str)
        -> Result<Option<WorkflowMetadata>, StoreError>;

    /// Workflows owned by `owner_id`, newest first
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<WorkflowMetadata>, StoreError>;
}
