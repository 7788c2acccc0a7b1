//! In-memory store implementations for testing and single-process use

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::store::*;
use crate::workflow::{WorkflowEvent, WorkflowMetadata};

/// In-memory implementation of [`EventStore`]
///
/// Stores every workflow log in a map and provides the same semantics as the
/// PostgreSQL implementation.
///
/// # Example
///
/// ```
/// use durable_agent::InMemoryEventStore;
///
/// let store = InMemoryEventStore::new();
/// ```
#[derive(Default)]
pub struct InMemoryEventStore {
    logs: RwLock<HashMap<String, Vec<WorkflowEvent>>>,
}

impl InMemoryEventStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of workflows with at least one event
    pub fn workflow_count(&self) -> usize {
        self.logs.read().values().filter(|l| !l.is_empty()).count()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.logs.write().clear();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append_event(&self, mut event: WorkflowEvent) -> Result<i64, StoreError> {
        let mut logs = self.logs.write();
        let log = logs.entry(event.workflow_id.clone()).or_default();

        let latest = log.last().map(|e| e.sequence_number).unwrap_or(0);
        let sequence_number = next_sequence(&event.workflow_id, latest, event.sequence_number)?;

        event.sequence_number = sequence_number;
        log.push(event);
        Ok(sequence_number)
    }

    async fn append_events(&self, events: Vec<WorkflowEvent>) -> Result<Vec<i64>, StoreError> {
        let Some(workflow_id) = events.first().map(|e| e.workflow_id.clone()) else {
            return Ok(vec![]);
        };
        if events.iter().any(|e| e.workflow_id != workflow_id) {
            return Err(StoreError::InvalidBatch(
                "all events of a batch must belong to one workflow".to_string(),
            ));
        }

        let mut logs = self.logs.write();
        let log = logs.entry(workflow_id.clone()).or_default();

        // Validate the whole batch before touching the log
        let mut latest = log.last().map(|e| e.sequence_number).unwrap_or(0);
        let mut sequenced = Vec::with_capacity(events.len());
        for mut event in events {
            latest = next_sequence(&workflow_id, latest, event.sequence_number)?;
            event.sequence_number = latest;
            sequenced.push(event);
        }

        let numbers = sequenced.iter().map(|e| e.sequence_number).collect();
        log.extend(sequenced);
        Ok(numbers)
    }

    async fn get_events(
        &self,
        workflow_id: &str,
        from_sequence: i64,
        to_sequence: Option<i64>,
    ) -> Result<Vec<WorkflowEvent>, StoreError> {
        let logs = self.logs.read();
        let Some(log) = logs.get(workflow_id) else {
            return Ok(vec![]);
        };

        Ok(log
            .iter()
            .filter(|e| e.sequence_number >= from_sequence)
            .filter(|e| to_sequence.map_or(true, |to| e.sequence_number <= to))
            .cloned()
            .collect())
    }

    async fn get_latest_sequence(&self, workflow_id: &str) -> Result<i64, StoreError> {
        Ok(self
            .logs
            .read()
            .get(workflow_id)
            .and_then(|log| log.last())
            .map(|e| e.sequence_number)
            .unwrap_or(0))
    }

    async fn get_events_by_type(
        &self,
        workflow_id: &str,
        event_type: &str,
    ) -> Result<Vec<WorkflowEvent>, StoreError> {
        Ok(self
            .logs
            .read()
            .get(workflow_id)
            .map(|log| {
                log.iter()
                    .filter(|e| e.event_type == event_type)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_events(&self, workflow_id: &str) -> Result<u64, StoreError> {
        Ok(self
            .logs
            .write()
            .remove(workflow_id)
            .map(|log| log.len() as u64)
            .unwrap_or(0))
    }

    async fn get_event_count(&self, workflow_id: &str) -> Result<u64, StoreError> {
        Ok(self
            .logs
            .read()
            .get(workflow_id)
            .map(|log| log.len() as u64)
            .unwrap_or(0))
    }
}

/// In-memory implementation of [`CheckpointManager`]
///
/// Checkpoints of a workflow are kept sorted by sequence number.
#[derive(Default)]
pub struct InMemoryCheckpointManager {
    checkpoints: RwLock<HashMap<String, Vec<WorkflowCheckpoint>>>,
}

impl InMemoryCheckpointManager {
    /// Create a new in-memory checkpoint manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of checkpoints across workflows
    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.read().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl CheckpointManager for InMemoryCheckpointManager {
    async fn save(&self, checkpoint: WorkflowCheckpoint) -> Result<(), StoreError> {
        let mut checkpoints = self.checkpoints.write();
        let list = checkpoints.entry(checkpoint.workflow_id.clone()).or_default();

        // Stable insert: a checkpoint saved later at an equal sequence sorts after
        let at = list.partition_point(|c| c.sequence_number <= checkpoint.sequence_number);
        list.insert(at, checkpoint);
        Ok(())
    }

    async fn get_latest(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowCheckpoint>, StoreError> {
        Ok(self
            .checkpoints
            .read()
            .get(workflow_id)
            .and_then(|list| list.last())
            .cloned())
    }

    async fn get_latest_before(
        &self,
        workflow_id: &str,
        sequence_number: i64,
    ) -> Result<Option<WorkflowCheckpoint>, StoreError> {
        Ok(self
            .checkpoints
            .read()
            .get(workflow_id)
            .and_then(|list| {
                list.iter()
                    .rev()
                    .find(|c| c.sequence_number < sequence_number)
            })
            .cloned())
    }

    async fn get_all(&self, workflow_id: &str) -> Result<Vec<WorkflowCheckpoint>, StoreError> {
        Ok(self
            .checkpoints
            .read()
            .get(workflow_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn prune_old_checkpoints(
        &self,
        workflow_id: &str,
        keep_count: usize,
    ) -> Result<u64, StoreError> {
        let mut checkpoints = self.checkpoints.write();
        let Some(list) = checkpoints.get_mut(workflow_id) else {
            return Ok(0);
        };

        let excess = list.len().saturating_sub(keep_count);
        list.drain(..excess);
        Ok(excess as u64)
    }

    async fn delete_all(&self, workflow_id: &str) -> Result<u64, StoreError> {
        Ok(self
            .checkpoints
            .write()
            .remove(workflow_id)
            .map(|list| list.len() as u64)
            .unwrap_or(0))
    }
}

/// In-memory implementation of [`MetadataReader`]
///
/// Tests and embedders use [`insert`](Self::insert) to play the role of the
/// service that owns workflow metadata.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    records: RwLock<HashMap<String, WorkflowMetadata>>,
}

impl InMemoryMetadataStore {
    /// Create a new, empty metadata store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record
    pub fn insert(&self, metadata: WorkflowMetadata) {
        self.records
            .write()
            .insert(metadata.workflow_id.clone(), metadata);
    }
}

#[async_trait]
impl MetadataReader for InMemoryMetadataStore {
    async fn get_metadata(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowMetadata>, StoreError> {
        Ok(self.records.read().get(workflow_id).cloned())
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<WorkflowMetadata>, StoreError> {
        let mut records: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|m| m.owner_id == owner_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}
