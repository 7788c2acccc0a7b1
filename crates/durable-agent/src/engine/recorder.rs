//! Sequencing cursor of a running execution
//!
//! Every write of an execution goes through one [`Recorder`]. It holds the
//! cursor lock across append, live emission and checkpointing, so events are
//! persisted and emitted in exactly the order they were reported.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

use super::stream::{ExecutionEvent, LiveSender};
use super::{ExecutorConfig, ExecutorError};
use crate::persistence::{CheckpointManager, EventStore, WorkflowCheckpoint};
use crate::signal::SignalQueue;
use crate::workflow::{event_types, EventPayload, WorkflowState};

struct Cursor {
    /// Folded state; `last_event_sequence` is the last appended number
    state: WorkflowState,
    /// Events appended by this execution
    event_count: u64,
    /// Agent events appended by this execution
    agent_events: u64,
    last_checkpoint: i64,
    /// First persistence failure; nothing is written after it
    fault: Option<ExecutorError>,
    faulted: bool,
    /// An agent event was refused by the event cap
    limit_reached: bool,
    finished: bool,
    live: Option<LiveSender>,
}

impl Cursor {
    async fn send(&mut self, item: ExecutionEvent) {
        if let Some(tx) = &self.live {
            if tx.send(Ok(item)).await.is_err() {
                debug!("live subscriber gone, execution continues detached");
                self.live = None;
            }
        }
    }
}

pub(crate) struct Recorder {
    workflow_id: String,
    events: Arc<dyn EventStore>,
    checkpoints: Arc<dyn CheckpointManager>,
    signals: Arc<dyn SignalQueue>,
    config: ExecutorConfig,
    cursor: Mutex<Cursor>,
}

impl Recorder {
    pub(crate) fn new(
        events: Arc<dyn EventStore>,
        checkpoints: Arc<dyn CheckpointManager>,
        signals: Arc<dyn SignalQueue>,
        config: ExecutorConfig,
        mut state: WorkflowState,
        live: LiveSender,
    ) -> Self {
        // The cursor carries the fold only
        state.pending_signals.clear();
        Self {
            workflow_id: state.workflow_id.clone(),
            events,
            checkpoints,
            signals,
            config,
            cursor: Mutex::new(Cursor {
                state,
                event_count: 0,
                agent_events: 0,
                last_checkpoint: 0,
                fault: None,
                faulted: false,
                limit_reached: false,
                finished: false,
                live: Some(live),
            }),
        }
    }

    pub(crate) fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub(crate) fn signals(&self) -> &Arc<dyn SignalQueue> {
        &self.signals
    }

    /// Persist, emit and possibly checkpoint one event
    pub(crate) async fn record(&self, payload: EventPayload) -> Result<i64, ExecutorError> {
        let mut cursor = self.cursor.lock().await;
        self.record_locked(&mut cursor, payload).await
    }

    /// Persist `ExecutionCompleted` with the agent event count of this execution
    pub(crate) async fn record_completion(&self) -> Result<i64, ExecutorError> {
        let mut cursor = self.cursor.lock().await;
        let payload = EventPayload::ExecutionCompleted {
            success: true,
            total_events: cursor.agent_events,
        };
        self.record_locked(&mut cursor, payload).await
    }

    /// Emit an item that has no persisted event behind it
    pub(crate) async fn emit_live(&self, item: ExecutionEvent) {
        self.cursor.lock().await.send(item).await;
    }

    /// Checkpoint the terminal state unless the last event already has one
    pub(crate) async fn final_checkpoint(&self) -> Result<(), ExecutorError> {
        let mut cursor = self.cursor.lock().await;
        self.check_writable(&cursor)?;
        if cursor.last_checkpoint == cursor.state.last_event_sequence {
            return Ok(());
        }
        let result = self.checkpoint(&mut cursor, Uuid::now_v7()).await;
        self.latch(&mut cursor, result)
    }

    /// Fold events appended behind the cursor's back
    ///
    /// An agent loop dropped mid-append can leave an event in the store that
    /// the cursor never saw.
    pub(crate) async fn resync(&self) -> Result<(), ExecutorError> {
        let mut cursor = self.cursor.lock().await;
        self.check_writable(&cursor)?;
        let result = self.fold_missing(&mut cursor).await;
        self.latch(&mut cursor, result)
    }

    /// The cap error, once an agent event was refused by it
    pub(crate) async fn limit_reached(&self) -> Option<ExecutorError> {
        self.cursor
            .lock()
            .await
            .limit_reached
            .then(|| self.limit_error())
    }

    /// Snapshot of the running state
    pub(crate) async fn state(&self) -> WorkflowState {
        self.cursor.lock().await.state.clone()
    }

    /// Stop accepting writes and hand back the first persistence failure
    pub(crate) async fn close(&self) -> Option<ExecutorError> {
        let mut cursor = self.cursor.lock().await;
        cursor.finished = true;
        cursor.live = None;
        cursor.fault.take()
    }

    async fn record_locked(
        &self,
        cursor: &mut Cursor,
        payload: EventPayload,
    ) -> Result<i64, ExecutorError> {
        self.check_writable(cursor)?;

        // Lifecycle events pass, so a capped execution can still end
        let is_agent = matches!(payload, EventPayload::Agent(_));
        if is_agent && cursor.state.last_event_sequence >= self.event_cap() {
            cursor.limit_reached = true;
            return Err(self.limit_error());
        }

        let result = self.write(cursor, payload).await;
        self.latch(cursor, result)
    }

    fn event_cap(&self) -> i64 {
        i64::try_from(self.config.max_events_per_workflow).unwrap_or(i64::MAX)
    }

    fn limit_error(&self) -> ExecutorError {
        ExecutorError::TooManyEvents {
            workflow_id: self.workflow_id.clone(),
            limit: self.config.max_events_per_workflow,
        }
    }

    fn check_writable(&self, cursor: &Cursor) -> Result<(), ExecutorError> {
        if cursor.faulted {
            return Err(self.aborted("an earlier write failed"));
        }
        if cursor.finished {
            return Err(self.aborted("execution already finished"));
        }
        Ok(())
    }

    /// Latch a failed write as the execution's fault
    fn latch<T>(&self, cursor: &mut Cursor, result: Result<T, ExecutorError>) -> Result<T, ExecutorError> {
        result.map_err(|e| {
            error!(workflow_id = %self.workflow_id, error = %e, "persistence failure, aborting execution");
            let aborted = self.aborted(&e.to_string());
            cursor.fault = Some(e);
            cursor.faulted = true;
            aborted
        })
    }

    async fn write(&self, cursor: &mut Cursor, payload: EventPayload) -> Result<i64, ExecutorError> {
        let sequence_number = cursor.state.last_event_sequence + 1;
        let is_agent = matches!(payload, EventPayload::Agent(_));
        let live = ExecutionEvent::persisted(&self.workflow_id, &payload, sequence_number);

        let checkpoint_due = (cursor.event_count + 1) % self.config.checkpoint_interval == 0;
        let checkpoint_id = checkpoint_due.then(Uuid::now_v7);

        let mut event = payload.into_event(&self.workflow_id, sequence_number);
        event.checkpoint_id = checkpoint_id;

        self.events.append_event(event.clone()).await?;
        cursor.state.apply(&event)?;
        debug!(sequence_number, event_type = %event.event_type, "persisted event");

        cursor.send(live).await;
        cursor.event_count += 1;
        if is_agent {
            cursor.agent_events += 1;
        }

        if let Some(checkpoint_id) = checkpoint_id {
            self.checkpoint(cursor, checkpoint_id).await?;
        }

        Ok(sequence_number)
    }

    async fn checkpoint(&self, cursor: &mut Cursor, checkpoint_id: Uuid) -> Result<(), ExecutorError> {
        let mut checkpoint = WorkflowCheckpoint::capture(&cursor.state)?;
        checkpoint.id = checkpoint_id;
        let sequence_number = checkpoint.sequence_number;
        let size_bytes = checkpoint.size_bytes;

        self.checkpoints.save(checkpoint).await?;
        cursor.last_checkpoint = sequence_number;

        let pruned = self
            .checkpoints
            .prune_old_checkpoints(&self.workflow_id, self.config.checkpoint_retention)
            .await?;

        debug!(sequence_number, size_bytes, pruned, "checkpoint saved");
        Ok(())
    }

    async fn fold_missing(&self, cursor: &mut Cursor) -> Result<(), ExecutorError> {
        let missing = self
            .events
            .get_events(&self.workflow_id, cursor.state.last_event_sequence + 1, None)
            .await?;

        for event in &missing {
            cursor.state.apply(event)?;
            cursor.event_count += 1;
            if !is_lifecycle(&event.event_type) {
                cursor.agent_events += 1;
            }
        }

        if !missing.is_empty() {
            debug!(count = missing.len(), "folded events missed by the cursor");
        }
        Ok(())
    }

    fn aborted(&self, reason: &str) -> ExecutorError {
        ExecutorError::Aborted {
            workflow_id: self.workflow_id.clone(),
            reason: reason.to_string(),
        }
    }
}

fn is_lifecycle(event_type: &str) -> bool {
    matches!(
        event_type,
        event_types::EXECUTION_STARTED
            | event_types::EXECUTION_COMPLETED
            | event_types::EXECUTION_FAILED
    )
}
