//! Durable agent executor
//!
//! The `DurableAgentExecutor` is responsible for:
//! - Running an agent loop as one durable execution of a workflow
//! - Persisting, streaming and checkpointing the events it reports
//! - Recovering workflow state from checkpoints and the event log
//! - Routing signals to running workflows

use std::collections::HashMap;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use super::context::AgentContext;
use super::recorder::Recorder;
use super::stream::{ExecutionEvent, ExecutionStream, LiveSender};
use super::ExecutorConfig;
use crate::persistence::{
    CheckpointManager, EventStore, InMemoryCheckpointManager, InMemoryEventStore, MetadataReader,
    StoreError, WorkflowCheckpoint,
};
use crate::signal::{InMemorySignalQueue, SignalError, SignalQueue};
use crate::workflow::{AgentEvent, EventPayload, ReplayError, WorkflowSignal, WorkflowState};

/// Errors from executor operations
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Signal error
    #[error("signal error: {0}")]
    Signal(#[from] SignalError),

    /// Persisted events could not be folded
    #[error("replay error: {0}")]
    Replay(#[from] ReplayError),

    /// The agent loop returned an error
    #[error("agent loop failed: {0:#}")]
    AgentLoop(anyhow::Error),

    /// The execution was cancelled
    #[error("execution of workflow {0} was cancelled")]
    Cancelled(String),

    /// A write of this execution failed earlier; nothing more is recorded
    #[error("execution of workflow {workflow_id} aborted: {reason}")]
    Aborted { workflow_id: String, reason: String },

    /// Another execution of the workflow is running in this process
    #[error("workflow {0} is already running")]
    AlreadyRunning(String),

    /// Too many events
    #[error("workflow {workflow_id} reached the limit of {limit} events")]
    TooManyEvents { workflow_id: String, limit: u64 },

    /// Workflow not found
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Workflow already finished
    #[error("workflow {0} already finished")]
    WorkflowCompleted(String),

    /// Caller does not own the workflow
    #[error("{owner_id} may not signal workflow {workflow_id}")]
    Forbidden {
        workflow_id: String,
        owner_id: String,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Outcome of an execution drained with
/// [`run_to_completion`](DurableAgentExecutor::run_to_completion)
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    pub workflow_id: String,

    /// Sequence number of this execution's `ExecutionStarted`
    pub first_sequence_number: i64,

    /// Sequence number of this execution's `ExecutionCompleted`
    pub last_sequence_number: i64,

    /// Agent events persisted by this execution
    pub total_events: u64,

    /// Everything the stream yielded, in order
    pub events: Vec<ExecutionEvent>,
}

/// What [`cleanup_workflow`](DurableAgentExecutor::cleanup_workflow) removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub events: u64,
    pub checkpoints: u64,
    pub signals: u64,
}

/// Executor of durable agent loops
///
/// The executor turns an agent loop into a durable execution: every event the
/// loop reports is appended to the workflow log with the next sequence number
/// before it is streamed, state is checkpointed every
/// [`checkpoint_interval`](ExecutorConfig::checkpoint_interval) events, and a
/// terminal event plus a final checkpoint close the execution.
///
/// Stores are injected; cloning the executor shares them.
///
/// # Example
///
/// ```ignore
/// use durable_agent::prelude::*;
/// use futures::StreamExt;
///
/// let executor = DurableAgentExecutor::in_memory();
///
/// let mut stream = executor.execute_with_durability("w1", "/repo", "fix tests", |ctx| async move {
///     ctx.emit(AgentEvent::IterationStart { current: 1, max: 5 }).await?;
///     Ok(())
/// });
///
/// while let Some(event) = stream.next().await {
///     println!("{:?}", event?);
/// }
/// ```
#[derive(Clone)]
pub struct DurableAgentExecutor {
    events: Arc<dyn EventStore>,
    checkpoints: Arc<dyn CheckpointManager>,
    signals: Arc<dyn SignalQueue>,
    metadata: Option<Arc<dyn MetadataReader>>,
    config: ExecutorConfig,
    /// Cancellation tokens of the executions running in this process
    active: Arc<DashMap<String, CancellationToken>>,
}

impl DurableAgentExecutor {
    /// Create a new executor over the given stores
    pub fn new(
        events: Arc<dyn EventStore>,
        checkpoints: Arc<dyn CheckpointManager>,
        signals: Arc<dyn SignalQueue>,
    ) -> Self {
        Self {
            events,
            checkpoints,
            signals,
            metadata: None,
            config: ExecutorConfig::default(),
            active: Arc::new(DashMap::new()),
        }
    }

    /// Create an executor over fresh in-memory stores
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryCheckpointManager::new()),
            Arc::new(InMemorySignalQueue::new()),
        )
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: ExecutorConfig) -> Result<Self, ExecutorError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Enable ownership checks for [`send_signal_as`](Self::send_signal_as)
    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataReader>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn event_store(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    pub fn checkpoint_manager(&self) -> &Arc<dyn CheckpointManager> {
        &self.checkpoints
    }

    pub fn signal_queue(&self) -> &Arc<dyn SignalQueue> {
        &self.signals
    }

    /// Run `agent_loop` as a durable execution of `workflow_id`
    ///
    /// The returned stream is cold: nothing is read or written until it is
    /// first polled. It yields `Started`, each agent event once it is durable,
    /// then `Completed` or `Failed`. Errors (agent loop failure, cancellation,
    /// persistence failure) end the stream as its last item.
    ///
    /// A workflow that already has events continues its sequence; the running
    /// state is seeded from the latest checkpoint and the log.
    pub fn execute_with_durability<F, Fut>(
        &self,
        workflow_id: impl Into<String>,
        project_path: impl Into<String>,
        task: impl Into<String>,
        agent_loop: F,
    ) -> ExecutionStream
    where
        F: FnOnce(AgentContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let workflow_id = workflow_id.into();
        let project_path = project_path.into();
        let task = task.into();

        let (tx, rx) = mpsc::channel(self.config.event_buffer);
        let cancel = CancellationToken::new();

        let span = info_span!("durable_execution", workflow_id = %workflow_id);
        let executor = self.clone();
        let driver = {
            let workflow_id = workflow_id.clone();
            let cancel = cancel.clone();
            async move {
                let result = executor
                    .drive(workflow_id, project_path, task, agent_loop, cancel, tx.clone())
                    .await;
                if let Err(e) = result {
                    let _ = tx.send(Err(e)).await;
                }
            }
            .instrument(span)
            .boxed()
        };

        ExecutionStream::new(workflow_id, driver, rx, cancel)
    }

    /// Run an execution and drain its stream
    pub async fn run_to_completion<F, Fut>(
        &self,
        workflow_id: impl Into<String>,
        project_path: impl Into<String>,
        task: impl Into<String>,
        agent_loop: F,
    ) -> Result<ExecutionSummary, ExecutorError>
    where
        F: FnOnce(AgentContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut stream = self.execute_with_durability(workflow_id, project_path, task, agent_loop);
        let workflow_id = stream.workflow_id().to_string();

        let mut events = Vec::new();
        while let Some(item) = stream.next().await {
            events.push(item?);
        }

        let (first_sequence_number, last_sequence_number, total_events) =
            match (events.first(), events.last()) {
                (
                    Some(ExecutionEvent::Started {
                        sequence_number: first,
                        ..
                    }),
                    Some(ExecutionEvent::Completed {
                        sequence_number: last,
                        total_events,
                    }),
                ) => (*first, *last, *total_events),
                _ => {
                    return Err(ExecutorError::Aborted {
                        workflow_id,
                        reason: "stream ended without a terminal event".to_string(),
                    })
                }
            };

        Ok(ExecutionSummary {
            workflow_id,
            first_sequence_number,
            last_sequence_number,
            total_events,
            events,
        })
    }

    /// Check if an execution of the workflow is running in this process
    pub fn is_running(&self, workflow_id: &str) -> bool {
        self.active.contains_key(workflow_id)
    }

    /// Cancel the in-process execution of a workflow
    ///
    /// Returns `false` when no execution of it is running here.
    pub fn cancel_execution(&self, workflow_id: &str) -> bool {
        match self.active.get(workflow_id) {
            Some(token) => {
                info!(%workflow_id, "cancelling execution");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait for a signal addressed to a workflow
    pub async fn await_signal(
        &self,
        workflow_id: &str,
        signal_name: &str,
        timeout_ms: u64,
    ) -> Result<WorkflowSignal, ExecutorError> {
        Ok(self
            .signals
            .await_signal(workflow_id, signal_name, timeout_ms)
            .await?)
    }

    /// Enqueue a signal; `data` becomes the opaque payload
    #[instrument(skip(self, data))]
    pub async fn send_signal(
        &self,
        workflow_id: &str,
        signal_name: &str,
        data: HashMap<String, String>,
    ) -> Result<Uuid, ExecutorError> {
        let signal = WorkflowSignal::from_map(workflow_id, signal_name, &data);
        let signal_id = self.signals.enqueue(signal).await?;
        debug!(%signal_id, "signal sent");
        Ok(signal_id)
    }

    /// Enqueue a signal on behalf of `owner_id`
    ///
    /// Rejects unknown workflows, workflows owned by someone else and
    /// workflows whose metadata is already in a terminal status. Requires
    /// [`with_metadata`](Self::with_metadata).
    #[instrument(skip(self, data))]
    pub async fn send_signal_as(
        &self,
        owner_id: &str,
        workflow_id: &str,
        signal_name: &str,
        data: HashMap<String, String>,
    ) -> Result<Uuid, ExecutorError> {
        let Some(metadata) = &self.metadata else {
            return Err(ExecutorError::InvalidConfig(
                "send_signal_as needs a metadata reader".to_string(),
            ));
        };

        let record = metadata
            .get_metadata(workflow_id)
            .await?
            .ok_or_else(|| ExecutorError::WorkflowNotFound(workflow_id.to_string()))?;

        if !record.is_owned_by(owner_id) {
            warn!("signal rejected: caller does not own the workflow");
            return Err(ExecutorError::Forbidden {
                workflow_id: workflow_id.to_string(),
                owner_id: owner_id.to_string(),
            });
        }
        if record.status.is_terminal() {
            return Err(ExecutorError::WorkflowCompleted(workflow_id.to_string()));
        }

        self.send_signal(workflow_id, signal_name, data).await
    }

    /// Reconstruct the current state of a workflow
    ///
    /// Restores the latest checkpoint, folds the events after it and refreshes
    /// the pending signals from the queue. Without a checkpoint the whole log
    /// is folded.
    #[instrument(skip(self))]
    pub async fn recover_state(&self, workflow_id: &str) -> Result<WorkflowState, ExecutorError> {
        let checkpoint = self.checkpoints.get_latest(workflow_id).await?;
        let mut state = self.fold_from(workflow_id, checkpoint, None).await?;

        let pending = self.signals.get_unprocessed_signals(workflow_id).await?;
        state.set_pending_signals(&pending);
        Ok(state)
    }

    /// Reconstruct the state as of just before `sequence_number`
    ///
    /// Folds events `< sequence_number` starting from the latest checkpoint
    /// strictly below it. Pending signals describe the present, not the past,
    /// so they are left empty.
    #[instrument(skip(self))]
    pub async fn recover_state_before(
        &self,
        workflow_id: &str,
        sequence_number: i64,
    ) -> Result<WorkflowState, ExecutorError> {
        let checkpoint = self
            .checkpoints
            .get_latest_before(workflow_id, sequence_number)
            .await?;
        let mut state = self
            .fold_from(workflow_id, checkpoint, Some(sequence_number - 1))
            .await?;

        state.pending_signals.clear();
        Ok(state)
    }

    /// Delete the events, checkpoints and signals of a workflow
    #[instrument(skip(self))]
    pub async fn cleanup_workflow(&self, workflow_id: &str) -> Result<CleanupStats, ExecutorError> {
        if self.is_running(workflow_id) {
            return Err(ExecutorError::AlreadyRunning(workflow_id.to_string()));
        }

        let stats = CleanupStats {
            events: self.events.delete_events(workflow_id).await?,
            checkpoints: self.checkpoints.delete_all(workflow_id).await?,
            signals: self.signals.purge(workflow_id).await?,
        };

        info!(
            events = stats.events,
            checkpoints = stats.checkpoints,
            signals = stats.signals,
            "cleaned up workflow"
        );
        Ok(stats)
    }

    async fn fold_from(
        &self,
        workflow_id: &str,
        checkpoint: Option<WorkflowCheckpoint>,
        to_sequence: Option<i64>,
    ) -> Result<WorkflowState, ExecutorError> {
        let (base, from_sequence) = match checkpoint {
            Some(checkpoint) => {
                debug!(
                    sequence_number = checkpoint.sequence_number,
                    "restoring from checkpoint"
                );
                (
                    self.checkpoints.restore_state(&checkpoint)?,
                    checkpoint.sequence_number + 1,
                )
            }
            None => (WorkflowState::new(workflow_id), 0),
        };

        let events = self
            .events
            .get_events(workflow_id, from_sequence, to_sequence)
            .await?;
        debug!(replayed = events.len(), "folding events");

        Ok(WorkflowState::replay(base, &events)?)
    }

    fn acquire_lease(
        &self,
        workflow_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Lease, ExecutorError> {
        match self.active.entry(workflow_id.to_string()) {
            Entry::Occupied(_) => Err(ExecutorError::AlreadyRunning(workflow_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(cancel.clone());
                Ok(Lease {
                    active: self.active.clone(),
                    workflow_id: workflow_id.to_string(),
                })
            }
        }
    }

    async fn drive<F, Fut>(
        self,
        workflow_id: String,
        project_path: String,
        task: String,
        agent_loop: F,
        cancel: CancellationToken,
        live: LiveSender,
    ) -> Result<(), ExecutorError>
    where
        F: FnOnce(AgentContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let _lease = self.acquire_lease(&workflow_id, &cancel)?;

        let state = self.recover_state(&workflow_id).await?;
        info!(
            resume_after = state.last_event_sequence,
            status = %state.status,
            "starting durable execution"
        );

        let recorder = Arc::new(Recorder::new(
            self.events.clone(),
            self.checkpoints.clone(),
            self.signals.clone(),
            self.config.clone(),
            state,
            live,
        ));

        let result = self
            .run(&recorder, project_path, task, agent_loop, &cancel)
            .await;

        // A persistence failure outranks whatever the loop made of it
        let fault = recorder.close().await;
        result.map_err(|e| fault.unwrap_or(e))
    }

    async fn run<F, Fut>(
        &self,
        recorder: &Arc<Recorder>,
        project_path: String,
        task: String,
        agent_loop: F,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutorError>
    where
        F: FnOnce(AgentContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        recorder
            .record(EventPayload::ExecutionStarted { project_path, task })
            .await?;

        let ctx = AgentContext::new(recorder.clone(), cancel.clone());
        // A panic in the loop is recorded like any other loop failure
        let agent = AssertUnwindSafe(async move { agent_loop(ctx).await }).catch_unwind();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = agent => Some(result.unwrap_or_else(|panic| Err(panic_error(panic)))),
        };

        // A loop that hit the event cap fails with the cap, whatever it returned
        if outcome.is_some() {
            if let Some(limit) = recorder.limit_reached().await {
                let message = limit.to_string();
                warn!(error = %message, "event cap reached");

                recorder
                    .record(EventPayload::ExecutionFailed {
                        error: message.clone(),
                        cancelled: false,
                    })
                    .await?;
                recorder
                    .emit_live(ExecutionEvent::Agent {
                        sequence_number: None,
                        event: AgentEvent::Error { message },
                    })
                    .await;
                recorder.final_checkpoint().await?;
                return Err(limit);
            }
        }

        match outcome {
            Some(Ok(())) => {
                let sequence_number = recorder.record_completion().await?;
                recorder.final_checkpoint().await?;
                info!(sequence_number, "execution completed");
                Ok(())
            }
            Some(Err(error)) => {
                let message = format!("{error:#}");
                warn!(error = %message, "agent loop failed");

                recorder
                    .record(EventPayload::ExecutionFailed {
                        error: message.clone(),
                        cancelled: false,
                    })
                    .await?;
                recorder
                    .emit_live(ExecutionEvent::Agent {
                        sequence_number: None,
                        event: AgentEvent::Error { message },
                    })
                    .await;
                recorder.final_checkpoint().await?;
                Err(ExecutorError::AgentLoop(error))
            }
            None => {
                recorder.resync().await?;
                recorder
                    .record(EventPayload::ExecutionFailed {
                        error: "execution cancelled".to_string(),
                        cancelled: true,
                    })
                    .await?;
                recorder.final_checkpoint().await?;
                info!("execution cancelled");
                Err(ExecutorError::Cancelled(recorder.workflow_id().to_string()))
            }
        }
    }
}

fn panic_error(panic: Box<dyn Any + Send>) -> anyhow::Error {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    anyhow::anyhow!("agent loop panicked: {message}")
}

/// In-process single-writer lease, released on drop
struct Lease {
    active: Arc<DashMap<String, CancellationToken>>,
    workflow_id: String,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.active.remove(&self.workflow_id);
    }
}
