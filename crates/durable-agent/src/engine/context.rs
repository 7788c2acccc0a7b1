//! Agent loop execution context

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::recorder::Recorder;
use super::ExecutorError;
use crate::workflow::{AgentEvent, EventPayload, WorkflowSignal, WorkflowState};

/// Context handed to an agent loop
///
/// The context provides:
/// - The event sink: every [`emit`](Self::emit) is persisted before it is
///   streamed to subscribers
/// - Signal access for approvals and user input
/// - Cancellation detection
///
/// # Example
///
/// ```ignore
/// executor.execute_with_durability("w1", "/repo", "fix tests", |ctx| async move {
///     ctx.emit(AgentEvent::IterationStart { current: 1, max: 10 }).await?;
///
///     let approval = ctx.await_signal(signal_types::APPROVAL, 60_000).await?;
///     if approval.data_str("approved") != Some("true") {
///         anyhow::bail!("change rejected");
///     }
///
///     ctx.emit(AgentEvent::Complete { success: true, message: "done".into() }).await?;
///     Ok(())
/// });
/// ```
#[derive(Clone)]
pub struct AgentContext {
    recorder: Arc<Recorder>,
    cancel: CancellationToken,
}

impl AgentContext {
    pub(crate) fn new(recorder: Arc<Recorder>, cancel: CancellationToken) -> Self {
        Self { recorder, cancel }
    }

    /// Workflow this execution belongs to
    pub fn workflow_id(&self) -> &str {
        self.recorder.workflow_id()
    }

    /// Report an agent event, returning its sequence number once it is durable
    ///
    /// An error means the event was not (or not fully) recorded and the
    /// execution is aborting; the loop should stop.
    pub async fn emit(&self, event: AgentEvent) -> Result<i64, ExecutorError> {
        self.recorder.record(EventPayload::Agent(event)).await
    }

    /// Wait for a signal addressed to this workflow
    pub async fn await_signal(
        &self,
        signal_name: &str,
        timeout_ms: u64,
    ) -> Result<WorkflowSignal, ExecutorError> {
        Ok(self
            .recorder
            .signals()
            .await_signal(self.workflow_id(), signal_name, timeout_ms)
            .await?)
    }

    /// Take the oldest pending signal of any name without waiting
    pub async fn poll_signal(&self) -> Result<Option<WorkflowSignal>, ExecutorError> {
        Ok(self.recorder.signals().poll(self.workflow_id()).await?)
    }

    /// State folded from every event recorded so far
    pub async fn state(&self) -> WorkflowState {
        self.recorder.state().await
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled when the execution is cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("workflow_id", &self.workflow_id())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
