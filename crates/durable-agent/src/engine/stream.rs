//! Live event stream of one execution

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::ExecutorError;
use crate::workflow::{AgentEvent, EventPayload};

pub(crate) type LiveSender = mpsc::Sender<Result<ExecutionEvent, ExecutorError>>;

/// What a subscriber of an execution sees
///
/// The original agent events plus lifecycle markers, in persistence order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// `ExecutionStarted` was persisted
    Started {
        workflow_id: String,
        sequence_number: i64,
        project_path: String,
        task: String,
    },

    /// An agent event
    ///
    /// `sequence_number` is `None` only for the terminal `Error` re-emitted
    /// after a failed agent loop, which is not persisted on its own.
    Agent {
        sequence_number: Option<i64>,
        event: AgentEvent,
    },

    /// `ExecutionCompleted` was persisted
    Completed {
        sequence_number: i64,
        total_events: u64,
    },

    /// `ExecutionFailed` was persisted
    Failed {
        sequence_number: i64,
        error: String,
        cancelled: bool,
    },
}

impl ExecutionEvent {
    pub(crate) fn persisted(workflow_id: &str, payload: &EventPayload, sequence_number: i64) -> Self {
        match payload {
            EventPayload::ExecutionStarted { project_path, task } => Self::Started {
                workflow_id: workflow_id.to_string(),
                sequence_number,
                project_path: project_path.clone(),
                task: task.clone(),
            },
            EventPayload::ExecutionCompleted { total_events, .. } => Self::Completed {
                sequence_number,
                total_events: *total_events,
            },
            EventPayload::ExecutionFailed { error, cancelled } => Self::Failed {
                sequence_number,
                error: error.clone(),
                cancelled: *cancelled,
            },
            EventPayload::Agent(event) => Self::Agent {
                sequence_number: Some(sequence_number),
                event: event.clone(),
            },
        }
    }

    /// Sequence number of the persisted event behind this item
    pub fn sequence_number(&self) -> Option<i64> {
        match self {
            Self::Started {
                sequence_number, ..
            }
            | Self::Completed {
                sequence_number, ..
            }
            | Self::Failed {
                sequence_number, ..
            } => Some(*sequence_number),
            Self::Agent {
                sequence_number, ..
            } => *sequence_number,
        }
    }

    /// Check if this is the last item of a successful or failed execution
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Cold, single-subscriber stream of an execution
///
/// Nothing runs until the stream is first polled. From then on the execution
/// runs on its own task: dropping the stream detaches it, and it still runs
/// to a terminal event. An error ends the stream as its last item.
pub struct ExecutionStream {
    workflow_id: String,
    driver: Option<BoxFuture<'static, ()>>,
    rx: mpsc::Receiver<Result<ExecutionEvent, ExecutorError>>,
    cancel: CancellationToken,
}

impl ExecutionStream {
    pub(crate) fn new(
        workflow_id: String,
        driver: BoxFuture<'static, ()>,
        rx: mpsc::Receiver<Result<ExecutionEvent, ExecutorError>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            workflow_id,
            driver: Some(driver),
            rx,
            cancel,
        }
    }

    /// Workflow this execution belongs to
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Whether the execution was started by polling the stream
    pub fn is_started(&self) -> bool {
        self.driver.is_none()
    }

    /// Token that cancels this execution
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cancellation; the stream still yields the `Failed` marker
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for ExecutionStream {
    type Item = Result<ExecutionEvent, ExecutorError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(driver) = self.driver.take() {
            tokio::spawn(driver);
        }
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for ExecutionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionStream")
            .field("workflow_id", &self.workflow_id)
            .field("started", &self.is_started())
            .finish()
    }
}
