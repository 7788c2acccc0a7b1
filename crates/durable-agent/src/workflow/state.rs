//! Reconstructable workflow state
//!
//! [`WorkflowState`] is a projection of the event log: folding the events of a
//! workflow in sequence order yields the state. It is what checkpoints store,
//! and it is never the source of truth.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::payload::{AgentEvent, EventPayload, ReplayError};
use super::{WorkflowEvent, WorkflowSignal};

/// Tools whose successful results count as edits to the project
pub const EDIT_TOOLS: &[&str] = &[
    "write_file",
    "edit_file",
    "create_file",
    "delete_file",
    "apply_patch",
];

/// Workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// No execution has started yet
    #[default]
    Pending,

    /// An execution is in progress
    Running,

    /// The last execution completed successfully
    Completed,

    /// The last execution failed
    Failed,

    /// The last execution was cancelled
    Cancelled,
}

impl WorkflowStatus {
    /// Whether no further execution is expected without a new start
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown workflow status: {other}")),
        }
    }
}

/// A tool invocation made by the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    /// Sequence number of the `ToolCall` event
    pub sequence_number: i64,
    pub tool_name: String,
    pub params: serde_json::Value,
    /// `None` until the matching `ToolResult` arrives
    pub success: Option<bool>,
}

/// A successful edit to the project made through an edit tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEdit {
    /// Sequence number of the `ToolResult` event
    pub sequence_number: i64,
    pub tool_name: String,
    pub path: Option<String>,
}

/// An unprocessed signal waiting for the workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSignal {
    pub id: Uuid,
    pub signal_name: String,
}

impl From<&WorkflowSignal> for PendingSignal {
    fn from(signal: &WorkflowSignal) -> Self {
        Self {
            id: signal.id,
            signal_name: signal.signal_name.clone(),
        }
    }
}

/// Folded state of a workflow
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub current_iteration: u32,
    pub max_iterations: u32,

    /// Sequence number of the last folded event (0 = nothing folded)
    pub last_event_sequence: i64,

    pub agent_steps: Vec<AgentStep>,
    pub agent_edits: Vec<AgentEdit>,

    /// Snapshot of the signal queue taken by `recover_state`. Folding events
    /// never touches it and checkpoints do not store it.
    #[serde(skip)]
    pub pending_signals: Vec<PendingSignal>,

    /// Message of the most recent `Error` or `ExecutionFailed` event
    #[serde(default)]
    pub last_error: Option<String>,
}

impl WorkflowState {
    /// Empty state for a workflow, before any event
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            ..Default::default()
        }
    }

    /// Fold `events` (ascending) onto `initial`
    pub fn replay<'a>(
        initial: WorkflowState,
        events: impl IntoIterator<Item = &'a WorkflowEvent>,
    ) -> Result<WorkflowState, ReplayError> {
        let mut state = initial;
        for event in events {
            state.apply(event)?;
        }
        Ok(state)
    }

    /// Fold a single event onto the state
    pub fn apply(&mut self, event: &WorkflowEvent) -> Result<(), ReplayError> {
        if event.workflow_id != self.workflow_id {
            return Err(ReplayError::WorkflowMismatch {
                expected: self.workflow_id.clone(),
                actual: event.workflow_id.clone(),
            });
        }
        if event.sequence_number <= self.last_event_sequence {
            return Err(ReplayError::OutOfOrder {
                last: self.last_event_sequence,
                got: event.sequence_number,
            });
        }

        let sequence_number = event.sequence_number;
        match EventPayload::decode(event)? {
            EventPayload::ExecutionStarted { .. } => {
                self.status = WorkflowStatus::Running;
            }
            EventPayload::ExecutionCompleted { .. } => {
                self.status = WorkflowStatus::Completed;
            }
            EventPayload::ExecutionFailed { error, cancelled } => {
                self.status = if cancelled {
                    WorkflowStatus::Cancelled
                } else {
                    WorkflowStatus::Failed
                };
                self.last_error = Some(error);
            }
            EventPayload::Agent(agent_event) => self.apply_agent(sequence_number, agent_event),
        }

        self.last_event_sequence = sequence_number;
        Ok(())
    }

    fn apply_agent(&mut self, sequence_number: i64, event: AgentEvent) {
        match event {
            AgentEvent::IterationStart { current, max } => {
                self.current_iteration = current;
                self.max_iterations = max;
            }
            AgentEvent::ToolCall { tool_name, params } => {
                self.agent_steps.push(AgentStep {
                    sequence_number,
                    tool_name,
                    params,
                    success: None,
                });
            }
            AgentEvent::ToolResult { tool_name, success } => {
                let step = self
                    .agent_steps
                    .iter_mut()
                    .rev()
                    .find(|s| s.tool_name == tool_name && s.success.is_none());

                if let Some(step) = step {
                    step.success = Some(success);
                    if success && EDIT_TOOLS.contains(&tool_name.as_str()) {
                        let path = edit_path(&step.params);
                        self.agent_edits.push(AgentEdit {
                            sequence_number,
                            tool_name,
                            path,
                        });
                    }
                }
            }
            AgentEvent::Error { message } => {
                self.last_error = Some(message);
            }
            // Informational for live subscribers only
            AgentEvent::LlmResponseChunk { .. }
            | AgentEvent::CloneLog { .. }
            | AgentEvent::CloneProgress { .. }
            | AgentEvent::Complete { .. } => {}
        }
    }

    /// Replace the pending-signal snapshot
    pub fn set_pending_signals<'a>(&mut self, signals: impl IntoIterator<Item = &'a WorkflowSignal>) {
        self.pending_signals = signals.into_iter().map(PendingSignal::from).collect();
    }

    /// Number of tool calls still waiting for a result
    pub fn open_steps(&self) -> usize {
        self.agent_steps.iter().filter(|s| s.success.is_none()).count()
    }
}

fn edit_path(params: &serde_json::Value) -> Option<String> {
    ["path", "file_path", "filePath"]
        .iter()
        .find_map(|key| params.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}
