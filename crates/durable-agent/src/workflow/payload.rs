//! Agent events and their persisted form
//!
//! [`AgentEvent`] is what a running agent loop reports. [`EventPayload`] is the
//! closed set of everything the executor writes to the log: the agent events
//! plus the execution lifecycle markers. Both directions of the mapping are
//! written as `match` expressions without a wildcard arm, so adding a variant
//! does not compile until its persisted form exists.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::event::{event_types, WorkflowEvent};

/// Error decoding or folding persisted events
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ReplayError {
    /// The log contains a type this build does not know
    #[error("unknown event type '{event_type}' at sequence {sequence_number}")]
    UnknownEventType {
        event_type: String,
        sequence_number: i64,
    },

    /// A known type with a payload that does not match its schema
    #[error("malformed {event_type} payload at sequence {sequence_number}: {reason}")]
    MalformedPayload {
        event_type: String,
        sequence_number: i64,
        reason: String,
    },

    /// An event from another workflow was folded into this state
    #[error("event for workflow '{actual}' folded into state of '{expected}'")]
    WorkflowMismatch { expected: String, actual: String },

    /// Events were folded out of order
    #[error("out of order event: expected sequence > {last}, got {got}")]
    OutOfOrder { last: i64, got: i64 },
}

/// Events reported by the agent loop
///
/// These are forwarded unchanged to live subscribers and persisted through
/// [`EventPayload::Agent`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A new reasoning iteration began
    IterationStart { current: u32, max: u32 },

    /// A streamed piece of model output
    LlmResponseChunk { chunk: String },

    /// The agent invoked a tool
    ToolCall {
        tool_name: String,
        params: serde_json::Value,
    },

    /// A tool invocation finished
    ToolResult { tool_name: String, success: bool },

    /// Output line of a repository clone
    CloneLog { message: String, is_error: bool },

    /// Clone progress, `progress` in percent (0-100)
    CloneProgress { stage: String, progress: u8 },

    /// The agent hit an error it reports but may recover from
    Error { message: String },

    /// The agent declared its task finished
    Complete { success: bool, message: String },
}

impl AgentEvent {
    /// Persisted event type of this variant
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::IterationStart { .. } => event_types::ITERATION_START,
            Self::LlmResponseChunk { .. } => event_types::LLM_RESPONSE_CHUNK,
            Self::ToolCall { .. } => event_types::TOOL_CALL,
            Self::ToolResult { .. } => event_types::TOOL_RESULT,
            Self::CloneLog { .. } => event_types::CLONE_LOG,
            Self::CloneProgress { .. } => event_types::CLONE_PROGRESS,
            Self::Error { .. } => event_types::ERROR,
            Self::Complete { .. } => event_types::COMPLETE,
        }
    }

    /// Persisted payload of this variant
    pub fn event_data(&self) -> serde_json::Value {
        match self {
            Self::IterationStart { current, max } => json!({ "current": current, "max": max }),
            Self::LlmResponseChunk { chunk } => json!({ "chunk": chunk }),
            Self::ToolCall { tool_name, params } => {
                json!({ "toolName": tool_name, "params": params })
            }
            Self::ToolResult { tool_name, success } => {
                json!({ "toolName": tool_name, "success": success })
            }
            Self::CloneLog { message, is_error } => {
                json!({ "message": message, "isError": is_error })
            }
            Self::CloneProgress { stage, progress } => {
                json!({ "stage": stage, "progress": progress })
            }
            Self::Error { message } => json!({ "message": message }),
            Self::Complete { success, message } => {
                json!({ "success": success, "message": message })
            }
        }
    }
}

/// Everything the executor writes to a workflow log
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// `ExecutionStarted {projectPath, task}`
    ExecutionStarted { project_path: String, task: String },

    /// `ExecutionCompleted {success, totalEvents}`; `total_events` counts the
    /// agent events persisted by the execution
    ExecutionCompleted { success: bool, total_events: u64 },

    /// `ExecutionFailed {error, cancelled}`
    ExecutionFailed { error: String, cancelled: bool },

    /// One of the agent event types
    Agent(AgentEvent),
}

impl EventPayload {
    /// Persisted event type
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ExecutionStarted { .. } => event_types::EXECUTION_STARTED,
            Self::ExecutionCompleted { .. } => event_types::EXECUTION_COMPLETED,
            Self::ExecutionFailed { .. } => event_types::EXECUTION_FAILED,
            Self::Agent(event) => event.event_type(),
        }
    }

    /// Persisted payload
    pub fn event_data(&self) -> serde_json::Value {
        match self {
            Self::ExecutionStarted { project_path, task } => {
                json!({ "projectPath": project_path, "task": task })
            }
            Self::ExecutionCompleted {
                success,
                total_events,
            } => json!({ "success": success, "totalEvents": total_events }),
            Self::ExecutionFailed { error, cancelled } => {
                json!({ "error": error, "cancelled": cancelled })
            }
            Self::Agent(event) => event.event_data(),
        }
    }

    /// Build the log entry for this payload at `sequence_number`
    pub fn into_event(self, workflow_id: &str, sequence_number: i64) -> WorkflowEvent {
        WorkflowEvent::new(
            workflow_id,
            sequence_number,
            self.event_type(),
            self.event_data(),
        )
    }

    /// Decode a persisted event
    ///
    /// Unknown event types are an error: silently skipping them would make a
    /// replayed state diverge from the one that was checkpointed.
    pub fn decode(event: &WorkflowEvent) -> Result<Self, ReplayError> {
        let fields = Fields { event };

        let payload = match event.event_type.as_str() {
            event_types::EXECUTION_STARTED => Self::ExecutionStarted {
                project_path: fields.get("projectPath")?,
                task: fields.get("task")?,
            },
            event_types::EXECUTION_COMPLETED => Self::ExecutionCompleted {
                success: fields.get("success")?,
                total_events: fields.get("totalEvents")?,
            },
            event_types::EXECUTION_FAILED => Self::ExecutionFailed {
                error: fields.get("error")?,
                cancelled: fields.get_or_default("cancelled")?,
            },
            event_types::ITERATION_START => Self::Agent(AgentEvent::IterationStart {
                current: fields.get("current")?,
                max: fields.get("max")?,
            }),
            event_types::LLM_RESPONSE_CHUNK => Self::Agent(AgentEvent::LlmResponseChunk {
                chunk: fields.get("chunk")?,
            }),
            event_types::TOOL_CALL => Self::Agent(AgentEvent::ToolCall {
                tool_name: fields.get("toolName")?,
                params: fields.get_or_default("params")?,
            }),
            event_types::TOOL_RESULT => Self::Agent(AgentEvent::ToolResult {
                tool_name: fields.get("toolName")?,
                success: fields.get("success")?,
            }),
            event_types::CLONE_LOG => Self::Agent(AgentEvent::CloneLog {
                message: fields.get("message")?,
                is_error: fields.get_or_default("isError")?,
            }),
            event_types::CLONE_PROGRESS => Self::Agent(AgentEvent::CloneProgress {
                stage: fields.get("stage")?,
                progress: fields.get("progress")?,
            }),
            event_types::ERROR => Self::Agent(AgentEvent::Error {
                message: fields.get("message")?,
            }),
            event_types::COMPLETE => Self::Agent(AgentEvent::Complete {
                success: fields.get("success")?,
                message: fields.get_or_default("message")?,
            }),
            other => {
                return Err(ReplayError::UnknownEventType {
                    event_type: other.to_string(),
                    sequence_number: event.sequence_number,
                })
            }
        };

        Ok(payload)
    }
}

impl From<AgentEvent> for EventPayload {
    fn from(event: AgentEvent) -> Self {
        Self::Agent(event)
    }
}

/// Typed access to the keys of an event payload
struct Fields<'a> {
    event: &'a WorkflowEvent,
}

impl Fields<'_> {
    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, ReplayError> {
        let value = self
            .event
            .event_data
            .get(key)
            .ok_or_else(|| self.malformed(format!("missing key '{key}'")))?;
        serde_json::from_value(value.clone())
            .map_err(|e| self.malformed(format!("key '{key}': {e}")))
    }

    fn get_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, ReplayError> {
        match self.event.event_data.get(key) {
            None | Some(serde_json::Value::Null) => Ok(T::default()),
            Some(_) => self.get(key),
        }
    }

    fn malformed(&self, reason: String) -> ReplayError {
        ReplayError::MalformedPayload {
            event_type: self.event.event_type.clone(),
            sequence_number: self.event.sequence_number,
            reason,
        }
    }
}
