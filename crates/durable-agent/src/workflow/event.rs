//! Workflow events for persistence

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type strings stored in `workflow_events.event_type`
///
/// These are the names consumers (SSE bridges, diagnostics) see. They are part
/// of the persisted format and must never be renamed.
pub mod event_types {
    pub const EXECUTION_STARTED: &str = "ExecutionStarted";
    pub const EXECUTION_COMPLETED: &str = "ExecutionCompleted";
    pub const EXECUTION_FAILED: &str = "ExecutionFailed";
    pub const ITERATION_START: &str = "IterationStart";
    pub const LLM_RESPONSE_CHUNK: &str = "LLMResponseChunk";
    pub const TOOL_CALL: &str = "ToolCall";
    pub const TOOL_RESULT: &str = "ToolResult";
    pub const CLONE_LOG: &str = "CloneLog";
    pub const CLONE_PROGRESS: &str = "CloneProgress";
    pub const ERROR: &str = "Error";
    pub const COMPLETE: &str = "Complete";
}

/// A single entry of a workflow's append-only log
///
/// Events form the authoritative history of a workflow. They are used for:
/// - Replaying workflow state after a restart
/// - Rebuilding state on top of a checkpoint
/// - Auditing and diagnostics
///
/// `(workflow_id, sequence_number)` is unique, and the sequence numbers of a
/// workflow form the contiguous run `1..=N`. Events are immutable once
/// written; they are removed only when the whole workflow is cleaned up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowEvent {
    pub id: Uuid,

    pub workflow_id: String,

    /// Position in the workflow log (1-based). Zero or negative asks the store
    /// to assign the next number.
    pub sequence_number: i64,

    /// One of [`event_types`]
    pub event_type: String,

    /// Structured payload, keyed as documented on [`EventPayload`](super::EventPayload)
    pub event_data: serde_json::Value,

    pub timestamp: DateTime<Utc>,

    /// Checkpoint taken right after this event, if any
    pub checkpoint_id: Option<Uuid>,
}

impl WorkflowEvent {
    /// Create a new event at an explicit sequence number
    pub fn new(
        workflow_id: impl Into<String>,
        sequence_number: i64,
        event_type: impl Into<String>,
        event_data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id: workflow_id.into(),
            sequence_number,
            event_type: event_type.into(),
            event_data,
            timestamp: Utc::now(),
            checkpoint_id: None,
        }
    }

    /// Create an event whose sequence number is assigned by the store on append
    pub fn unsequenced(
        workflow_id: impl Into<String>,
        event_type: impl Into<String>,
        event_data: serde_json::Value,
    ) -> Self {
        Self::new(workflow_id, 0, event_type, event_data)
    }

    /// Whether the store must pick the sequence number
    pub fn needs_sequence(&self) -> bool {
        self.sequence_number <= 0
    }

    /// Check if this event ends an execution
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.event_type.as_str(),
            event_types::EXECUTION_COMPLETED | event_types::EXECUTION_FAILED
        )
    }
}
