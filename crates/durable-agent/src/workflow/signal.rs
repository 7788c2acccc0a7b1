//! Workflow signals for external communication

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// External input addressed to a running workflow
///
/// Signals let callers outside the agent loop (a user approving a tool call,
/// an operator cancelling a run) talk to a running workflow. The agent loop
/// picks them up with `await_signal` or `poll`.
///
/// # Example
///
/// ```ignore
/// let signal = WorkflowSignal::new("w1", signal_types::APPROVAL, json!({"approved": "true"}));
/// queue.enqueue(signal).await?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSignal {
    pub id: Uuid,

    /// Workflow the signal is addressed to
    pub workflow_id: String,

    /// Name matched by `await_signal`
    pub signal_name: String,

    /// Opaque payload, never interpreted by the engine
    pub signal_data: serde_json::Value,

    /// When the signal was enqueued
    pub received_at: DateTime<Utc>,

    /// When the signal was delivered or explicitly marked processed
    pub processed_at: Option<DateTime<Utc>>,
}

impl WorkflowSignal {
    /// Create a new, unprocessed signal
    pub fn new(
        workflow_id: impl Into<String>,
        signal_name: impl Into<String>,
        signal_data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id: workflow_id.into(),
            signal_name: signal_name.into(),
            signal_data,
            received_at: Utc::now(),
            processed_at: None,
        }
    }

    /// Create a signal from the string map external callers submit
    pub fn from_map(
        workflow_id: impl Into<String>,
        signal_name: impl Into<String>,
        data: &HashMap<String, String>,
    ) -> Self {
        let payload = data
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect::<serde_json::Map<_, _>>();
        Self::new(workflow_id, signal_name, serde_json::Value::Object(payload))
    }

    /// Create a cancellation signal
    pub fn cancel(workflow_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            workflow_id,
            signal_types::CANCEL,
            serde_json::json!({ "reason": reason.into() }),
        )
    }

    /// Check if the signal was already delivered
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    /// Check if this is a cancellation signal
    pub fn is_cancel(&self) -> bool {
        self.signal_name == signal_types::CANCEL
    }

    /// Read a string value from the payload
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.signal_data.get(key).and_then(|v| v.as_str())
    }

    /// Stamp the signal as delivered, keeping the first timestamp
    pub(crate) fn mark_processed(&mut self, at: DateTime<Utc>) {
        if self.processed_at.is_none() {
            self.processed_at = Some(at);
        }
    }
}

/// Common signal name constants
pub mod signal_types {
    /// A user approved (or rejected) a pending agent action
    pub const APPROVAL: &str = "approval";

    /// Request workflow cancellation
    pub const CANCEL: &str = "cancel";

    /// Free-form user input injected into a running loop
    pub const USER_INPUT: &str = "user_input";
}
