//! Workflow data model
//!
//! This module contains the types shared by every component:
//! - [`WorkflowEvent`] the persisted log entry
//! - [`AgentEvent`] / [`EventPayload`] the event taxonomy and its mapping
//! - [`WorkflowState`] the folded, checkpointable projection of the log
//! - [`WorkflowSignal`] for external communication
//! - [`WorkflowMetadata`] owned by the surrounding service

mod event;
mod metadata;
mod payload;
mod signal;
mod state;

pub use event::{event_types, WorkflowEvent};
pub use metadata::WorkflowMetadata;
pub use payload::{AgentEvent, EventPayload, ReplayError};
pub use signal::{signal_types, WorkflowSignal};
pub use state::{
    AgentEdit, AgentStep, PendingSignal, WorkflowState, WorkflowStatus, EDIT_TOOLS,
};
