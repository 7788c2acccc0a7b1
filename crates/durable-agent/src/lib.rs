//! # Durable Agent Execution Engine
//!
//! Runs a long-lived agent loop as a replayable, checkpointable,
//! signal-responsive workflow. An execution survives process restarts and
//! client disconnects without losing or duplicating recorded events.
//!
//! ## Features
//!
//! - **Event-sourced workflows**: every agent event is appended to a per-workflow
//!   sequenced log before anyone sees it
//! - **Checkpoints**: the folded [`WorkflowState`] is snapshotted every few events
//!   and on termination, so recovery replays only the tail of the log
//! - **Signals**: approvals, user input and cancellation reach a running loop
//!   through a named, per-workflow mailbox with timed awaits
//! - **Live streaming**: each execution is a stream of durable events
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   DurableAgentExecutor                       │
//! │  (drives the agent loop, sequences, streams, checkpoints)   │
//! └─────────────────────────────────────────────────────────────┘
//!          │                      │                     │
//!          ▼                      ▼                     ▼
//! ┌─────────────────┐  ┌────────────────────┐  ┌─────────────────┐
//! │   EventStore    │  │ CheckpointManager  │  │   SignalQueue   │
//! │ (workflow_events│  │(workflow_checkpts) │  │(workflow_signals│
//! └─────────────────┘  └────────────────────┘  └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use durable_agent::prelude::*;
//!
//! let executor = DurableAgentExecutor::in_memory();
//!
//! let summary = executor
//!     .run_to_completion("w1", "/repo", "fix the failing test", |ctx| async move {
//!         ctx.emit(AgentEvent::IterationStart { current: 1, max: 3 }).await?;
//!         ctx.emit(AgentEvent::ToolCall {
//!             tool_name: "read_file".into(),
//!             params: json!({"path": "src/lib.rs"}),
//!         })
//!         .await?;
//!         ctx.emit(AgentEvent::ToolResult { tool_name: "read_file".into(), success: true })
//!             .await?;
//!         Ok(())
//!     })
//!     .await?;
//!
//! let state = executor.recover_state("w1").await?;
//! assert_eq!(state.status, WorkflowStatus::Completed);
//! ```

pub mod engine;
pub mod persistence;
pub mod signal;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::engine::{
        AgentContext, DurableAgentExecutor, ExecutionEvent, ExecutionStream, ExecutionSummary,
        ExecutorConfig, ExecutorError,
    };
    pub use crate::persistence::{
        CheckpointManager, EventStore, InMemoryCheckpointManager, InMemoryEventStore,
        MetadataReader, PostgresWorkflowStore, StoreError, WorkflowCheckpoint,
    };
    pub use crate::signal::{InMemorySignalQueue, PostgresSignalQueue, SignalError, SignalQueue};
    pub use crate::workflow::{
        signal_types, AgentEvent, WorkflowEvent, WorkflowSignal, WorkflowState, WorkflowStatus,
    };
    pub use serde_json::json;
}

// Re-export key types at crate root
pub use engine::{
    AgentContext, CleanupStats, DurableAgentExecutor, ExecutionEvent, ExecutionStream,
    ExecutionSummary, ExecutorConfig, ExecutorError,
};
pub use persistence::{
    CheckpointManager, EventStore, InMemoryCheckpointManager, InMemoryEventStore,
    InMemoryMetadataStore, MetadataReader, PostgresWorkflowStore, StoreError, WorkflowCheckpoint,
};
pub use signal::{InMemorySignalQueue, PostgresSignalQueue, SignalError, SignalQueue};
pub use workflow::{
    event_types, signal_types, AgentEvent, EventPayload, ReplayError, WorkflowEvent,
    WorkflowMetadata, WorkflowSignal, WorkflowState, WorkflowStatus,
};
