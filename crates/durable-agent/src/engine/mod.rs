//! Durable execution engine
//!
//! The engine module provides the [`DurableAgentExecutor`], which runs an
//! agent loop as a durable execution: persisted, streamed, checkpointed and
//! recoverable.

mod config;
mod context;
mod executor;
mod recorder;
mod stream;

pub use config::{ExecutorConfig, DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_CHECKPOINT_RETENTION};
pub use context::AgentContext;
pub use executor::{CleanupStats, DurableAgentExecutor, ExecutionSummary, ExecutorError};
pub use stream::{ExecutionEvent, ExecutionStream};
