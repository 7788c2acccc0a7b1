//! Persistence layer for durable execution
//!
//! This module provides:
//! - [`EventStore`] the append-only, per-workflow sequenced log
//! - [`CheckpointManager`] snapshots of folded state
//! - [`MetadataReader`] read access to externally owned workflow metadata
//! - In-memory implementations for tests and single-process use
//! - [`PostgresWorkflowStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::{InMemoryCheckpointManager, InMemoryEventStore, InMemoryMetadataStore};
pub use postgres::PostgresWorkflowStore;
pub use store::{
    CheckpointManager, EventStore, MetadataReader, StoreError, WorkflowCheckpoint,
    DEFAULT_KEEP_CHECKPOINTS,
};
