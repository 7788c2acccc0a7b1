//! Per-workflow signal mailbox
//!
//! Signals are how the world outside an agent loop talks to it: approvals,
//! user input, cancellation. Each workflow has a FIFO mailbox; the agent loop
//! takes signals out with [`SignalQueue::poll`] or blocks on a name with
//! [`SignalQueue::await_signal`].

mod memory;
mod postgres;
mod queue;

pub use memory::InMemorySignalQueue;
pub use postgres::{PostgresSignalQueue, DEFAULT_POLL_INTERVAL};
pub use queue::{SignalError, SignalQueue};
