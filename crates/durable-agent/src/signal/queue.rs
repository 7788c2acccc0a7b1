//! Signal queue trait

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::persistence::StoreError;
use crate::workflow::WorkflowSignal;

/// Error type for signal operations
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SignalError {
    /// No matching signal arrived in time
    #[error("timed out after {timeout_ms}ms waiting for signal '{signal_name}' on workflow {workflow_id}")]
    Timeout {
        workflow_id: String,
        signal_name: String,
        timeout_ms: u64,
    },

    /// Backing store failure
    #[error("signal store error: {0}")]
    Store(#[from] StoreError),
}

/// Named, per-workflow mailbox with blocking awaits
///
/// Delivery is at most once: [`poll`](Self::poll) and
/// [`await_signal`](Self::await_signal) claim the signal they return, so two
/// waiters never receive the same signal.
#[async_trait]
pub trait SignalQueue: Send + Sync + 'static {
    /// Store a signal and wake the workflow's waiters
    async fn enqueue(&self, signal: WorkflowSignal) -> Result<Uuid, SignalError>;

    /// Atomically take the oldest unprocessed signal, optionally of one name
    async fn claim(
        &self,
        workflow_id: &str,
        signal_name: Option<&str>,
    ) -> Result<Option<WorkflowSignal>, SignalError>;

    /// Unprocessed signals, oldest first (snapshot, nothing is claimed)
    async fn get_unprocessed_signals(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<WorkflowSignal>, SignalError>;

    /// Mark a signal processed; marking twice keeps the first timestamp
    async fn mark_as_processed(&self, signal_id: Uuid) -> Result<(), SignalError>;

    /// Remove every signal of a workflow, returning how many were removed
    async fn purge(&self, workflow_id: &str) -> Result<u64, SignalError>;

    /// Wake-up handle shared by the waiters of one workflow
    fn notifier(&self, workflow_id: &str) -> Arc<Notify>;

    /// Drop the workflow's wake-up handle unless a waiter still holds it
    fn release_notifier(&self, workflow_id: &str);

    /// How often waiters re-check the backing store without a wake-up
    ///
    /// `None` when every enqueue goes through this instance and notifies.
    /// Stores shared between processes return the interval at which other
    /// writers' signals are picked up.
    fn recheck_interval(&self) -> Option<Duration> {
        None
    }

    /// Non-blocking: take the oldest unprocessed signal of any name
    async fn poll(&self, workflow_id: &str) -> Result<Option<WorkflowSignal>, SignalError> {
        self.claim(workflow_id, None).await
    }

    /// Wait for a signal named `signal_name`
    ///
    /// Returns at once when a matching signal is already queued. Otherwise
    /// suspends until one is enqueued or `timeout_ms` elapses. A signal that
    /// arrives after the timeout stays queued for a later call.
    async fn await_signal(
        &self,
        workflow_id: &str,
        signal_name: &str,
        timeout_ms: u64,
    ) -> Result<WorkflowSignal, SignalError> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);

        let outcome = loop {
            // Looked up on every pass: a purge may have replaced the handle
            let notify = self.notifier(workflow_id);

            // Register before checking so an enqueue between the check and
            // the wait is not missed
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // The claim itself is never cut short by the deadline
            match self.claim(workflow_id, Some(signal_name)).await {
                Ok(Some(signal)) => break Ok(signal),
                Ok(None) => {}
                Err(e) => break Err(e),
            }

            let woken = match self.recheck_interval() {
                Some(interval) => {
                    let recheck_at = (tokio::time::Instant::now() + interval).min(deadline);
                    tokio::select! {
                        _ = &mut notified => true,
                        _ = tokio::time::sleep_until(recheck_at) => recheck_at < deadline,
                    }
                }
                None => tokio::time::timeout_at(deadline, &mut notified).await.is_ok(),
            };

            if !woken {
                break Err(SignalError::Timeout {
                    workflow_id: workflow_id.to_string(),
                    signal_name: signal_name.to_string(),
                    timeout_ms,
                });
            }
        };

        self.release_notifier(workflow_id);

        match &outcome {
            Ok(signal) => {
                debug!(%workflow_id, %signal_name, signal_id = %signal.id, "signal delivered")
            }
            Err(SignalError::Timeout { .. }) => {
                debug!(%workflow_id, %signal_name, timeout_ms, "signal wait timed out")
            }
            Err(_) => {}
        }
        outcome
    }
}
