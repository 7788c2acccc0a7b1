//! In-memory signal queue

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use super::queue::{SignalError, SignalQueue};
use crate::workflow::WorkflowSignal;

#[derive(Default)]
struct Mailboxes {
    /// Signals per workflow in arrival order
    by_workflow: HashMap<String, Vec<WorkflowSignal>>,
    /// Signal id -> workflow id
    index: HashMap<Uuid, String>,
}

/// In-memory implementation of [`SignalQueue`]
///
/// Every enqueue goes through the instance, so waiters are woken directly
/// and never re-check on a timer.
#[derive(Default)]
pub struct InMemorySignalQueue {
    mailboxes: RwLock<Mailboxes>,
    notifiers: DashMap<String, Arc<Notify>>,
}

impl InMemorySignalQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Every signal of a workflow, processed or not, in arrival order
    pub fn all_signals(&self, workflow_id: &str) -> Vec<WorkflowSignal> {
        self.mailboxes
            .read()
            .by_workflow
            .get(workflow_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SignalQueue for InMemorySignalQueue {
    async fn enqueue(&self, signal: WorkflowSignal) -> Result<Uuid, SignalError> {
        let signal_id = signal.id;
        let workflow_id = signal.workflow_id.clone();

        {
            let mut mailboxes = self.mailboxes.write();
            mailboxes.index.insert(signal_id, workflow_id.clone());
            mailboxes
                .by_workflow
                .entry(workflow_id.clone())
                .or_default()
                .push(signal);
        }

        if let Some(notify) = self.notifiers.get(&workflow_id) {
            notify.notify_waiters();
        }

        debug!(%workflow_id, %signal_id, "enqueued signal");
        Ok(signal_id)
    }

    async fn claim(
        &self,
        workflow_id: &str,
        signal_name: Option<&str>,
    ) -> Result<Option<WorkflowSignal>, SignalError> {
        let mut mailboxes = self.mailboxes.write();
        let Some(signals) = mailboxes.by_workflow.get_mut(workflow_id) else {
            return Ok(None);
        };

        let claimed = signals
            .iter_mut()
            .filter(|s| !s.is_processed())
            .find(|s| signal_name.map_or(true, |name| s.signal_name == name))
            .map(|s| {
                s.mark_processed(Utc::now());
                s.clone()
            });

        Ok(claimed)
    }

    async fn get_unprocessed_signals(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<WorkflowSignal>, SignalError> {
        Ok(self
            .mailboxes
            .read()
            .by_workflow
            .get(workflow_id)
            .map(|signals| {
                signals
                    .iter()
                    .filter(|s| !s.is_processed())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn mark_as_processed(&self, signal_id: Uuid) -> Result<(), SignalError> {
        let mut mailboxes = self.mailboxes.write();
        let Some(workflow_id) = mailboxes.index.get(&signal_id).cloned() else {
            debug!(%signal_id, "mark_as_processed on unknown signal");
            return Ok(());
        };

        if let Some(signal) = mailboxes
            .by_workflow
            .get_mut(&workflow_id)
            .and_then(|signals| signals.iter_mut().find(|s| s.id == signal_id))
        {
            signal.mark_processed(Utc::now());
        }
        Ok(())
    }

    async fn purge(&self, workflow_id: &str) -> Result<u64, SignalError> {
        let mut mailboxes = self.mailboxes.write();
        let removed = mailboxes.by_workflow.remove(workflow_id).unwrap_or_default();
        for signal in &removed {
            mailboxes.index.remove(&signal.id);
        }
        self.release_notifier(workflow_id);
        Ok(removed.len() as u64)
    }

    fn notifier(&self, workflow_id: &str) -> Arc<Notify> {
        self.notifiers
            .entry(workflow_id.to_string())
            .or_default()
            .clone()
    }

    fn release_notifier(&self, workflow_id: &str) {
        self.notifiers
            .remove_if(workflow_id, |_, notify| Arc::strong_count(notify) == 1);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::workflow::signal_types;
    use serde_json::json;

    #[tokio::test]
    async fn test_poll_is_fifo_across_names() {
        let queue = InMemorySignalQueue::new();
        let first = queue
            .enqueue(WorkflowSignal::new("w1", signal_types::APPROVAL, json!({})))
            .await
            .unwrap();
        let second = queue
            .enqueue(WorkflowSignal::new("w1", signal_types::USER_INPUT, json!({})))
            .await
            .unwrap();

        assert_eq!(queue.poll("w1").await.unwrap().unwrap().id, first);
        assert_eq!(queue.poll("w1").await.unwrap().unwrap().id, second);
        assert!(queue.poll("w1").await.unwrap().is_none());
        assert!(queue.poll("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_await_returns_queued_signal_immediately() {
        let queue = InMemorySignalQueue::new();
        queue
            .enqueue(WorkflowSignal::new(
                "w1",
                signal_types::APPROVAL,
                json!({"approved": "true"}),
            ))
            .await
            .unwrap();

        let signal = queue
            .await_signal("w1", signal_types::APPROVAL, 10)
            .await
            .expect("queued signal should be returned");

        assert_eq!(signal.data_str("approved"), Some("true"));
        assert!(signal.is_processed());
        assert!(queue.get_unprocessed_signals("w1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_await_wakes_on_enqueue() {
        let queue = Arc::new(InMemorySignalQueue::new());

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.await_signal("w1", signal_types::APPROVAL, 5_000).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue
            .enqueue(WorkflowSignal::new("w1", signal_types::APPROVAL, json!({})))
            .await
            .unwrap();

        let signal = waiter.await.unwrap().expect("waiter should be woken");
        assert_eq!(signal.signal_name, signal_types::APPROVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_times_out_and_keeps_late_signal() {
        let queue = InMemorySignalQueue::new();

        let result = queue.await_signal("w1", signal_types::APPROVAL, 100).await;
        assert_eq!(
            result,
            Err(SignalError::Timeout {
                workflow_id: "w1".to_string(),
                signal_name: signal_types::APPROVAL.to_string(),
                timeout_ms: 100,
            })
        );

        queue
            .enqueue(WorkflowSignal::new("w1", signal_types::APPROVAL, json!({})))
            .await
            .unwrap();
        assert!(queue.poll("w1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_waiters_on_different_names_do_not_steal() {
        let queue = Arc::new(InMemorySignalQueue::new());

        let approval = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.await_signal("w1", signal_types::APPROVAL, 5_000).await })
        };
        let input = {
            let queue = queue.clone();
            tokio::spawn(
                async move { queue.await_signal("w1", signal_types::USER_INPUT, 5_000).await },
            )
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue
            .enqueue(WorkflowSignal::new("w1", signal_types::USER_INPUT, json!({"text": "hi"})))
            .await
            .unwrap();
        queue
            .enqueue(WorkflowSignal::new("w1", signal_types::APPROVAL, json!({})))
            .await
            .unwrap();

        let input = input.await.unwrap().unwrap();
        let approval = approval.await.unwrap().unwrap();
        assert_eq!(input.signal_name, signal_types::USER_INPUT);
        assert_eq!(input.data_str("text"), Some("hi"));
        assert_eq!(approval.signal_name, signal_types::APPROVAL);
    }

    #[tokio::test]
    async fn test_same_name_waiters_each_get_one_signal() {
        let queue = Arc::new(InMemorySignalQueue::new());

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(
                    async move { queue.await_signal("w1", signal_types::APPROVAL, 5_000).await },
                )
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        for _ in 0..2 {
            queue
                .enqueue(WorkflowSignal::new("w1", signal_types::APPROVAL, json!({})))
                .await
                .unwrap();
        }

        let mut ids = Vec::new();
        for waiter in waiters {
            ids.push(waiter.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn test_mark_as_processed_is_idempotent() {
        let queue = InMemorySignalQueue::new();
        let id = queue
            .enqueue(WorkflowSignal::new("w1", signal_types::APPROVAL, json!({})))
            .await
            .unwrap();

        queue.mark_as_processed(id).await.unwrap();
        let first = queue.all_signals("w1")[0].processed_at;
        queue.mark_as_processed(id).await.unwrap();

        assert!(first.is_some());
        assert_eq!(queue.all_signals("w1")[0].processed_at, first);
        assert!(queue.poll("w1").await.unwrap().is_none());

        // Unknown ids are a no-op
        queue.mark_as_processed(Uuid::now_v7()).await.unwrap();
    }

    #[tokio::test]
    async fn test_purge() {
        let queue = InMemorySignalQueue::new();
        for _ in 0..3 {
            queue
                .enqueue(WorkflowSignal::new("w1", signal_types::APPROVAL, json!({})))
                .await
                .unwrap();
        }
        queue
            .enqueue(WorkflowSignal::new("w2", signal_types::APPROVAL, json!({})))
            .await
            .unwrap();

        assert_eq!(queue.purge("w1").await.unwrap(), 3);
        assert!(queue.all_signals("w1").is_empty());
        assert_eq!(queue.get_unprocessed_signals("w2").await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_waits_release_notifier() {
        let queue = InMemorySignalQueue::new();

        for i in 0..10 {
            let workflow_id = format!("w{i}");
            let _ = queue.await_signal(&workflow_id, signal_types::APPROVAL, 10).await;
        }

        queue
            .enqueue(WorkflowSignal::new("w1", signal_types::APPROVAL, json!({})))
            .await
            .unwrap();
        queue
            .await_signal("w1", signal_types::APPROVAL, 10)
            .await
            .unwrap();

        assert!(queue.notifiers.is_empty());
    }

    #[tokio::test]
    async fn test_purge_keeps_notifier_of_active_waiter() {
        let queue = Arc::new(InMemorySignalQueue::new());

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.await_signal("w1", signal_types::APPROVAL, 5_000).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.purge("w1").await.unwrap();
        assert!(queue.notifiers.contains_key("w1"));

        queue
            .enqueue(WorkflowSignal::new("w1", signal_types::APPROVAL, json!({})))
            .await
            .unwrap();

        let signal = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be woken, not left to time out")
            .unwrap()
            .unwrap();
        assert_eq!(signal.signal_name, signal_types::APPROVAL);
        assert!(queue.notifiers.is_empty());
    }
}
