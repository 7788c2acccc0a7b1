//! End-to-end executor scenarios over the in-memory stores
//!
//! Run with: cargo test -p durable-agent --test executor_scenarios

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;

use durable_agent::{
    event_types, signal_types, AgentEvent, CheckpointManager, DurableAgentExecutor,
    EventStore, ExecutionEvent, ExecutionStream, ExecutorConfig, ExecutorError,
    InMemoryCheckpointManager, InMemoryEventStore, InMemorySignalQueue, SignalError, StoreError,
    WorkflowEvent, WorkflowState, WorkflowStatus,
};

struct Harness {
    executor: DurableAgentExecutor,
    events: Arc<InMemoryEventStore>,
    checkpoints: Arc<InMemoryCheckpointManager>,
}

fn harness(config: ExecutorConfig) -> Harness {
    let events = Arc::new(InMemoryEventStore::new());
    let checkpoints = Arc::new(InMemoryCheckpointManager::new());
    let signals = Arc::new(InMemorySignalQueue::new());

    let executor = DurableAgentExecutor::new(events.clone(), checkpoints.clone(), signals)
        .with_config(config)
        .expect("config should be valid");

    Harness {
        executor,
        events,
        checkpoints,
    }
}

/// Drain a stream into its events and the error that ended it, if any
async fn drain(mut stream: ExecutionStream) -> (Vec<ExecutionEvent>, Option<ExecutorError>) {
    let mut events = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => events.push(event),
            Err(e) => {
                assert!(stream.next().await.is_none(), "error must be the last item");
                return (events, Some(e));
            }
        }
    }
    (events, None)
}

fn tool_call(tool_name: &str, path: &str) -> AgentEvent {
    AgentEvent::ToolCall {
        tool_name: tool_name.to_string(),
        params: json!({ "path": path }),
    }
}

fn tool_result(tool_name: &str, success: bool) -> AgentEvent {
    AgentEvent::ToolResult {
        tool_name: tool_name.to_string(),
        success,
    }
}

fn sequence_numbers(events: &[WorkflowEvent]) -> Vec<i64> {
    events.iter().map(|e| e.sequence_number).collect()
}

fn event_type_names(events: &[WorkflowEvent]) -> Vec<&str> {
    events.iter().map(|e| e.event_type.as_str()).collect()
}

#[test_log::test(tokio::test)]
async fn test_checkpoint_every_two_events() {
    let h = harness(ExecutorConfig::default().with_checkpoint_interval(2));

    let stream = h
        .executor
        .execute_with_durability("w1", "/repo", "fix the build", |ctx| async move {
            ctx.emit(AgentEvent::IterationStart { current: 1, max: 5 })
                .await?;
            ctx.emit(tool_call("read_file", "Cargo.toml")).await?;
            ctx.emit(tool_result("read_file", true)).await?;
            ctx.emit(AgentEvent::Complete {
                success: true,
                message: "done".to_string(),
            })
            .await?;
            Ok(())
        });

    let (live, error) = drain(stream).await;
    assert!(error.is_none(), "unexpected error: {error:?}");

    let logged = h.events.get_events("w1", 0, None).await.unwrap();
    assert_eq!(sequence_numbers(&logged), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(
        event_type_names(&logged),
        vec![
            event_types::EXECUTION_STARTED,
            event_types::ITERATION_START,
            event_types::TOOL_CALL,
            event_types::TOOL_RESULT,
            event_types::COMPLETE,
            event_types::EXECUTION_COMPLETED,
        ]
    );
    assert_eq!(
        logged[5].event_data,
        json!({ "success": true, "totalEvents": 4 })
    );

    let checkpoints = h.checkpoints.get_all("w1").await.unwrap();
    let checkpoint_sequences: Vec<i64> = checkpoints.iter().map(|c| c.sequence_number).collect();
    assert_eq!(checkpoint_sequences, vec![2, 4, 6]);
    assert_eq!(logged[1].checkpoint_id, Some(checkpoints[0].id));
    assert_eq!(logged[2].checkpoint_id, None);

    // Live stream mirrors the log
    let live_sequences: Vec<Option<i64>> = live.iter().map(|e| e.sequence_number()).collect();
    assert_eq!(
        live_sequences,
        vec![Some(1), Some(2), Some(3), Some(4), Some(5), Some(6)]
    );
    assert!(matches!(live[0], ExecutionEvent::Started { ref task, .. } if task == "fix the build"));
    assert_eq!(
        live[5],
        ExecutionEvent::Completed {
            sequence_number: 6,
            total_events: 4
        }
    );

    let state = h.executor.recover_state("w1").await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(state.last_event_sequence, 6);
    assert_eq!(state.current_iteration, 1);
    assert_eq!(state.agent_steps.len(), 1);
    assert_eq!(state.agent_steps[0].success, Some(true));
}

#[test_log::test(tokio::test)]
async fn test_agent_failure_is_recorded() {
    let h = harness(ExecutorConfig::default());

    let stream = h
        .executor
        .execute_with_durability("w-fail", "/repo", "task", |ctx| async move {
            ctx.emit(AgentEvent::IterationStart { current: 1, max: 3 })
                .await?;
            ctx.emit(AgentEvent::LlmResponseChunk {
                chunk: "thinking".to_string(),
            })
            .await?;
            Err(anyhow!("model quota exceeded"))
        });

    let (live, error) = drain(stream).await;

    let logged = h.events.get_events("w-fail", 0, None).await.unwrap();
    assert_eq!(sequence_numbers(&logged), vec![1, 2, 3, 4]);
    assert_eq!(logged[3].event_type, event_types::EXECUTION_FAILED);
    assert_eq!(logged[3].event_data["error"], "model quota exceeded");

    // Failed marker, then the terminal agent error, then the error itself
    assert_eq!(live.len(), 5);
    assert!(matches!(
        live[3],
        ExecutionEvent::Failed {
            sequence_number: 4,
            cancelled: false,
            ..
        }
    ));
    assert_eq!(
        live[4],
        ExecutionEvent::Agent {
            sequence_number: None,
            event: AgentEvent::Error {
                message: "model quota exceeded".to_string()
            },
        }
    );
    match error {
        Some(ExecutorError::AgentLoop(e)) => assert_eq!(e.to_string(), "model quota exceeded"),
        other => panic!("expected agent loop error, got {other:?}"),
    }

    // Final checkpoint covers the terminal event
    let latest = h.checkpoints.get_latest("w-fail").await.unwrap().unwrap();
    assert_eq!(latest.sequence_number, 4);

    let state = h.executor.recover_state("w-fail").await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Failed);
    assert_eq!(state.last_error.as_deref(), Some("model quota exceeded"));
}

#[tokio::test]
async fn test_agent_panic_is_recorded() {
    let h = harness(ExecutorConfig::default());

    let stream = h
        .executor
        .execute_with_durability("w-panic", "/repo", "task", |ctx| async move {
            ctx.emit(AgentEvent::IterationStart { current: 1, max: 3 })
                .await?;
            let tool_outputs: Vec<String> = Vec::new();
            if ctx.workflow_id() == "w-panic" {
                let _ = &tool_outputs[3];
            }
            Ok(())
        });

    let (live, error) = drain(stream).await;

    let logged = h.events.get_events("w-panic", 0, None).await.unwrap();
    assert_eq!(
        event_type_names(&logged),
        vec![
            event_types::EXECUTION_STARTED,
            event_types::ITERATION_START,
            event_types::EXECUTION_FAILED,
        ]
    );
    assert!(logged[2].event_data["error"]
        .as_str()
        .is_some_and(|e| e.starts_with("agent loop panicked")));

    assert!(matches!(
        live[2],
        ExecutionEvent::Failed {
            sequence_number: 3,
            cancelled: false,
            ..
        }
    ));
    match error {
        Some(ExecutorError::AgentLoop(e)) => {
            assert!(e.to_string().contains("index out of bounds"))
        }
        other => panic!("expected agent loop error, got {other:?}"),
    }

    let latest = h.checkpoints.get_latest("w-panic").await.unwrap().unwrap();
    assert_eq!(latest.sequence_number, 3);
    assert!(!h.executor.is_running("w-panic"));

    let state = h.executor.recover_state("w-panic").await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Failed);
}

#[tokio::test]
async fn test_replay_from_any_checkpoint_matches_full_replay() {
    let h = harness(ExecutorConfig::default().with_checkpoint_interval(3));

    h.executor
        .run_to_completion("w-replay", "/repo", "refactor", |ctx| async move {
            for i in 1..=2u32 {
                ctx.emit(AgentEvent::IterationStart { current: i, max: 2 })
                    .await?;
                let path = format!("src/file_{i}.rs");
                ctx.emit(tool_call("edit_file", &path)).await?;
                ctx.emit(tool_result("edit_file", true)).await?;
            }
            ctx.emit(AgentEvent::Complete {
                success: true,
                message: "refactored".to_string(),
            })
            .await?;
            Ok(())
        })
        .await
        .expect("execution should complete");

    let logged = h.events.get_events("w-replay", 0, None).await.unwrap();
    assert_eq!(logged.len(), 9);

    let full = WorkflowState::replay(WorkflowState::new("w-replay"), &logged).unwrap();
    assert_eq!(full.agent_edits.len(), 2);
    assert_eq!(full.agent_edits[1].path.as_deref(), Some("src/file_2.rs"));

    let checkpoints = h.checkpoints.get_all("w-replay").await.unwrap();
    assert_eq!(checkpoints.len(), 3);
    for checkpoint in &checkpoints {
        let restored = h.checkpoints.restore_state(checkpoint).unwrap();
        let tail: Vec<_> = logged
            .iter()
            .filter(|e| e.sequence_number > checkpoint.sequence_number)
            .collect();
        let resumed = WorkflowState::replay(restored, tail).unwrap();
        assert_eq!(resumed, full, "checkpoint {}", checkpoint.sequence_number);
    }

    // Historical view: everything before sequence 5
    let before = h
        .executor
        .recover_state_before("w-replay", 5)
        .await
        .unwrap();
    let expected = WorkflowState::replay(WorkflowState::new("w-replay"), &logged[..4]).unwrap();
    assert_eq!(before, expected);
    assert_eq!(before.last_event_sequence, 4);
}

#[tokio::test]
async fn test_signal_reaches_waiting_agent() {
    let h = harness(ExecutorConfig::default());

    let mut stream = h
        .executor
        .execute_with_durability("w-approve", "/repo", "edit", |ctx| async move {
            ctx.emit(tool_call("write_file", "src/main.rs")).await?;
            let approval = ctx.await_signal(signal_types::APPROVAL, 5_000).await?;
            let approved = approval.data_str("approved") == Some("true");
            ctx.emit(tool_result("write_file", approved)).await?;
            Ok(())
        });

    assert!(matches!(
        stream.next().await,
        Some(Ok(ExecutionEvent::Started { .. }))
    ));
    assert!(matches!(
        stream.next().await,
        Some(Ok(ExecutionEvent::Agent {
            event: AgentEvent::ToolCall { .. },
            ..
        }))
    ));

    h.executor
        .send_signal(
            "w-approve",
            signal_types::APPROVAL,
            HashMap::from([("approved".to_string(), "true".to_string())]),
        )
        .await
        .unwrap();

    let (rest, error) = drain(stream).await;
    assert!(error.is_none());
    assert!(rest.last().is_some_and(ExecutionEvent::is_terminal));

    let state = h.executor.recover_state("w-approve").await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(state.agent_edits.len(), 1);
    assert_eq!(state.agent_edits[0].path.as_deref(), Some("src/main.rs"));
    assert!(state.pending_signals.is_empty());
}

#[tokio::test]
async fn test_signal_timeout_fails_execution() {
    let h = harness(ExecutorConfig::default());

    let started = tokio::time::Instant::now();
    let stream = h
        .executor
        .execute_with_durability("w-timeout", "/repo", "edit", |ctx| async move {
            ctx.await_signal(signal_types::APPROVAL, 100).await?;
            Ok(())
        });

    let (_, error) = drain(stream).await;
    assert!(started.elapsed() >= Duration::from_millis(100));

    let Some(ExecutorError::AgentLoop(e)) = error else {
        panic!("expected agent loop error, got {error:?}");
    };
    assert!(matches!(
        e.downcast_ref::<ExecutorError>(),
        Some(ExecutorError::Signal(SignalError::Timeout { timeout_ms: 100, .. }))
    ));

    let failed = h
        .events
        .get_events_by_type("w-timeout", event_types::EXECUTION_FAILED)
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].event_data["error"]
        .as_str()
        .is_some_and(|m| m.contains("timed out")));
}

#[test_log::test(tokio::test)]
async fn test_cancellation_records_cancelled_terminal_event() {
    let h = harness(ExecutorConfig::default());

    let mut stream = h
        .executor
        .execute_with_durability("w-cancel", "/repo", "long task", |ctx| async move {
            ctx.await_signal(signal_types::APPROVAL, 60_000).await?;
            Ok(())
        });

    assert!(matches!(
        stream.next().await,
        Some(Ok(ExecutionEvent::Started { .. }))
    ));
    assert!(h.executor.cancel_execution("w-cancel"));

    let (rest, error) = drain(stream).await;
    assert!(matches!(
        rest.as_slice(),
        [ExecutionEvent::Failed {
            sequence_number: 2,
            cancelled: true,
            ..
        }]
    ));
    assert!(matches!(error, Some(ExecutorError::Cancelled(ref id)) if id == "w-cancel"));

    let state = h.executor.recover_state("w-cancel").await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Cancelled);
    assert!(!h.executor.is_running("w-cancel"));
}

#[tokio::test]
async fn test_second_execution_of_running_workflow_is_rejected() {
    let h = harness(ExecutorConfig::default());

    let mut first = h
        .executor
        .execute_with_durability("w-lease", "/repo", "task", |ctx| async move {
            ctx.await_signal(signal_types::APPROVAL, 60_000).await?;
            Ok(())
        });
    assert!(matches!(
        first.next().await,
        Some(Ok(ExecutionEvent::Started { .. }))
    ));

    let second = h
        .executor
        .execute_with_durability("w-lease", "/repo", "task", |ctx| async move {
            ctx.emit(AgentEvent::IterationStart { current: 1, max: 1 })
                .await?;
            Ok(())
        });
    let (events, error) = drain(second).await;
    assert!(events.is_empty());
    assert!(matches!(error, Some(ExecutorError::AlreadyRunning(_))));
    assert_eq!(h.events.get_latest_sequence("w-lease").await.unwrap(), 1);

    first.cancel();
    let (_, error) = drain(first).await;
    assert!(matches!(error, Some(ExecutorError::Cancelled(_))));
}

#[tokio::test]
async fn test_resumed_execution_continues_sequence() {
    let h = harness(ExecutorConfig::default());

    let first = h
        .executor
        .run_to_completion("w-resume", "/repo", "step one", |ctx| async move {
            ctx.emit(tool_call("create_file", "a.txt")).await?;
            ctx.emit(tool_result("create_file", true)).await?;
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(
        (first.first_sequence_number, first.last_sequence_number),
        (1, 4)
    );

    let second = h
        .executor
        .run_to_completion("w-resume", "/repo", "step two", |ctx| async move {
            let state = ctx.state().await;
            assert_eq!(state.agent_edits.len(), 1);
            ctx.emit(tool_call("delete_file", "b.txt")).await?;
            ctx.emit(tool_result("delete_file", true)).await?;
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(
        (second.first_sequence_number, second.last_sequence_number),
        (5, 8)
    );
    assert_eq!(second.total_events, 2);

    let logged = h.events.get_events("w-resume", 0, None).await.unwrap();
    assert_eq!(sequence_numbers(&logged), (1..=8).collect::<Vec<_>>());

    // The second execution's checkpoint covers the whole history
    let latest = h.checkpoints.get_latest("w-resume").await.unwrap().unwrap();
    let restored = latest.restore_state().unwrap();
    assert_eq!(latest.sequence_number, 8);
    assert_eq!(restored.agent_edits.len(), 2);
    assert_eq!(restored.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn test_dropped_stream_detaches_execution() {
    let h = harness(ExecutorConfig::default().with_event_buffer(1));

    let mut stream = h
        .executor
        .execute_with_durability("w-detach", "/repo", "task", |ctx| async move {
            for i in 1..=3u32 {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ctx.emit(AgentEvent::IterationStart { current: i, max: 3 })
                    .await?;
            }
            Ok(())
        });
    assert!(stream.next().await.is_some());
    drop(stream);

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.executor.is_running("w-detach") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("detached execution should finish");

    let logged = h.events.get_events("w-detach", 0, None).await.unwrap();
    assert_eq!(logged.len(), 5);
    assert_eq!(logged[4].event_type, event_types::EXECUTION_COMPLETED);
}

/// Event store that fails every append after the first `healthy` ones
struct FlakyEventStore {
    inner: InMemoryEventStore,
    healthy: usize,
    appends: AtomicUsize,
}

#[async_trait]
impl EventStore for FlakyEventStore {
    async fn append_event(&self, event: WorkflowEvent) -> Result<i64, StoreError> {
        if self.appends.fetch_add(1, Ordering::SeqCst) >= self.healthy {
            return Err(StoreError::Database("connection reset".to_string()));
        }
        self.inner.append_event(event).await
    }

    async fn append_events(&self, events: Vec<WorkflowEvent>) -> Result<Vec<i64>, StoreError> {
        self.inner.append_events(events).await
    }

    async fn get_events(
        &self,
        workflow_id: &str,
        from_sequence: i64,
        to_sequence: Option<i64>,
    ) -> Result<Vec<WorkflowEvent>, StoreError> {
        self.inner
            .get_events(workflow_id, from_sequence, to_sequence)
            .await
    }

    async fn get_latest_sequence(&self, workflow_id: &str) -> Result<i64, StoreError> {
        self.inner.get_latest_sequence(workflow_id).await
    }

    async fn get_events_by_type(
        &self,
        workflow_id: &str,
        event_type: &str,
    ) -> Result<Vec<WorkflowEvent>, StoreError> {
        self.inner.get_events_by_type(workflow_id, event_type).await
    }

    async fn delete_events(&self, workflow_id: &str) -> Result<u64, StoreError> {
        self.inner.delete_events(workflow_id).await
    }

    async fn get_event_count(&self, workflow_id: &str) -> Result<u64, StoreError> {
        self.inner.get_event_count(workflow_id).await
    }
}

#[test_log::test(tokio::test)]
async fn test_persistence_failure_stops_all_writes() {
    let events = Arc::new(FlakyEventStore {
        inner: InMemoryEventStore::new(),
        healthy: 2,
        appends: AtomicUsize::new(0),
    });
    let executor = DurableAgentExecutor::new(
        events.clone(),
        Arc::new(InMemoryCheckpointManager::new()),
        Arc::new(InMemorySignalQueue::new()),
    );

    let stream = executor.execute_with_durability("w-flaky", "/repo", "task", |ctx| async move {
        ctx.emit(AgentEvent::IterationStart { current: 1, max: 3 })
            .await?;
        ctx.emit(AgentEvent::IterationStart { current: 2, max: 3 })
            .await?;
        ctx.emit(AgentEvent::IterationStart { current: 3, max: 3 })
            .await?;
        Ok(())
    });

    let (live, error) = drain(stream).await;
    assert_eq!(live.len(), 2);
    assert!(matches!(
        error,
        Some(ExecutorError::Store(StoreError::Database(_)))
    ));

    // No terminal event after the failed append
    let logged = events.get_events("w-flaky", 0, None).await.unwrap();
    assert_eq!(sequence_numbers(&logged), vec![1, 2]);
    assert!(!logged.iter().any(WorkflowEvent::is_terminal));
}

#[tokio::test]
async fn test_event_cap_is_fatal() {
    let h = harness(ExecutorConfig::default().with_max_events_per_workflow(3));

    let stream = h
        .executor
        .execute_with_durability("w-cap", "/repo", "task", |ctx| async move {
            for i in 1..=5u32 {
                ctx.emit(AgentEvent::IterationStart { current: i, max: 5 })
                    .await?;
            }
            Ok(())
        });

    let (live, error) = drain(stream).await;
    assert!(matches!(
        error,
        Some(ExecutorError::TooManyEvents { limit: 3, .. })
    ));

    // Agent events stop at the cap; the terminal event still lands
    let logged = h.events.get_events("w-cap", 0, None).await.unwrap();
    assert_eq!(sequence_numbers(&logged), vec![1, 2, 3, 4]);
    assert_eq!(logged[3].event_type, event_types::EXECUTION_FAILED);
    assert!(live.iter().any(|e| matches!(
        e,
        ExecutionEvent::Failed {
            sequence_number: 4,
            ..
        }
    )));

    let latest = h.checkpoints.get_latest("w-cap").await.unwrap().unwrap();
    assert_eq!(latest.sequence_number, 4);

    let state = h.executor.recover_state("w-cap").await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Failed);
}

#[tokio::test]
async fn test_event_cap_applies_when_loop_swallows_the_error() {
    let h = harness(ExecutorConfig::default().with_max_events_per_workflow(2));

    let result = h
        .executor
        .run_to_completion("w-cap-swallow", "/repo", "task", |ctx| async move {
            for i in 1..=3u32 {
                let _ = ctx
                    .emit(AgentEvent::IterationStart { current: i, max: 3 })
                    .await;
            }
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(ExecutorError::TooManyEvents { .. })));
    let state = h.executor.recover_state("w-cap-swallow").await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Failed);
    assert_eq!(state.last_event_sequence, 3);
}

#[tokio::test]
async fn test_checkpoints_are_pruned_to_retention() {
    let h = harness(
        ExecutorConfig::default()
            .with_checkpoint_interval(1)
            .with_checkpoint_retention(2),
    );

    h.executor
        .run_to_completion("w-prune", "/repo", "task", |ctx| async move {
            for i in 1..=5u32 {
                ctx.emit(AgentEvent::IterationStart { current: i, max: 5 })
                    .await?;
            }
            Ok(())
        })
        .await
        .unwrap();

    let checkpoints = h.checkpoints.get_all("w-prune").await.unwrap();
    let sequences: Vec<i64> = checkpoints.iter().map(|c| c.sequence_number).collect();
    assert_eq!(sequences, vec![6, 7]);
}

#[tokio::test]
async fn test_queued_signals_do_not_leak_into_checkpoints() {
    let h = harness(ExecutorConfig::default().with_checkpoint_interval(2));

    h.executor
        .send_signal("w-pending", signal_types::USER_INPUT, HashMap::new())
        .await
        .unwrap();

    h.executor
        .run_to_completion("w-pending", "/repo", "task", |ctx| async move {
            for i in 1..=5u32 {
                ctx.emit(AgentEvent::IterationStart { current: i, max: 5 })
                    .await?;
            }
            Ok(())
        })
        .await
        .unwrap();

    let logged = h.events.get_events("w-pending", 0, None).await.unwrap();
    let full = WorkflowState::replay(WorkflowState::new("w-pending"), &logged).unwrap();

    let checkpoints = h.checkpoints.get_all("w-pending").await.unwrap();
    assert!(!checkpoints.is_empty());
    for checkpoint in &checkpoints {
        let restored = checkpoint.restore_state().unwrap();
        assert!(restored.pending_signals.is_empty());

        let tail: Vec<_> = logged
            .iter()
            .filter(|e| e.sequence_number > checkpoint.sequence_number)
            .collect();
        let resumed = WorkflowState::replay(restored, tail).unwrap();
        assert_eq!(resumed, full, "checkpoint {}", checkpoint.sequence_number);
    }

    // The live queue is still visible through recovery
    let state = h.executor.recover_state("w-pending").await.unwrap();
    assert_eq!(state.pending_signals.len(), 1);
    assert_eq!(
        state.pending_signals[0].signal_name,
        signal_types::USER_INPUT
    );
}

#[tokio::test]
async fn test_cleanup_removes_everything() {
    let h = harness(ExecutorConfig::default());

    h.executor
        .run_to_completion("w-clean", "/repo", "task", |ctx| async move {
            ctx.emit(AgentEvent::CloneProgress {
                stage: "fetch".to_string(),
                progress: 50,
            })
            .await?;
            Ok(())
        })
        .await
        .unwrap();
    h.executor
        .send_signal("w-clean", signal_types::APPROVAL, HashMap::new())
        .await
        .unwrap();

    let stats = h.executor.cleanup_workflow("w-clean").await.unwrap();
    assert_eq!((stats.events, stats.checkpoints, stats.signals), (3, 1, 1));

    assert_eq!(h.events.get_event_count("w-clean").await.unwrap(), 0);
    assert!(h.checkpoints.get_latest("w-clean").await.unwrap().is_none());
    assert_eq!(
        h.executor.recover_state("w-clean").await.unwrap(),
        WorkflowState::new("w-clean")
    );
}
