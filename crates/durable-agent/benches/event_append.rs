//! Event append benchmark
//!
//! Benchmarks the critical path of a durable execution: append an event,
//! fold it, checkpoint every few events. Also measures recovery from the
//! latest checkpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::StreamExt;
use tokio::runtime::Runtime;

use durable_agent::{
    AgentEvent, DurableAgentExecutor, EventPayload, EventStore, ExecutorConfig,
    InMemoryEventStore,
};

/// Benchmark raw appends to the in-memory log (baseline)
fn bench_store_append(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("event_append/store");
    group.throughput(Throughput::Elements(1));

    group.bench_function("single", |b| {
        b.to_async(&rt).iter_custom(|iters| async move {
            let store = InMemoryEventStore::new();
            let payload = EventPayload::Agent(AgentEvent::LlmResponseChunk {
                chunk: "x".repeat(64),
            });

            let start = Instant::now();
            for i in 0..iters {
                store
                    .append_event(payload.clone().into_event("bench", i as i64 + 1))
                    .await
                    .unwrap();
            }
            start.elapsed()
        });
    });

    for batch_size in [10, 100] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("batch", batch_size),
            &batch_size,
            |b, &batch_size| {
                b.to_async(&rt).iter_custom(|iters| async move {
                    let store = InMemoryEventStore::new();

                    let start = Instant::now();
                    for _ in 0..iters {
                        let batch = (0..batch_size)
                            .map(|i| {
                                EventPayload::Agent(AgentEvent::IterationStart {
                                    current: i,
                                    max: batch_size,
                                })
                                .into_event("bench", 0)
                            })
                            .collect();
                        store.append_events(batch).await.unwrap();
                    }
                    start.elapsed()
                });
            },
        );
    }

    group.finish();
}

/// Benchmark a full execution: persist, stream and checkpoint
fn bench_execution(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("event_append/execution");

    for checkpoint_interval in [1u64, 10, 100] {
        let events_per_run = 100u32;
        group.throughput(Throughput::Elements(events_per_run as u64));
        group.bench_with_input(
            BenchmarkId::new("checkpoint_interval", checkpoint_interval),
            &checkpoint_interval,
            |b, &checkpoint_interval| {
                b.to_async(&rt).iter_custom(|iters| async move {
                    let executor = DurableAgentExecutor::in_memory()
                        .with_config(
                            ExecutorConfig::default().with_checkpoint_interval(checkpoint_interval),
                        )
                        .unwrap();

                    let mut total = Duration::ZERO;
                    for i in 0..iters {
                        let start = Instant::now();
                        let mut stream = executor.execute_with_durability(
                            format!("bench-{i}"),
                            "/bench",
                            "bench",
                            move |ctx| async move {
                                for current in 1..=events_per_run {
                                    ctx.emit(AgentEvent::IterationStart {
                                        current,
                                        max: events_per_run,
                                    })
                                    .await?;
                                }
                                Ok(())
                            },
                        );
                        while let Some(item) = stream.next().await {
                            item.unwrap();
                        }
                        total += start.elapsed();
                    }
                    total
                });
            },
        );
    }

    group.finish();
}

/// Benchmark state recovery of a long log from its latest checkpoint
fn bench_recovery(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let executor = Arc::new(DurableAgentExecutor::in_memory());
    rt.block_on(async {
        executor
            .run_to_completion("recover", "/bench", "bench", |ctx| async move {
                for current in 1..=1_000u32 {
                    ctx.emit(AgentEvent::IterationStart {
                        current,
                        max: 1_000,
                    })
                    .await?;
                }
                Ok(())
            })
            .await
            .unwrap();
    });

    c.bench_function("event_append/recover_state", |b| {
        b.to_async(&rt).iter(|| {
            let executor = executor.clone();
            async move { executor.recover_state("recover").await.unwrap() }
        });
    });
}

criterion_group!(benches, bench_store_append, bench_execution, bench_recovery);
criterion_main!(benches);
