//! Approval Flow Example
//!
//! An agent proposes a file edit, waits for a human approval signal, then
//! applies or abandons the edit. Every event is persisted before it is
//! printed, and the state is recovered from the store at the end.
//!
//! Run with the in-memory stores:
//!   cargo run --example approval_flow -p durable-agent
//!
//! Run against PostgreSQL (migrations are applied on start):
//!   DATABASE_URL=postgres://localhost/durable cargo run --example approval_flow -p durable-agent

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use durable_agent::prelude::*;

async fn build_executor() -> anyhow::Result<DurableAgentExecutor> {
    let config = ExecutorConfig::from_env();

    let executor = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let pool = sqlx::PgPool::connect(&url).await?;
            let store = Arc::new(PostgresWorkflowStore::new(pool.clone()));
            store.migrate().await?;
            tracing::info!("using PostgreSQL stores");
            DurableAgentExecutor::new(
                store.clone(),
                store,
                Arc::new(PostgresSignalQueue::new(pool)),
            )
        }
        Err(_) => {
            tracing::info!("DATABASE_URL not set, using in-memory stores");
            DurableAgentExecutor::in_memory()
        }
    };

    Ok(executor.with_config(config)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,durable_agent=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== Approval Flow Example ===");
    println!();

    let executor = build_executor().await?;
    let workflow_id = format!("approval-{}", uuid::Uuid::now_v7());

    let mut stream = executor.execute_with_durability(
        workflow_id.clone(),
        "/tmp/demo-project",
        "rename the config loader",
        |ctx| async move {
            ctx.emit(AgentEvent::IterationStart { current: 1, max: 1 })
                .await?;
            ctx.emit(AgentEvent::ToolCall {
                tool_name: "edit_file".to_string(),
                params: json!({ "path": "src/config.rs", "diff": "- load()\n+ load_from_env()" }),
            })
            .await?;

            let approval = ctx.await_signal(signal_types::APPROVAL, 30_000).await?;
            let approved = approval.data_str("approved") == Some("true");

            ctx.emit(AgentEvent::ToolResult {
                tool_name: "edit_file".to_string(),
                success: approved,
            })
            .await?;
            ctx.emit(AgentEvent::Complete {
                success: approved,
                message: if approved {
                    "edit applied".to_string()
                } else {
                    "edit rejected".to_string()
                },
            })
            .await?;
            Ok(())
        },
    );

    // Play the human: approve once the edit is proposed
    let approver = {
        let executor = executor.clone();
        let workflow_id = workflow_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            println!("--> sending approval");
            executor
                .send_signal(
                    &workflow_id,
                    signal_types::APPROVAL,
                    HashMap::from([("approved".to_string(), "true".to_string())]),
                )
                .await
        })
    };

    while let Some(item) = stream.next().await {
        let event = item?;
        println!("{}", serde_json::to_string(&event)?);
    }
    approver.await??;

    let state = executor.recover_state(&workflow_id).await?;
    println!();
    println!("Recovered state:");
    println!("  status:      {}", state.status);
    println!("  last event:  {}", state.last_event_sequence);
    println!("  tool calls:  {}", state.agent_steps.len());
    println!("  edits:       {:?}", state.agent_edits.iter().map(|e| &e.path).collect::<Vec<_>>());

    Ok(())
}
