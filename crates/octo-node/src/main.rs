//! `octo-node` — reference OctoHub node.
//!
//! Authenticates against the control server, holds the WebSocket open, and
//! executes dispatched tasks with the SDK's built-in handlers plus one
//! example custom handler.
//!
//! # Env vars
//!
//! | Variable                         | Description                              | Default     |
//! |----------------------------------|------------------------------------------|-------------|
//! | `OCTOHUB_SERVER_HOST`            | Control server host                      | `localhost` |
//! | `OCTOHUB_SERVER_PORT`            | Control server HTTP port                 | `8080`      |
//! | `OCTOHUB_SIGNATURE_KEY`          | Shared signing secret                    | (required)  |
//! | `OCTOHUB_PC_ID`                  | Node identity                            | (derived)   |
//! | `OCTOHUB_RECONNECT_INTERVAL`     | Seconds between reconnect attempts       | `5`         |
//! | `OCTOHUB_MAX_RECONNECT_ATTEMPTS` | Attempt budget per disconnect episode    | `10`        |
//! | `OCTOHUB_PING_INTERVAL`          | Keepalive ping interval, seconds         | `30`        |
//! | `OCTOHUB_PING_TIMEOUT`           | Keepalive pong timeout, seconds          | `10`        |
//!
//! Log level via `RUST_LOG` (default `info`).

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use octo_node_sdk::{NodeClient, TaskEnvelope, TaskError, TaskHandler};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

/// Example custom handler, dispatched for `task_type == "custom_task"`.
struct CustomTask;

#[async_trait::async_trait]
impl TaskHandler for CustomTask {
    async fn run(&self, task: &TaskEnvelope) -> Result<Value, TaskError> {
        tracing::info!(task_id = %task.task_id, "handling custom task");
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(json!(format!("custom task {} processed", task.task_id)))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let host = std::env::var("OCTOHUB_SERVER_HOST").unwrap_or_else(|_| "localhost".into());
    let port: u16 = env_or("OCTOHUB_SERVER_PORT", 8080)?;
    let signature_key = std::env::var("OCTOHUB_SIGNATURE_KEY")
        .context("OCTOHUB_SIGNATURE_KEY is required; the node never ships a default secret")?;
    let reconnect_interval: u64 = env_or("OCTOHUB_RECONNECT_INTERVAL", 5)?;
    let max_attempts: u32 = env_or("OCTOHUB_MAX_RECONNECT_ATTEMPTS", 10)?;
    let ping_interval: u64 = env_or("OCTOHUB_PING_INTERVAL", 30)?;
    let ping_timeout: u64 = env_or("OCTOHUB_PING_TIMEOUT", 10)?;

    let mut builder = NodeClient::builder()
        .server_host(host)
        .server_port(port)
        .signature_key(signature_key)
        .reconnect(Duration::from_secs(reconnect_interval), max_attempts)
        .ping_interval(Duration::from_secs(ping_interval))
        .ping_timeout(Duration::from_secs(ping_timeout));

    if let Ok(pc_id) = std::env::var("OCTOHUB_PC_ID") {
        builder = builder.pc_id(pc_id);
    }

    let mut client = builder.build()?;
    client.register_task_handler("custom_task", CustomTask);

    tracing::info!(pc_id = %client.pc_id(), "starting octo-node");

    // Ctrl-C stops the client; run() then returns Ok.
    let handle = client.handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Ctrl-C received, shutting down");
        handle.stop();
    });

    match client.run().await {
        Ok(()) => tracing::info!("node exited cleanly"),
        Err(e) => {
            tracing::error!(error = %e, "node exited with error");
            return Err(e.into());
        }
    }

    Ok(())
}

/// Read an env var and parse it, falling back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {name}={raw}: {e}")),
        Err(_) => Ok(default),
    }
}
