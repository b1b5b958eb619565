//! Node protocol: WebSocket frame types and the endpoint-resolution contract.
//!
//! Nodes are remote agents that authenticate against the OctoHub control
//! server, hold a persistent WebSocket connection, and execute dispatched
//! tasks. Every frame is one JSON text message; inbound frames are dispatched
//! by their `type` field, outbound frames are described by [`OutboundFrame`].

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Inbound `type` value for the server's ready signal.
pub const MSG_CONNECTED: &str = "connected";
/// Inbound `type` value carrying a [`TaskEnvelope`].
pub const MSG_TASK: &str = "task";
/// Inbound `type` value for an application-level keepalive probe.
pub const MSG_PING: &str = "ping";
/// Inbound `type` value announcing a server-initiated disconnect.
pub const MSG_DISCONNECT: &str = "disconnect_notification";

/// Frames the node sends to the server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutboundFrame {
    /// Acknowledges the server's `connected` signal.
    #[serde(rename = "node_ready")]
    NodeReady { pc_id: String, timestamp: i64 },

    /// Reply to an application-level `ping`. No payload.
    #[serde(rename = "pong")]
    Pong,

    /// Result of one executed task, one-to-one with its [`TaskEnvelope`].
    #[serde(rename = "task_result")]
    TaskResult(ResultEnvelope),

    /// Escape hatch for caller-registered handlers that speak their own
    /// frame types. Serialized as-is; the value must carry its own `type`.
    #[serde(untagged)]
    Custom(serde_json::Value),
}

/// A unit of remote work dispatched by the server.
///
/// Constructed from a `task`-typed inbound frame; missing fields fall back
/// to the documented defaults so a sparse frame still yields a well-formed
/// envelope (and thus a well-formed result).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    #[serde(default = "default_task_id")]
    pub task_id: String,
    #[serde(default = "default_task_type")]
    pub task_type: String,
    /// Opaque handler payload.
    #[serde(default = "default_data")]
    pub data: serde_json::Value,
}

fn default_task_id() -> String {
    "unknown".into()
}

fn default_task_type() -> String {
    "default".into()
}

fn default_data() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Terminal status of a processed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
}

/// Outcome of exactly one [`TaskEnvelope`], sent back as a `task_result`
/// frame. Carries `result` on success or `error` on failure, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: i64,
}

impl ResultEnvelope {
    pub fn completed(task_id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Completed,
            result: Some(result),
            error: None,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn failed(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            result: None,
            error: Some(error.into()),
            timestamp: Utc::now().timestamp(),
        }
    }
}

// ── Endpoint resolution (HTTP) ─────────────────────────────────────────

/// Body of `GET /node/ws?pc_id={id}`.
///
/// Success iff `errcode == 0` and `data.wsUrl` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub errcode: i64,
    #[serde(default)]
    pub errmsg: String,
    #[serde(default)]
    pub data: Option<ResolveData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveData {
    #[serde(rename = "wsUrl")]
    pub ws_url: Option<String>,
}
