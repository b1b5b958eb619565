//! Inbound frame routing.
//!
//! Each WebSocket text frame is parsed as JSON and dispatched by its `type`
//! field. A caller-registered handler fully supersedes the built-in behavior
//! for that type; built-ins cover the server's ready signal, task dispatch,
//! application pings, and disconnect notifications. Routing never fails:
//! malformed frames are logged and dropped.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use octo_protocol::{OutboundFrame, TaskEnvelope, MSG_CONNECTED, MSG_DISCONNECT, MSG_PING, MSG_TASK};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::tasks::{TaskHandler, TaskProcessor};

/// Handle for emitting frames on the current connection.
///
/// Cheap to clone. Sends are best-effort: when the transport is down the
/// frame is dropped with a warning, never queued or retried.
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::Sender<Message>,
}

impl Outbound {
    pub(crate) fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, frame: OutboundFrame) {
        let json = match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize outbound frame");
                return;
            }
        };
        tracing::debug!(frame = %json, "sending frame");
        if self.tx.send(Message::Text(json)).await.is_err() {
            tracing::warn!("transport not connected, dropped outbound frame");
        }
    }
}

/// Implement this trait to take over routing for a message type.
///
/// The handler receives the full parsed frame and an [`Outbound`] handle;
/// whatever it does replaces the built-in handling for that type entirely.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, frame: Value, outbound: Outbound);
}

/// Dispatches inbound frames to custom handlers, built-ins, or the task
/// engine.
pub struct MessageRouter {
    pc_id: String,
    tasks: TaskProcessor,
    custom: HashMap<String, Arc<dyn MessageHandler>>,
}

impl MessageRouter {
    pub fn new(pc_id: impl Into<String>) -> Self {
        Self {
            pc_id: pc_id.into(),
            tasks: TaskProcessor::new(),
            custom: HashMap::new(),
        }
    }

    /// Register a handler for a message type, replacing any existing one.
    /// Takes priority over every built-in for that type.
    pub fn register<H: MessageHandler>(&mut self, message_type: impl Into<String>, handler: H) {
        let message_type = message_type.into();
        tracing::info!(message_type = %message_type, "registered message handler");
        self.custom.insert(message_type, Arc::new(handler));
    }

    /// Register a task handler on the underlying engine.
    pub fn register_task<H: TaskHandler>(&mut self, task_type: impl Into<String>, handler: H) {
        self.tasks.register(task_type, handler);
    }

    /// Route one raw frame. Parse failures are logged and swallowed; no
    /// frame ever errors back to the listen loop.
    pub async fn route(&self, raw: &str, outbound: &Outbound) {
        let frame: Value = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, raw, "dropping malformed frame");
                return;
            }
        };

        let message_type = frame
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        tracing::debug!(message_type = %message_type, "received frame");

        if let Some(handler) = self.custom.get(&message_type) {
            handler.handle(frame, outbound.clone()).await;
            return;
        }

        match message_type.as_str() {
            MSG_CONNECTED => {
                tracing::info!("server acknowledged connection");
                outbound
                    .send(OutboundFrame::NodeReady {
                        pc_id: self.pc_id.clone(),
                        timestamp: Utc::now().timestamp(),
                    })
                    .await;
            }
            MSG_TASK => {
                // Serde defaults make this total for any object; only a
                // non-object `task` frame can fail here.
                match serde_json::from_value::<TaskEnvelope>(frame) {
                    Ok(task) => {
                        let result = self.tasks.process(task).await;
                        outbound.send(OutboundFrame::TaskResult(result)).await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "dropping unreadable task frame");
                    }
                }
            }
            MSG_PING => {
                tracing::debug!("ping received, replying pong");
                outbound.send(OutboundFrame::Pong).await;
            }
            MSG_DISCONNECT => {
                let reason = frame
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                tracing::warn!(reason = %reason, "server announced disconnect");
            }
            other => {
                tracing::info!(message_type = %other, "unhandled message type");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{timeout, Duration};

    fn channel() -> (Outbound, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(16);
        (Outbound::new(tx), rx)
    }

    async fn next_frame(rx: &mut mpsc::Receiver<Message>) -> Value {
        let msg = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("channel closed");
        match msg {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    async fn assert_silent(rx: &mut mpsc::Receiver<Message>) {
        assert!(
            timeout(Duration::from_millis(50), rx.recv()).await.is_err(),
            "expected no outbound frame"
        );
    }

    #[tokio::test]
    async fn connected_emits_node_ready() {
        let router = MessageRouter::new("node_abc");
        let (outbound, mut rx) = channel();
        router.route(r#"{"type":"connected"}"#, &outbound).await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["type"], "node_ready");
        assert_eq!(frame["pc_id"], "node_abc");
        assert!(frame["timestamp"].is_i64());
    }

    #[tokio::test]
    async fn ping_emits_pong() {
        let router = MessageRouter::new("node_abc");
        let (outbound, mut rx) = channel();
        router.route(r#"{"type":"ping"}"#, &outbound).await;
        assert_eq!(next_frame(&mut rx).await, json!({"type": "pong"}));
    }

    #[tokio::test]
    async fn task_emits_result() {
        let router = MessageRouter::new("node_abc");
        let (outbound, mut rx) = channel();
        router
            .route(
                r#"{"type":"task","task_id":"t-7","task_type":"echo","data":{"a":1}}"#,
                &outbound,
            )
            .await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["type"], "task_result");
        assert_eq!(frame["task_id"], "t-7");
        assert_eq!(frame["status"], "completed");
        assert_eq!(frame["result"]["echo"], json!({"a": 1}));
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_silently() {
        let router = MessageRouter::new("node_abc");
        let (outbound, mut rx) = channel();
        router.route("this is not json {", &outbound).await;
        assert_silent(&mut rx).await;
    }

    #[tokio::test]
    async fn missing_type_counts_as_unknown() {
        let router = MessageRouter::new("node_abc");
        let (outbound, mut rx) = channel();
        router.route(r#"{"payload":42}"#, &outbound).await;
        assert_silent(&mut rx).await;
    }

    #[tokio::test]
    async fn disconnect_notification_produces_no_frame() {
        let router = MessageRouter::new("node_abc");
        let (outbound, mut rx) = channel();
        router
            .route(r#"{"type":"disconnect_notification","reason":"maintenance"}"#, &outbound)
            .await;
        assert_silent(&mut rx).await;
    }

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl MessageHandler for CountingHandler {
        async fn handle(&self, _frame: Value, _outbound: Outbound) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn custom_handler_supersedes_builtin_ping() {
        let mut router = MessageRouter::new("node_abc");
        let calls = Arc::new(AtomicUsize::new(0));
        router.register("ping", CountingHandler(calls.clone()));

        let (outbound, mut rx) = channel();
        router.route(r#"{"type":"ping"}"#, &outbound).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // The built-in pong must not have fired.
        assert_silent(&mut rx).await;
    }

    struct AckHandler;

    #[async_trait::async_trait]
    impl MessageHandler for AckHandler {
        async fn handle(&self, frame: Value, outbound: Outbound) {
            outbound
                .send(OutboundFrame::Custom(
                    json!({"type": "custom_ack", "seen": frame["n"]}),
                ))
                .await;
        }
    }

    #[tokio::test]
    async fn custom_handler_can_emit_custom_frames() {
        let mut router = MessageRouter::new("node_abc");
        router.register("custom_message", AckHandler);

        let (outbound, mut rx) = channel();
        router
            .route(r#"{"type":"custom_message","n":3}"#, &outbound)
            .await;
        assert_eq!(
            next_frame(&mut rx).await,
            json!({"type": "custom_ack", "seen": 3})
        );
    }

    #[tokio::test]
    async fn send_after_disconnect_is_dropped() {
        let (outbound, rx) = channel();
        drop(rx);
        // Must not panic or error, just log and drop.
        outbound.send(OutboundFrame::Pong).await;
    }
}
