//! Core node client: connection state machine, listen loop, and keepalive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::auth::EndpointResolver;
use crate::reconnect::ReconnectPolicy;
use crate::router::{MessageHandler, MessageRouter, Outbound};
use crate::tasks::TaskHandler;
use crate::types::NodeError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bound on the graceful close path after the listen loop exits.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Named state of the connection machine.
///
/// Owned exclusively by [`NodeClient::run`]; readable through
/// [`NodeHandle::state`]. Note that [`NodeHandle::is_connected`] reflects
/// transport openness directly and is independent of this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

/// State shared between the running client and its handles.
pub(crate) struct Shared {
    state: RwLock<ConnectionState>,
    connected: AtomicBool,
    running: AtomicBool,
    stop: CancellationToken,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            connected: AtomicBool::new(false),
            running: AtomicBool::new(false),
            stop: CancellationToken::new(),
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write();
        if *state != next {
            tracing::debug!(from = ?*state, to = ?next, "connection state change");
            *state = next;
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Cloneable handle for stopping and observing a running [`NodeClient`].
#[derive(Clone)]
pub struct NodeHandle {
    shared: Arc<Shared>,
}

impl NodeHandle {
    /// Stop the client: clears the running flag and unblocks the listen or
    /// reconnect wait. Idempotent; the transport closes within one close
    /// timeout.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.stop.cancel();
    }

    /// Current named state of the connection machine.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Whether the transport is currently open, independent of the named
    /// state. Useful for external health checks.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

/// A configured node client. Create via
/// [`NodeClientBuilder`](crate::builder::NodeClientBuilder), register any
/// custom handlers, then call [`run`](Self::run).
pub struct NodeClient {
    pub(crate) server_host: String,
    pub(crate) server_port: u16,
    pub(crate) pc_id: String,
    pub(crate) reconnect: ReconnectPolicy,
    pub(crate) ping_interval: Duration,
    pub(crate) ping_timeout: Duration,
    pub(crate) resolver: EndpointResolver,
    pub(crate) router: MessageRouter,
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for NodeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeClient")
            .field("server_host", &self.server_host)
            .field("server_port", &self.server_port)
            .field("pc_id", &self.pc_id)
            .field("reconnect", &self.reconnect)
            .field("ping_interval", &self.ping_interval)
            .field("ping_timeout", &self.ping_timeout)
            .finish_non_exhaustive()
    }
}

impl NodeClient {
    /// Start a new builder.
    pub fn builder() -> crate::builder::NodeClientBuilder {
        crate::builder::NodeClientBuilder::new()
    }

    pub(crate) fn new_shared() -> Arc<Shared> {
        Arc::new(Shared::new())
    }

    /// The node identity this client presents to the server.
    pub fn pc_id(&self) -> &str {
        &self.pc_id
    }

    /// Handle for stopping and observing the client; grab one before `run`.
    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            shared: self.shared.clone(),
        }
    }

    /// Register a custom message handler, superseding the built-in behavior
    /// for that type. Last registration wins.
    pub fn register_message_handler<H: MessageHandler>(
        &mut self,
        message_type: impl Into<String>,
        handler: H,
    ) {
        self.router.register(message_type, handler);
    }

    /// Register a custom task handler. Last registration wins; the built-in
    /// `default`, `echo`, and `sleep` handlers can be replaced this way.
    pub fn register_task_handler<H: TaskHandler>(
        &mut self,
        task_type: impl Into<String>,
        handler: H,
    ) {
        self.router.register_task(task_type, handler);
    }

    /// Run the client until stopped or the reconnect budget is exhausted.
    ///
    /// Resolves the endpoint, connects, and feeds inbound frames to the
    /// router strictly in arrival order. On any connect failure or
    /// disconnect it enters a reconnect episode: fixed waits, bounded
    /// attempts, counter reset only by a successful connect. Returns `Ok`
    /// after [`NodeHandle::stop`], `Err(ReconnectExhausted)` when an episode
    /// spends its whole budget.
    pub async fn run(self) -> Result<(), NodeError> {
        let shared = self.shared.clone();
        shared.running.store(true, Ordering::SeqCst);
        shared.set_state(ConnectionState::Connecting);
        tracing::info!(pc_id = %self.pc_id, "starting node client");

        let mut attempts: u32 = 0;
        let mut ws = tokio::select! {
            res = self.connect() => match res {
                Ok(ws) => Some(ws),
                Err(e) => {
                    tracing::error!(error = %e, "initial connection failed");
                    None
                }
            },
            _ = shared.stop.cancelled() => None,
        };

        loop {
            if let Some(stream) = ws.take() {
                // The budget resets only here, on a successful connect.
                attempts = 0;
                shared.set_state(ConnectionState::Connected);
                self.listen(stream).await;
                shared.connected.store(false, Ordering::SeqCst);
                tracing::warn!("connection closed");
            }

            if !shared.is_running() {
                break;
            }

            shared.set_state(ConnectionState::Reconnecting);
            ws = loop {
                if !shared.is_running() {
                    break None;
                }
                if self.reconnect.exhausted(attempts) {
                    shared.running.store(false, Ordering::SeqCst);
                    shared.set_state(ConnectionState::Stopped);
                    tracing::error!(attempts, "reconnect budget exhausted, giving up");
                    return Err(NodeError::ReconnectExhausted(attempts));
                }
                attempts += 1;
                tracing::info!(
                    attempt = attempts,
                    max = self.reconnect.max_attempts,
                    "reconnecting"
                );

                tokio::select! {
                    _ = tokio::time::sleep(self.reconnect.interval) => {}
                    _ = shared.stop.cancelled() => break None,
                }

                tokio::select! {
                    res = self.connect() => match res {
                        Ok(ws) => break Some(ws),
                        Err(e) => {
                            tracing::warn!(attempt = attempts, error = %e, "reconnect failed");
                        }
                    },
                    _ = shared.stop.cancelled() => break None,
                }
            };

            if ws.is_none() {
                // stop() arrived during the episode.
                break;
            }
        }

        shared.set_state(ConnectionState::Stopped);
        tracing::info!("node client stopped");
        Ok(())
    }

    /// One connection establishment: resolve the endpoint, then open the
    /// transport. Failures surface to the reconnect logic in `run`. The
    /// handshake is bounded so a peer that accepts TCP but never completes
    /// the upgrade counts as a failed attempt instead of hanging the loop.
    async fn connect(&self) -> Result<WsStream, NodeError> {
        let ws_url = self
            .resolver
            .resolve(&self.pc_id, &self.server_host, self.server_port)
            .await?;
        tracing::info!(url = %ws_url, "connecting WebSocket");

        let (ws, _response) = tokio::time::timeout(CLOSE_TIMEOUT, connect_async(&ws_url))
            .await
            .map_err(|_| NodeError::HandshakeTimeout)??;
        self.shared.connected.store(true, Ordering::SeqCst);
        tracing::info!("WebSocket connection established");
        Ok(ws)
    }

    /// Listen loop for one connection. Frames are routed inline, one at a
    /// time, so task execution is serialized per connection by design.
    /// Returns when the transport closes or errors, the keepalive times
    /// out, or stop is requested.
    async fn listen(&self, ws: WsStream) {
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::channel::<Message>(64);
        let outbound = Outbound::new(tx.clone());

        // Writer task: owns the sink, drains the outbound channel, then
        // attempts a bounded graceful close.
        let mut writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Message::Close(None))).await;
        });

        let mut ping_timer = tokio::time::interval_at(
            tokio::time::Instant::now() + self.ping_interval,
            self.ping_interval,
        );
        let mut pong_deadline: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                _ = self.shared.stop.cancelled() => {
                    tracing::info!("stop requested, closing connection");
                    break;
                }
                _ = ping_timer.tick() => {
                    if tx.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                    if pong_deadline.is_none() {
                        pong_deadline = Some(tokio::time::Instant::now() + self.ping_timeout);
                    }
                }
                _ = wait_until(pong_deadline) => {
                    tracing::warn!("keepalive timeout, dropping connection");
                    break;
                }
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        self.router.route(&text, &outbound).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        pong_deadline = None;
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("server closed connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "transport error");
                        break;
                    }
                    None => break,
                }
            }
        }

        // Dropping every sender ends the writer; give it one close timeout.
        drop(outbound);
        drop(tx);
        if tokio::time::timeout(CLOSE_TIMEOUT, &mut writer).await.is_err() {
            writer.abort();
        }
    }
}

/// Pending forever when there is no deadline, so it never wins the select.
async fn wait_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_defaults_and_idempotent_stop() {
        let shared = Arc::new(Shared::new());
        let handle = NodeHandle { shared };
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert!(!handle.is_connected());

        handle.stop();
        handle.stop();
        assert!(!handle.shared.is_running());
        assert!(handle.shared.stop.is_cancelled());
    }

    #[test]
    fn state_transitions_are_visible_through_handle() {
        let shared = Arc::new(Shared::new());
        let handle = NodeHandle {
            shared: shared.clone(),
        };
        shared.set_state(ConnectionState::Connecting);
        assert_eq!(handle.state(), ConnectionState::Connecting);
        shared.set_state(ConnectionState::Stopped);
        assert_eq!(handle.state(), ConnectionState::Stopped);
    }
}
