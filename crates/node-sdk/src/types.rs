//! Error types for the node SDK.

/// Errors a task handler can return.
///
/// The Task Engine converts these into a `failed` [`ResultEnvelope`]
/// (`octo_protocol::ResultEnvelope`); they never propagate past
/// [`TaskProcessor::process`](crate::tasks::TaskProcessor::process).
#[derive(thiserror::Error, Debug, Clone)]
pub enum TaskError {
    #[error("invalid_args: {0}")]
    InvalidArgs(String),
    #[error("failed: {0}")]
    Failed(String),
}

/// Top-level SDK error.
#[derive(thiserror::Error, Debug)]
pub enum NodeError {
    #[error("config: {0}")]
    Config(String),

    /// The control server refused or garbled the endpoint-resolution call.
    #[error("endpoint resolution failed: {0}")]
    Resolve(String),

    /// Transport-level failure on the resolution call.
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The peer accepted TCP but never completed the WebSocket upgrade.
    #[error("websocket handshake timed out")]
    HandshakeTimeout,

    /// Fatal: every reconnect attempt in an episode failed. The client is
    /// `Stopped` and requires an external restart.
    #[error("reconnect budget exhausted after {0} attempts")]
    ReconnectExhausted(u32),
}
