//! `octo-node-sdk` — persistent-connection agent for the OctoHub control
//! server.
//!
//! A node authenticates with an HMAC-SHA256 signature, exchanges its pc_id
//! for a WebSocket URL, holds that connection open, and executes dispatched
//! tasks, sending results back over the same channel. This crate owns the
//! connection lifecycle and message/task dispatch; process bootstrap, env
//! configuration, and log output live in the consuming binary.
//!
//! # Connection flow
//!
//! 1. `GET /node/ws?pc_id=<id>` with `X-Signature`/`X-Timestamp`/`X-Nonce`
//!    headers, returning the WebSocket URL
//! 2. Connect and listen; on `connected`, reply `node_ready`
//! 3. Main loop, strictly in arrival order:
//!    - `task` → task engine → `task_result`
//!    - `ping` → `pong`
//!    - `disconnect_notification` → logged
//!    - caller-registered types supersede all of the above
//! 4. On disconnect: reconnect at a fixed interval with a bounded
//!    per-episode attempt budget; exhaustion stops the client for good
//!
//! # Example
//!
//! ```rust,no_run
//! use octo_node_sdk::NodeClient;
//!
//! # async fn demo() -> Result<(), octo_node_sdk::NodeError> {
//! let client = NodeClient::builder()
//!     .server_host("hub.example.com")
//!     .server_port(8080)
//!     .signature_key(std::env::var("OCTOHUB_SIGNATURE_KEY").unwrap())
//!     .build()?;
//!
//! let handle = client.handle();
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     handle.stop();
//! });
//!
//! client.run().await
//! # }
//! ```
//!
//! # Concurrency model
//!
//! One logical worker per client: a single listen loop routes frames one at
//! a time, so a slow task handler delays everything behind it by design.
//! Handlers that want concurrency spawn their own background work and
//! return immediately.

pub mod auth;
pub mod builder;
pub mod client;
pub mod identity;
pub mod reconnect;
pub mod router;
pub mod tasks;
pub mod types;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use auth::{EndpointResolver, SignatureAuth};
pub use builder::{NodeClientBuilder, PLACEHOLDER_SIGNATURE_KEY};
pub use client::{ConnectionState, NodeClient, NodeHandle};
pub use identity::generate_pc_id;
pub use reconnect::ReconnectPolicy;
pub use router::{MessageHandler, MessageRouter, Outbound};
pub use tasks::{TaskHandler, TaskProcessor, DEFAULT_TASK_TYPE};
pub use types::{NodeError, TaskError};

// Re-export octo-protocol types so nodes never need to import it directly.
pub use octo_protocol::{OutboundFrame, ResultEnvelope, TaskEnvelope, TaskStatus};
