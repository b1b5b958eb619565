//! Builder pattern for constructing a [`NodeClient`].

use std::time::Duration;

use crate::auth::{EndpointResolver, SignatureAuth};
use crate::client::NodeClient;
use crate::identity::generate_pc_id;
use crate::reconnect::ReconnectPolicy;
use crate::router::MessageRouter;
use crate::types::NodeError;

/// Well-known placeholder secret. Building a client with this key logs a
/// warning; real deployments must supply their own.
pub const PLACEHOLDER_SIGNATURE_KEY: &str = "change-me";

/// Fluent builder for [`NodeClient`].
///
/// # Example
///
/// ```rust,no_run
/// # use octo_node_sdk::NodeClientBuilder;
/// let client = NodeClientBuilder::new()
///     .server_host("hub.example.com")
///     .server_port(8080)
///     .signature_key("a-real-secret")
///     .reconnect(std::time::Duration::from_secs(5), 10)
///     .build()
///     .unwrap();
/// ```
pub struct NodeClientBuilder {
    server_host: String,
    server_port: u16,
    signature_key: Option<String>,
    pc_id: Option<String>,
    reconnect: ReconnectPolicy,
    ping_interval: Duration,
    ping_timeout: Duration,
}

impl NodeClientBuilder {
    pub fn new() -> Self {
        Self {
            server_host: "localhost".into(),
            server_port: 8080,
            signature_key: None,
            pc_id: None,
            reconnect: ReconnectPolicy::default(),
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
        }
    }

    /// Control server host (default `localhost`).
    pub fn server_host(mut self, host: impl Into<String>) -> Self {
        self.server_host = host.into();
        self
    }

    /// Control server HTTP port (default 8080).
    pub fn server_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    /// Shared signing secret. Required; never logged.
    pub fn signature_key(mut self, key: impl Into<String>) -> Self {
        self.signature_key = Some(key.into());
        self
    }

    /// Supply a node identity instead of deriving one from host attributes.
    pub fn pc_id(mut self, pc_id: impl Into<String>) -> Self {
        self.pc_id = Some(pc_id.into());
        self
    }

    /// Fixed reconnect interval and per-episode attempt budget
    /// (default 5 s / 10).
    pub fn reconnect(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.reconnect = ReconnectPolicy {
            interval,
            max_attempts,
        };
        self
    }

    /// Keepalive ping interval (default 30 s).
    pub fn ping_interval(mut self, d: Duration) -> Self {
        self.ping_interval = d;
        self
    }

    /// How long an unanswered keepalive ping may stand before the
    /// connection is considered dead (default 10 s).
    pub fn ping_timeout(mut self, d: Duration) -> Self {
        self.ping_timeout = d;
        self
    }

    /// Build the [`NodeClient`].
    pub fn build(self) -> Result<NodeClient, NodeError> {
        let signature_key = self
            .signature_key
            .ok_or_else(|| NodeError::Config("signature_key is required".into()))?;
        if signature_key == PLACEHOLDER_SIGNATURE_KEY {
            tracing::warn!(
                "signature key is the well-known placeholder, set a real secret in production"
            );
        }

        let pc_id = self.pc_id.unwrap_or_else(generate_pc_id);
        let resolver = EndpointResolver::new(SignatureAuth::new(signature_key))?;
        let router = MessageRouter::new(&pc_id);

        Ok(NodeClient {
            server_host: self.server_host,
            server_port: self.server_port,
            pc_id,
            reconnect: self.reconnect,
            ping_interval: self.ping_interval,
            ping_timeout: self.ping_timeout,
            resolver,
            router,
            shared: NodeClient::new_shared(),
        })
    }
}

impl Default for NodeClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_signature_key() {
        let err = NodeClientBuilder::new().build().unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }

    #[test]
    fn build_generates_pc_id_when_unset() {
        let client = NodeClientBuilder::new()
            .signature_key("secret")
            .build()
            .unwrap();
        assert!(client.pc_id().starts_with("node_"));
    }

    #[test]
    fn build_keeps_supplied_pc_id() {
        let client = NodeClientBuilder::new()
            .signature_key("secret")
            .pc_id("node_fixed")
            .build()
            .unwrap();
        assert_eq!(client.pc_id(), "node_fixed");
    }
}
