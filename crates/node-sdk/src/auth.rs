//! Signature authentication and WebSocket endpoint resolution.
//!
//! The control server authenticates nodes with an HMAC-SHA256 signature
//! over a canonical request string. The same signer backs the one HTTP
//! call the SDK makes: exchanging a pc_id for a WebSocket URL.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use octo_protocol::ResolveResponse;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use sha2::Sha256;

use crate::types::NodeError;

type HmacSha256 = Hmac<Sha256>;

/// URI path of the endpoint-resolution call, also part of the signed string.
const RESOLVE_URI: &str = "/node/ws";

/// Fixed offset added to the millisecond nonce so that a resolution call and
/// any other signed call issued within the same millisecond still differ.
const NONCE_OFFSET: i64 = 999;

const RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Keyed signer for authenticated requests to the control server.
///
/// The secret is held for the process lifetime and never logged.
#[derive(Clone)]
pub struct SignatureAuth {
    signature_key: String,
}

impl SignatureAuth {
    pub fn new(signature_key: impl Into<String>) -> Self {
        Self {
            signature_key: signature_key.into(),
        }
    }

    /// Sign one request. Deterministic: the same inputs and key always
    /// produce the same base64 digest. Params are sorted by key internally,
    /// so signer and verifier agree regardless of insertion order.
    pub fn sign(
        &self,
        method: &str,
        uri: &str,
        params: &[(&str, &str)],
        timestamp: &str,
        nonce: &str,
    ) -> String {
        let canonical = canonical_string(method, uri, params, timestamp, nonce);
        let mut mac = HmacSha256::new_from_slice(self.signature_key.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(canonical.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    /// Headers for one authenticated call: `X-Signature`, `X-Timestamp`
    /// (Unix seconds), `X-Nonce` (Unix millis + offset), and a JSON
    /// content type. Reads the system clock, nothing else.
    pub fn auth_headers(&self, method: &str, uri: &str, params: &[(&str, &str)]) -> HeaderMap {
        let now = Utc::now();
        let timestamp = now.timestamp().to_string();
        let nonce = (now.timestamp_millis() + NONCE_OFFSET).to_string();
        let signature = self.sign(method, uri, params, &timestamp, &nonce);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        // Signature is base64, timestamp/nonce are decimal: always valid header values.
        if let Ok(v) = HeaderValue::from_str(&signature) {
            headers.insert("X-Signature", v);
        }
        if let Ok(v) = HeaderValue::from_str(&timestamp) {
            headers.insert("X-Timestamp", v);
        }
        if let Ok(v) = HeaderValue::from_str(&nonce) {
            headers.insert("X-Nonce", v);
        }
        headers
    }
}

/// `METHOD&URI&k1=v1&k2=v2&...&TIMESTAMP&NONCE`, params ascending by key,
/// empty segment when there are none. Must match the server's verifier
/// byte for byte.
fn canonical_string(
    method: &str,
    uri: &str,
    params: &[(&str, &str)],
    timestamp: &str,
    nonce: &str,
) -> String {
    let mut sorted: Vec<(&str, &str)> = params.to_vec();
    sorted.sort_by_key(|&(k, _)| k);
    let params_str = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    format!(
        "{}&{uri}&{params_str}&{timestamp}&{nonce}",
        method.to_uppercase()
    )
}

/// Exchanges a pc_id for a WebSocket URL via a signed HTTP call.
///
/// Every failure surfaces to the caller; retrying is the connection
/// manager's job.
pub struct EndpointResolver {
    http: reqwest::Client,
    auth: SignatureAuth,
}

impl EndpointResolver {
    pub fn new(auth: SignatureAuth) -> Result<Self, NodeError> {
        let http = reqwest::Client::builder()
            .timeout(RESOLVE_TIMEOUT)
            .build()
            .map_err(|e| NodeError::Config(format!("HTTP client build failed: {e}")))?;
        Ok(Self { http, auth })
    }

    /// `GET http://{host}:{port}/node/ws?pc_id={pc_id}` with auth headers.
    ///
    /// Fails on non-200 status, a non-zero application `errcode`, or a
    /// missing `data.wsUrl`.
    pub async fn resolve(&self, pc_id: &str, host: &str, port: u16) -> Result<String, NodeError> {
        let params = [("pc_id", pc_id)];
        let headers = self.auth.auth_headers("GET", RESOLVE_URI, &params);
        let url = format!("http://{host}:{port}{RESOLVE_URI}");

        let response = self
            .http
            .get(&url)
            .query(&params)
            .headers(headers)
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(NodeError::Resolve(format!("HTTP {status}: {body}")));
        }

        let body: ResolveResponse = response.json().await?;
        if body.errcode != 0 {
            return Err(NodeError::Resolve(format!(
                "server error {}: {}",
                body.errcode, body.errmsg
            )));
        }

        let ws_url = body
            .data
            .and_then(|d| d.ws_url)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| NodeError::Resolve("response is missing data.wsUrl".into()))?;

        tracing::info!(ws_url = %ws_url, "resolved WebSocket endpoint");
        Ok(ws_url)
    }
}
