//! Relay transport collaborator and its HTTP implementation

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::types::{KeyVersion, RemotePublicKeys, Slug, WireMessage};

pub const HEADER_SOURCE_SLUG: &str = "X-Source-Slug";
pub const HEADER_DESTINATION_SLUG: &str = "X-Destination-Slug";
pub const HEADER_KEY_VERSION: &str = "X-Key-Version";

/// Path, relative to a relay base URL, that serves the counterparty's public keys
pub const PUBLIC_KEY_PATH: &str = "public-key";

/// Routing headers sent alongside every exchange message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayHeaders {
    pub source_slug: Slug,
    pub destination_slug: Slug,
    pub key_version: KeyVersion,
}

impl RelayHeaders {
    pub fn pairs(&self) -> [(&'static str, &str); 3] {
        [
            (HEADER_SOURCE_SLUG, self.source_slug.as_str()),
            (HEADER_DESTINATION_SLUG, self.destination_slug.as_str()),
            (HEADER_KEY_VERSION, self.key_version.as_str()),
        ]
    }
}

/// How exchange messages reach the counterparty. Callers bound every call
/// with their own timeout.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Deliver `message` and return the counterparty's reply
    async fn send(
        &self,
        url: &str,
        headers: &RelayHeaders,
        message: &WireMessage,
    ) -> Result<WireMessage>;

    /// Fetch the counterparty's published public keys from `base_url`
    async fn fetch_public_keys(&self, base_url: &str) -> Result<RemotePublicKeys>;
}

/// `{"data": ..., "error": bool}` as returned by the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> RelayResponse<T> {
    pub fn into_data(self) -> Result<T> {
        if self.error {
            return Err(BridgeError::Transport(format!(
                "relay reported an error: {}",
                self.message.as_deref().unwrap_or("no detail")
            )));
        }
        self.data
            .ok_or_else(|| BridgeError::Transport("relay response has no data".into()))
    }
}

/// Decode a successful relay reply. Once the relay has answered 2xx, a body
/// that is not a well-formed exchange message is a format failure.
pub fn decode_reply(body: &[u8]) -> Result<WireMessage> {
    let response: RelayResponse<WireMessage> = serde_json::from_slice(body)
        .map_err(|e| BridgeError::Format(format!("malformed relay reply: {}", e)))?;
    let reply = response.into_data()?;
    reply.validate()?;
    Ok(reply)
}

/// `base` joined with `path`, tolerating a trailing slash on `base`
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Relay transport over HTTPS (rustls)
#[derive(Clone)]
pub struct HttpRelayTransport {
    client: Client,
}

impl HttpRelayTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RelayTransport for HttpRelayTransport {
    async fn send(
        &self,
        url: &str,
        headers: &RelayHeaders,
        message: &WireMessage,
    ) -> Result<WireMessage> {
        let mut request = self.client.post(url).json(message);
        for (name, value) in headers.pairs() {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        let status = response.status();
        debug!(url, %status, "relay responded");

        let body = response.bytes().await.map_err(|e| {
            BridgeError::Transport(format!("unreadable relay response ({}): {}", status, e))
        })?;
        if !status.is_success() {
            let detail = serde_json::from_slice::<RelayResponse<serde_json::Value>>(&body)
                .ok()
                .and_then(|r| r.message);
            return Err(BridgeError::Transport(format!(
                "relay returned {}: {}",
                status,
                detail.as_deref().unwrap_or("no detail")
            )));
        }

        decode_reply(&body)
    }

    async fn fetch_public_keys(&self, base_url: &str) -> Result<RemotePublicKeys> {
        let url = join_url(base_url, PUBLIC_KEY_PATH);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BridgeError::Transport(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let body: RelayResponse<RemotePublicKeys> = response
            .json()
            .await
            .map_err(|e| BridgeError::Transport(format!("unreadable key response: {}", e)))?;
        body.into_data()
    }
}
