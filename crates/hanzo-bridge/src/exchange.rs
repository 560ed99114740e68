//! Exchange orchestrator
//!
//! One exchange is a sequential pipeline:
//!
//! ```text
//! BuildRequest -> EncryptSign -> TransportSend -> AwaitResponse -> DecryptVerify -> Done
//! ```
//!
//! Any stage can move the exchange to `Failed`, which is absorbing and is
//! reported as an [`ExchangeError`] naming the stage. Nothing is retried: a
//! retry would need a fresh key, nonce and signature anyway, so callers start
//! a new exchange instead.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hanzo_bridge_crypto::{CryptoError, ExchangeKeys, HybridCipher, SealedMessage};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, ExchangeError, ExchangeStage};
use crate::registry::KeyRegistry;
use crate::store::FsKeyStore;
use crate::transport::{RelayHeaders, RelayTransport};
use crate::types::{KeyVersion, Slug, WireMessage};

/// Where an exchange currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Running(ExchangeStage),
    Done,
    Failed(ExchangeStage),
}

/// An outbound request from an application to a bank
#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    pub application: Slug,
    pub key_version: KeyVersion,
    pub bank: Slug,
    /// Relay endpoint that accepts the wire message
    pub relay_url: String,
    /// Serialized request payload
    pub payload: Vec<u8>,
}

/// Tracks the state of one exchange and turns stage failures into [`ExchangeError`]s
struct Pipeline<'a> {
    request: &'a ExchangeRequest,
    state: ExchangeState,
}

impl<'a> Pipeline<'a> {
    fn new(request: &'a ExchangeRequest) -> Self {
        Self {
            request,
            state: ExchangeState::Running(ExchangeStage::BuildRequest),
        }
    }

    fn enter(&mut self, stage: ExchangeStage) {
        self.state = ExchangeState::Running(stage);
        debug!(
            slug = %self.request.application,
            bank = %self.request.bank,
            stage = %stage,
            "exchange stage"
        );
    }

    fn stage(&self) -> ExchangeStage {
        match self.state {
            ExchangeState::Running(stage) | ExchangeState::Failed(stage) => stage,
            // fail() is never called after finish()
            ExchangeState::Done => ExchangeStage::DecryptVerify,
        }
    }

    fn fail(&mut self, err: impl Into<BridgeError>) -> ExchangeError {
        let stage = self.stage();
        self.state = ExchangeState::Failed(stage);
        let err = ExchangeError::new(stage, err);

        if err.source.is_rejection() {
            warn!(
                slug = %self.request.application,
                bank = %self.request.bank,
                key_version = %self.request.key_version,
                stage = %stage,
                "counterparty message rejected"
            );
        } else {
            warn!(
                slug = %self.request.application,
                bank = %self.request.bank,
                stage = %stage,
                error = %err.source,
                "exchange failed"
            );
        }
        err
    }

    fn finish(&mut self) {
        self.state = ExchangeState::Done;
    }
}

/// Runs exchanges for any number of application/bank pairs
pub struct ExchangeOrchestrator {
    store: FsKeyStore,
    registry: Arc<dyn KeyRegistry>,
    transport: Arc<dyn RelayTransport>,
    cipher: HybridCipher,
    timeout: Duration,
}

impl ExchangeOrchestrator {
    pub fn new(
        store: FsKeyStore,
        registry: Arc<dyn KeyRegistry>,
        transport: Arc<dyn RelayTransport>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            transport,
            cipher: HybridCipher::new(),
            timeout,
        }
    }

    /// Encrypt and sign `request.payload`, relay it, then verify and decrypt the reply
    pub async fn exchange(&self, request: &ExchangeRequest) -> Result<Vec<u8>, ExchangeError> {
        let mut pipeline = Pipeline::new(request);

        // BuildRequest
        let keys = self
            .resolve_keys(request)
            .await
            .map_err(|e| pipeline.fail(e))?;

        pipeline.enter(ExchangeStage::EncryptSign);
        let sealed = self
            .cipher
            .seal(&request.payload, &keys)
            .map_err(|e| pipeline.fail(e))?;

        let outbound = WireMessage {
            from: request.application.to_string(),
            to: request.bank.to_string(),
            message: sealed.envelope,
            signature: sealed.signature,
            key_version: request.key_version.to_string(),
        };
        let headers = RelayHeaders {
            source_slug: request.application.clone(),
            destination_slug: request.bank.clone(),
            key_version: request.key_version.clone(),
        };

        pipeline.enter(ExchangeStage::TransportSend);
        let send = self.transport.send(&request.relay_url, &headers, &outbound);
        let reply = match tokio::time::timeout(self.timeout, send).await {
            Ok(reply) => reply.map_err(|e| pipeline.fail(e))?,
            Err(_) => {
                pipeline.enter(ExchangeStage::AwaitResponse);
                return Err(pipeline.fail(BridgeError::Transport(format!(
                    "no response within {:?}",
                    self.timeout
                ))));
            }
        };

        pipeline.enter(ExchangeStage::AwaitResponse);
        check_reply_addressing(request, &reply).map_err(|e| pipeline.fail(e))?;

        pipeline.enter(ExchangeStage::DecryptVerify);
        let plaintext = self
            .cipher
            .open(
                &SealedMessage {
                    envelope: reply.message,
                    signature: reply.signature,
                },
                &keys,
            )
            .map_err(|e: CryptoError| pipeline.fail(e))?;

        pipeline.finish();
        info!(
            slug = %request.application,
            bank = %request.bank,
            key_version = %request.key_version,
            "exchange completed"
        );
        Ok(plaintext)
    }

    /// JSON in, JSON out
    pub async fn exchange_json<Req, Resp>(
        &self,
        application: &Slug,
        key_version: &KeyVersion,
        bank: &Slug,
        relay_url: &str,
        payload: &Req,
    ) -> Result<Resp, ExchangeError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(payload)
            .map_err(|e| ExchangeError::new(ExchangeStage::BuildRequest, e))?;
        let request = ExchangeRequest {
            application: application.clone(),
            key_version: key_version.clone(),
            bank: bank.clone(),
            relay_url: relay_url.to_string(),
            payload: body,
        };

        let reply = self.exchange(&request).await?;
        serde_json::from_slice(&reply)
            .map_err(|e| ExchangeError::new(ExchangeStage::DecryptVerify, e))
    }

    async fn resolve_keys(&self, request: &ExchangeRequest) -> crate::Result<ExchangeKeys> {
        let record = self
            .registry
            .resolve_application_key_paths(&request.application, &request.key_version)
            .await?;
        if !record.validity.is_active_at(Utc::now()) {
            return Err(BridgeError::KeyInactive {
                slug: request.application.to_string(),
                key_version: request.key_version.to_string(),
            });
        }
        self.registry.resolve_bank_key_paths(&request.bank).await?;

        let store = self.store.clone();
        let application = request.application.clone();
        let version = request.key_version.clone();
        let bank = request.bank.clone();

        tokio::task::spawn_blocking(move || -> crate::Result<ExchangeKeys> {
            let own = store.load_application_keys(&application, &version)?;
            let peer = store.load_bank_keys(&bank)?;
            Ok(ExchangeKeys {
                own_rsa_private: own.rsa_private,
                own_signing: own.signing,
                peer_rsa_public: peer.rsa_public,
                peer_verifying: peer.verifying,
            })
        })
        .await?
    }
}

/// The reply must come from the bank we addressed, to us, under our key version
fn check_reply_addressing(request: &ExchangeRequest, reply: &WireMessage) -> crate::Result<()> {
    reply.validate()?;

    if reply.from != request.bank.as_str() || reply.to != request.application.as_str() {
        return Err(BridgeError::Format(format!(
            "reply addressed from {:?} to {:?}",
            reply.from, reply.to
        )));
    }
    if reply.key_version != request.key_version.as_str() {
        return Err(BridgeError::Format(format!(
            "reply uses key version {:?}",
            reply.key_version
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ExchangeRequest {
        ExchangeRequest {
            application: Slug::new("acme").unwrap(),
            key_version: KeyVersion::new("v1").unwrap(),
            bank: Slug::new("firstbank").unwrap(),
            relay_url: "https://relay.example/exchange".into(),
            payload: b"{}".to_vec(),
        }
    }

    fn reply(from: &str, to: &str, key_version: &str) -> WireMessage {
        WireMessage {
            from: from.into(),
            to: to.into(),
            message: "a-b-c".into(),
            signature: "sig".into(),
            key_version: key_version.into(),
        }
    }

    #[test]
    fn test_reply_addressing() {
        let request = request();
        assert!(check_reply_addressing(&request, &reply("firstbank", "acme", "v1")).is_ok());

        for bad in [
            reply("otherbank", "acme", "v1"),
            reply("firstbank", "other", "v1"),
            reply("firstbank", "acme", "v2"),
            reply("firstbank", "acme", ""),
        ] {
            assert!(matches!(
                check_reply_addressing(&request, &bad),
                Err(BridgeError::Format(_))
            ));
        }
    }

    #[test]
    fn test_pipeline_records_failed_stage() {
        let request = request();
        let mut pipeline = Pipeline::new(&request);
        pipeline.enter(ExchangeStage::TransportSend);

        let err = pipeline.fail(BridgeError::Transport("refused".into()));
        assert_eq!(err.stage, ExchangeStage::TransportSend);
        assert_eq!(
            pipeline.state,
            ExchangeState::Failed(ExchangeStage::TransportSend)
        );
    }
}
