//! Shared fixtures: a simulated bank on the far side of the relay

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hanzo_bridge::{
    BridgeConfig, BridgeError, FsKeyStore, KeyProvisioningService, MemoryKeyRegistry,
    RelayHeaders, RelayTransport, RemotePublicKeys, Result, Slug, WireMessage,
};
use hanzo_bridge_crypto::{
    generate_ed25519_pair, generate_rsa_pair, public_key_to_base64, public_key_to_pem,
    ExchangeKeys, HybridCipher, ParsedKey, RsaPrivateKey, RsaPublicKey, SealedMessage,
    SigningKey, VerifyingKey,
};
use tempfile::TempDir;

pub const RELAY_URL: &str = "https://relay.test/exchange";

pub fn slug(value: &str) -> Slug {
    Slug::new(value).unwrap()
}

/// A bank's own key material
pub struct BankIdentity {
    pub slug: Slug,
    pub rsa_private: RsaPrivateKey,
    pub rsa_public: RsaPublicKey,
    pub signing: SigningKey,
    pub verifying: VerifyingKey,
}

impl BankIdentity {
    pub fn generate(slug_value: &str, rsa_bits: usize) -> Self {
        let (rsa_private, rsa_public) = generate_rsa_pair(rsa_bits).unwrap();
        let (signing, verifying) = generate_ed25519_pair().unwrap();
        Self {
            slug: slug(slug_value),
            rsa_private,
            rsa_public,
            signing,
            verifying,
        }
    }

    pub fn remote_public_keys(&self) -> RemotePublicKeys {
        RemotePublicKeys {
            encrypting_key: public_key_to_base64(&ParsedKey::from(self.rsa_public.clone()))
                .unwrap(),
            signing_key: public_key_to_base64(&ParsedKey::from(self.verifying)).unwrap(),
        }
    }

    /// Write the public keys as PEM files, as a bank would hand them over
    pub fn write_public_pems(&self, dir: &Path) -> (PathBuf, PathBuf) {
        std::fs::create_dir_all(dir).unwrap();
        let rsa = dir.join("bank_rsa_public_key.pem");
        let ed = dir.join("bank_ed25519_public_key.pem");
        std::fs::write(
            &rsa,
            public_key_to_pem(&ParsedKey::from(self.rsa_public.clone())).unwrap(),
        )
        .unwrap();
        std::fs::write(&ed, public_key_to_pem(&ParsedKey::from(self.verifying)).unwrap())
            .unwrap();
        (rsa, ed)
    }
}

/// Serves a fixed set of public keys and refuses exchanges
pub struct KeyServer {
    pub keys: RemotePublicKeys,
    pub fetches: AtomicUsize,
}

impl KeyServer {
    pub fn new(keys: RemotePublicKeys) -> Self {
        Self {
            keys,
            fetches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RelayTransport for KeyServer {
    async fn send(
        &self,
        _url: &str,
        _headers: &RelayHeaders,
        _message: &WireMessage,
    ) -> Result<WireMessage> {
        Err(BridgeError::Transport("key server does not relay messages".into()))
    }

    async fn fetch_public_keys(&self, _base_url: &str) -> Result<RemotePublicKeys> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.keys.clone())
    }
}

/// How the simulated bank answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankBehaviour {
    Respond,
    CorruptSignature,
    ReplyToSomeoneElse,
    Stall(Duration),
}

/// Opens requests with the bank's keys and seals a reply for the application
pub struct MockBank {
    slug: Slug,
    keys: ExchangeKeys,
    behaviour: BankBehaviour,
    pub calls: AtomicUsize,
    pub received: Mutex<Vec<(RelayHeaders, Vec<u8>)>>,
    pub envelopes: Mutex<Vec<String>>,
}

impl MockBank {
    pub fn new(
        bank: &BankIdentity,
        application_rsa: RsaPublicKey,
        application_verifying: VerifyingKey,
        behaviour: BankBehaviour,
    ) -> Self {
        Self {
            slug: bank.slug.clone(),
            keys: ExchangeKeys {
                own_rsa_private: bank.rsa_private.clone(),
                own_signing: bank.signing.clone(),
                peer_rsa_public: application_rsa,
                peer_verifying: application_verifying,
            },
            behaviour,
            calls: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
            envelopes: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Reply body for a request body
    pub fn reply_for(request: &[u8]) -> Vec<u8> {
        let request: serde_json::Value = serde_json::from_slice(request).unwrap();
        serde_json::to_vec(&serde_json::json!({ "status": "accepted", "echo": request })).unwrap()
    }
}

#[async_trait]
impl RelayTransport for MockBank {
    async fn send(
        &self,
        _url: &str,
        headers: &RelayHeaders,
        message: &WireMessage,
    ) -> Result<WireMessage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.envelopes.lock().unwrap().push(message.message.clone());

        if let BankBehaviour::Stall(delay) = self.behaviour {
            tokio::time::sleep(delay).await;
        }

        let cipher = HybridCipher::new();
        let request = cipher.open(
            &SealedMessage {
                envelope: message.message.clone(),
                signature: message.signature.clone(),
            },
            &self.keys,
        )?;
        self.received
            .lock()
            .unwrap()
            .push((headers.clone(), request.clone()));

        let sealed = cipher.seal(&Self::reply_for(&request), &self.keys)?;
        let mut signature = sealed.signature;
        if self.behaviour == BankBehaviour::CorruptSignature {
            let mut chars: Vec<char> = signature.chars().collect();
            chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
            signature = chars.into_iter().collect();
        }

        let to = if self.behaviour == BankBehaviour::ReplyToSomeoneElse {
            "someone-else".to_string()
        } else {
            message.from.clone()
        };

        Ok(WireMessage {
            from: self.slug.to_string(),
            to,
            message: sealed.envelope,
            signature,
            key_version: message.key_version.clone(),
        })
    }

    async fn fetch_public_keys(&self, _base_url: &str) -> Result<RemotePublicKeys> {
        Err(BridgeError::Transport("not a key server".into()))
    }
}

/// Temp data root, in-memory registry and a provisioning service wired to a key server
pub struct Harness {
    pub dir: TempDir,
    pub config: BridgeConfig,
    pub store: FsKeyStore,
    pub registry: Arc<MemoryKeyRegistry>,
    pub key_server: Arc<KeyServer>,
    pub service: KeyProvisioningService,
}

impl Harness {
    pub fn new(rsa_key_bits: usize, bank_keys: RemotePublicKeys) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig {
            data_root: dir.path().join("data"),
            rsa_key_bits,
            ..Default::default()
        };
        config.validate().unwrap();

        let store = FsKeyStore::new(&config.data_root, config.validator());
        let registry = Arc::new(MemoryKeyRegistry::new());
        let key_server = Arc::new(KeyServer::new(bank_keys));
        let service = KeyProvisioningService::new(
            &config,
            store.clone(),
            registry.clone(),
            key_server.clone(),
        );

        Self {
            dir,
            config,
            store,
            registry,
            key_server,
            service,
        }
    }
}
