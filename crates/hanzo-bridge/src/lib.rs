//! Hanzo bank bridge
//!
//! Lets a registered application exchange payloads with a registered bank
//! through an untrusted relay. Builds on `hanzo-bridge-crypto` for the hybrid
//! cipher and adds:
//!
//! - [`store::FsKeyStore`]: versioned PEM key files on disk
//! - [`registry::KeyRegistry`]: which slugs and key versions exist
//! - [`provisioning::KeyProvisioningService`]: generate, import and fetch keys
//! - [`exchange::ExchangeOrchestrator`]: the encrypt, relay, verify, decrypt pipeline
//! - [`transport::HttpRelayTransport`]: the relay over HTTPS

pub mod config;
pub mod error;
pub mod exchange;
pub mod provisioning;
pub mod registry;
pub mod store;
pub mod transport;
pub mod types;

pub use config::BridgeConfig;
pub use error::{BridgeError, ExchangeError, ExchangeStage, Result};
pub use exchange::{ExchangeOrchestrator, ExchangeRequest, ExchangeState};
pub use provisioning::{ApplicationKeyFiles, KeyProvisioningService};
pub use registry::{FileKeyRegistry, KeyRegistry, MemoryKeyRegistry};
pub use store::{ApplicationKeys, BankKeys, FsKeyStore};
pub use transport::{HttpRelayTransport, RelayHeaders, RelayTransport};
pub use types::{
    ApplicationKeyPaths, ApplicationPublicKeys, ApplicationRecord, BankKeyPaths, BankRecord,
    KeyValidity, KeyVersion, RemotePublicKeys, Slug, WireMessage,
};
