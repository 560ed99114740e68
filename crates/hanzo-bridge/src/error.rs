//! Error types for the bridge

use std::fmt;

use hanzo_bridge_crypto::{CryptoError, KeyError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Key resolution failed: {0}")]
    KeyResolution(String),

    #[error("Key version {key_version} of {slug} is not active")]
    KeyInactive { slug: String, key_version: String },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Malformed wire message: {0}")]
    Format(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// True when a counterparty message failed signature or decryption checks
    pub fn is_rejection(&self) -> bool {
        matches!(self, BridgeError::Crypto(e) if e.is_rejection())
    }
}

impl From<tokio::task::JoinError> for BridgeError {
    fn from(err: tokio::task::JoinError) -> Self {
        BridgeError::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Working stages of one request/response exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeStage {
    BuildRequest,
    EncryptSign,
    TransportSend,
    AwaitResponse,
    DecryptVerify,
}

impl fmt::Display for ExchangeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BuildRequest => "build_request",
            Self::EncryptSign => "encrypt_sign",
            Self::TransportSend => "transport_send",
            Self::AwaitResponse => "await_response",
            Self::DecryptVerify => "decrypt_verify",
        };
        f.write_str(name)
    }
}

/// An exchange that ended in the failed state
#[derive(Error, Debug)]
#[error("exchange failed at {stage}: {source}")]
pub struct ExchangeError {
    pub stage: ExchangeStage,
    pub source: BridgeError,
}

impl ExchangeError {
    pub fn new(stage: ExchangeStage, source: impl Into<BridgeError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}
