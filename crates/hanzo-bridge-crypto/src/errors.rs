//! Error types for key handling and the hybrid cipher

use thiserror::Error;

/// Errors raised while loading, validating, generating or encoding key material.
///
/// Every variant names the key's origin (file path or a role label such as
/// `"bank rsa public key"`) and never the key bytes themselves.
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("key file not found: {path}")]
    NotFound { path: String },

    #[error("unsupported key file extension {extension:?}: {path}")]
    UnsupportedExtension { path: String, extension: String },

    #[error("key file could not be read: {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("PEM decode failed for {source_label}: {reason}")]
    PemDecodeFailure { source_label: String, reason: String },

    #[error("key parse failed for {source_label}: {reason}")]
    KeyParseFailure { source_label: String, reason: String },

    #[error("weak RSA key {source_label}: expected {expected_bits} bits, got {actual_bits}")]
    WeakKey {
        source_label: String,
        expected_bits: usize,
        actual_bits: usize,
    },

    #[error("invalid {algorithm} key size for {source_label}: expected {expected}, got {actual}")]
    InvalidKeySize {
        source_label: String,
        algorithm: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("unsupported key type for {source_label}: {found}")]
    UnsupportedKeyType { source_label: String, found: String },

    #[error("expected {expected}, found {found}")]
    UnexpectedKey {
        expected: &'static str,
        found: &'static str,
    },

    #[error("public key does not match private key: {source_label}")]
    PairMismatch { source_label: String },

    #[error("key generation failed: {0}")]
    Generation(String),

    #[error("key encoding failed: {0}")]
    Encoding(String),
}

/// Errors raised by the hybrid cipher.
///
/// `Authentication` and `Decryption` render the same text. Local code can
/// still match on the variant.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("malformed message: {0}")]
    Format(String),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("message rejected")]
    Authentication,

    #[error("message rejected")]
    Decryption,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("random source failure: {0}")]
    Rng(String),
}

impl CryptoError {
    /// True for failures that must be handled as a discarded, untrusted message.
    pub fn is_rejection(&self) -> bool {
        matches!(self, CryptoError::Authentication | CryptoError::Decryption)
    }
}

pub type Result<T> = std::result::Result<T, CryptoError>;
