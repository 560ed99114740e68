//! Key algorithms, roles and the parsed key sum type

use std::fmt;

use ed25519_dalek::{SigningKey, VerifyingKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::errors::KeyError;

/// RSA modulus size required for confidentiality keys unless configured otherwise.
pub const DEFAULT_RSA_KEY_BITS: usize = 3072;

/// Smallest modulus accepted for generation or configuration.
pub const MIN_RSA_KEY_BITS: usize = 2048;

/// Ed25519 seed length as stored inside a PKCS#8 document.
pub const ED25519_SEED_LEN: usize = 32;

/// Expanded Ed25519 private key length (seed followed by public key).
pub const ED25519_PRIVATE_KEY_LEN: usize = 64;

pub const ED25519_PUBLIC_KEY_LEN: usize = 32;

/// Key algorithms understood by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    /// RSA, used only for OAEP key transport
    Rsa,
    /// Ed25519, used only for message signatures
    Ed25519,
}

impl KeyAlgorithm {
    /// File name prefix used by the key store layout
    pub fn file_prefix(&self) -> &'static str {
        match self {
            Self::Rsa => "rsa",
            Self::Ed25519 => "ed25519",
        }
    }

    pub fn purpose(&self) -> KeyPurpose {
        match self {
            Self::Rsa => KeyPurpose::Encryption,
            Self::Ed25519 => KeyPurpose::Signing,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa => write!(f, "RSA"),
            Self::Ed25519 => write!(f, "Ed25519"),
        }
    }
}

/// Which half of a key pair a file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyRole {
    Private,
    Public,
}

impl KeyRole {
    /// PEM label expected for this role
    pub fn pem_label(&self) -> &'static str {
        match self {
            Self::Private => "PRIVATE KEY",
            Self::Public => "PUBLIC KEY",
        }
    }

    pub fn file_suffix(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
        }
    }
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_suffix())
    }
}

/// What a key pair is used for in the exchange protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPurpose {
    Encryption,
    Signing,
}

/// A validated key of one of the four shapes the protocol uses.
///
/// Conversions into a concrete key type fail closed with
/// [`KeyError::UnexpectedKey`] rather than guessing.
#[derive(Clone)]
pub enum ParsedKey {
    RsaPrivate(RsaPrivateKey),
    RsaPublic(RsaPublicKey),
    Ed25519Private(SigningKey),
    Ed25519Public(VerifyingKey),
}

impl ParsedKey {
    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            Self::RsaPrivate(_) | Self::RsaPublic(_) => KeyAlgorithm::Rsa,
            Self::Ed25519Private(_) | Self::Ed25519Public(_) => KeyAlgorithm::Ed25519,
        }
    }

    pub fn role(&self) -> KeyRole {
        match self {
            Self::RsaPrivate(_) | Self::Ed25519Private(_) => KeyRole::Private,
            Self::RsaPublic(_) | Self::Ed25519Public(_) => KeyRole::Public,
        }
    }

    /// Short human readable kind, safe to log
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RsaPrivate(_) => "RSA private key",
            Self::RsaPublic(_) => "RSA public key",
            Self::Ed25519Private(_) => "Ed25519 private key",
            Self::Ed25519Public(_) => "Ed25519 public key",
        }
    }

    /// The public half of this key. Public keys return a copy of themselves.
    pub fn to_public(&self) -> ParsedKey {
        match self {
            Self::RsaPrivate(k) => Self::RsaPublic(k.to_public_key()),
            Self::RsaPublic(k) => Self::RsaPublic(k.clone()),
            Self::Ed25519Private(k) => Self::Ed25519Public(k.verifying_key()),
            Self::Ed25519Public(k) => Self::Ed25519Public(*k),
        }
    }

    pub fn into_rsa_private(self) -> Result<RsaPrivateKey, KeyError> {
        match self {
            Self::RsaPrivate(k) => Ok(k),
            other => Err(other.unexpected("RSA private key")),
        }
    }

    pub fn into_rsa_public(self) -> Result<RsaPublicKey, KeyError> {
        match self {
            Self::RsaPublic(k) => Ok(k),
            other => Err(other.unexpected("RSA public key")),
        }
    }

    pub fn into_ed25519_private(self) -> Result<SigningKey, KeyError> {
        match self {
            Self::Ed25519Private(k) => Ok(k),
            other => Err(other.unexpected("Ed25519 private key")),
        }
    }

    pub fn into_ed25519_public(self) -> Result<VerifyingKey, KeyError> {
        match self {
            Self::Ed25519Public(k) => Ok(k),
            other => Err(other.unexpected("Ed25519 public key")),
        }
    }

    fn unexpected(&self, expected: &'static str) -> KeyError {
        KeyError::UnexpectedKey {
            expected,
            found: self.kind(),
        }
    }
}

// Never print key material, only its shape.
impl fmt::Debug for ParsedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RsaPrivate(k) => write!(f, "RsaPrivate({} bits)", k.n().bits()),
            Self::RsaPublic(k) => write!(f, "RsaPublic({} bits)", k.n().bits()),
            Self::Ed25519Private(_) => write!(f, "Ed25519Private"),
            Self::Ed25519Public(_) => write!(f, "Ed25519Public"),
        }
    }
}

impl From<RsaPrivateKey> for ParsedKey {
    fn from(key: RsaPrivateKey) -> Self {
        Self::RsaPrivate(key)
    }
}

impl From<RsaPublicKey> for ParsedKey {
    fn from(key: RsaPublicKey) -> Self {
        Self::RsaPublic(key)
    }
}

impl From<SigningKey> for ParsedKey {
    fn from(key: SigningKey) -> Self {
        Self::Ed25519Private(key)
    }
}

impl From<VerifyingKey> for ParsedKey {
    fn from(key: VerifyingKey) -> Self {
        Self::Ed25519Public(key)
    }
}

/// Modulus length of an RSA public key in bits
pub fn rsa_modulus_bits(key: &RsaPublicKey) -> usize {
    key.n().bits()
}
