//! Cryptographic core of the Hanzo bank bridge
//!
//! Applications and banks exchange payloads through a relay that must not be
//! able to read or forge them. Each payload is encrypted with a one-time
//! AES-256-GCM key, the key is wrapped for the recipient with RSA-OAEP and the
//! result is signed with the sender's Ed25519 key.
//!
//! This crate holds the primitives: key validation and generation, PEM and
//! base64 key encodings, the envelope codec and the [`HybridCipher`]. Storage,
//! provisioning and the exchange flow live in `hanzo-bridge`.

pub mod cipher;
pub mod encoding;
pub mod envelope;
pub mod errors;
pub mod keygen;
pub mod keys;
pub mod validator;

pub use cipher::{ExchangeKeys, HybridCipher, SealedMessage, SYMMETRIC_KEY_LEN};
pub use encoding::{
    ensure_pair_matches, private_key_to_pem, public_key_from_base64, public_key_to_base64,
    public_key_to_der, public_key_to_pem,
};
pub use envelope::{EncryptedEnvelope, ENVELOPE_DELIMITER, NONCE_LEN};
pub use errors::{CryptoError, KeyError, Result};
pub use keygen::{generate_ed25519_pair, generate_rsa_pair};
pub use keys::{
    KeyAlgorithm, KeyPurpose, KeyRole, ParsedKey, DEFAULT_RSA_KEY_BITS, MIN_RSA_KEY_BITS,
};
pub use validator::KeyValidator;

// Key types appear in the public API
pub use ed25519_dalek::{SigningKey, VerifyingKey};
pub use rsa::{RsaPrivateKey, RsaPublicKey};
