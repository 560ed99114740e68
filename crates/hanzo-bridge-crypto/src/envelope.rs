//! Wire encoding of an encrypted envelope
//!
//! An envelope is three standard-alphabet base64 segments joined by `-`:
//! `base64(ciphertext) - base64(wrapped_key) - base64(nonce)`. `-` is outside
//! the standard alphabet, so the split is unambiguous.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::errors::{CryptoError, Result};

/// Separator between envelope segments, also used in the signed message
pub const ENVELOPE_DELIMITER: char = '-';

/// AES-GCM nonce length in bytes
pub const NONCE_LEN: usize = 12;

const SEGMENTS: usize = 3;

/// Raw envelope components
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    /// AES-256-GCM output, tag appended
    pub ciphertext: Vec<u8>,
    /// RSA-OAEP wrapped symmetric key
    pub wrapped_key: Vec<u8>,
    pub nonce: Vec<u8>,
}

impl EncryptedEnvelope {
    /// Bytes covered by the Ed25519 signature: `ciphertext || '-' || wrapped_key || '-' || nonce`
    pub fn signing_message(&self) -> Vec<u8> {
        let mut message = Vec::with_capacity(
            self.ciphertext.len() + self.wrapped_key.len() + self.nonce.len() + 2,
        );
        message.extend_from_slice(&self.ciphertext);
        message.push(ENVELOPE_DELIMITER as u8);
        message.extend_from_slice(&self.wrapped_key);
        message.push(ENVELOPE_DELIMITER as u8);
        message.extend_from_slice(&self.nonce);
        message
    }

    pub fn encode(&self) -> String {
        let mut encoded = STANDARD.encode(&self.ciphertext);
        encoded.push(ENVELOPE_DELIMITER);
        encoded.push_str(&STANDARD.encode(&self.wrapped_key));
        encoded.push(ENVELOPE_DELIMITER);
        encoded.push_str(&STANDARD.encode(&self.nonce));
        encoded
    }

    /// Split and base64-decode. Any shape problem is a [`CryptoError::Format`].
    pub fn decode(encoded: &str) -> Result<Self> {
        let segments: Vec<&str> = encoded.split(ENVELOPE_DELIMITER).collect();
        if segments.len() != SEGMENTS {
            return Err(CryptoError::Format(format!(
                "expected {} envelope segments, found {}",
                SEGMENTS,
                segments.len()
            )));
        }

        let mut decoded = Vec::with_capacity(SEGMENTS);
        for (name, segment) in ["ciphertext", "wrapped key", "nonce"].iter().zip(&segments) {
            if segment.is_empty() {
                return Err(CryptoError::Format(format!("empty {} segment", name)));
            }
            let bytes = STANDARD
                .decode(segment)
                .map_err(|e| CryptoError::Format(format!("{} segment: {}", name, e)))?;
            decoded.push(bytes);
        }

        let nonce = decoded.pop().unwrap_or_default();
        let wrapped_key = decoded.pop().unwrap_or_default();
        let ciphertext = decoded.pop().unwrap_or_default();

        Ok(Self {
            ciphertext,
            wrapped_key,
            nonce,
        })
    }
}

impl fmt::Debug for EncryptedEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedEnvelope")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("wrapped_key_len", &self.wrapped_key.len())
            .field("nonce_len", &self.nonce.len())
            .finish()
    }
}
