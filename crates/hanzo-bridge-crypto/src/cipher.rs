//! Hybrid AES-256-GCM / RSA-OAEP / Ed25519 cipher
//!
//! Sealing a payload:
//!
//! 1. draw a fresh 256-bit key and 96-bit nonce from the OS CSPRNG
//! 2. AES-256-GCM encrypt (ciphertext with the tag appended)
//! 3. wrap the key with RSA-OAEP (SHA-256, MGF1-SHA-256, empty label) under
//!    the recipient's public key
//! 4. Ed25519 sign `ciphertext || '-' || wrapped_key || '-' || nonce`
//!
//! Opening runs the checks in the opposite order and never touches the RSA or
//! AES step before the signature has verified.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey, SIGNATURE_LENGTH};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

use crate::envelope::{EncryptedEnvelope, NONCE_LEN};
use crate::errors::{CryptoError, Result};

/// AES-256 key length in bytes
pub const SYMMETRIC_KEY_LEN: usize = 32;

/// The four keys one side of an exchange needs
pub struct ExchangeKeys {
    /// Unwraps symmetric keys addressed to us
    pub own_rsa_private: RsaPrivateKey,
    /// Signs what we send
    pub own_signing: SigningKey,
    /// Wraps symmetric keys for the counterparty
    pub peer_rsa_public: RsaPublicKey,
    /// Verifies what the counterparty sends
    pub peer_verifying: VerifyingKey,
}

/// An encoded envelope and its base64 signature, ready for the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    pub envelope: String,
    pub signature: String,
}

/// Stateless hybrid cipher
#[derive(Debug, Clone, Copy, Default)]
pub struct HybridCipher;

impl HybridCipher {
    pub fn new() -> Self {
        Self
    }

    /// Encrypt `plaintext` for the holder of `recipient`'s private key.
    pub fn encrypt(&self, plaintext: &[u8], recipient: &RsaPublicKey) -> Result<EncryptedEnvelope> {
        let mut key = Zeroizing::new([0u8; SYMMETRIC_KEY_LEN]);
        OsRng
            .try_fill_bytes(&mut key[..])
            .map_err(|e| CryptoError::Rng(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| CryptoError::Rng(e.to_string()))?;

        let aead = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
        let ciphertext = aead
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Encryption("AES-GCM seal failed".into()))?;

        let wrapped_key = recipient
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &key[..])
            .map_err(|e| CryptoError::Encryption(format!("RSA-OAEP wrap failed: {}", e)))?;

        Ok(EncryptedEnvelope {
            ciphertext,
            wrapped_key,
            nonce: nonce.to_vec(),
        })
    }

    /// Unwrap the symmetric key and open the AEAD. Does not check any signature.
    pub fn decrypt(&self, envelope: &EncryptedEnvelope, own: &RsaPrivateKey) -> Result<Vec<u8>> {
        if envelope.nonce.len() != NONCE_LEN {
            return Err(CryptoError::Decryption);
        }

        let key = Zeroizing::new(
            own.decrypt(Oaep::new::<Sha256>(), &envelope.wrapped_key)
                .map_err(|_| CryptoError::Decryption)?,
        );
        if key.len() != SYMMETRIC_KEY_LEN {
            return Err(CryptoError::Decryption);
        }

        let aead = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        aead.decrypt(
            Nonce::from_slice(&envelope.nonce),
            envelope.ciphertext.as_slice(),
        )
        .map_err(|_| CryptoError::Decryption)
    }

    /// Sign the envelope's canonical message, returning standard base64
    pub fn sign(&self, envelope: &EncryptedEnvelope, signing: &SigningKey) -> String {
        let signature = signing.sign(&envelope.signing_message());
        STANDARD.encode(signature.to_bytes())
    }

    /// Check a base64 signature over the envelope's canonical message
    pub fn verify(
        &self,
        envelope: &EncryptedEnvelope,
        signature: &str,
        sender: &VerifyingKey,
    ) -> Result<()> {
        let raw = STANDARD
            .decode(signature)
            .map_err(|e| CryptoError::Format(format!("signature: {}", e)))?;
        if raw.len() != SIGNATURE_LENGTH {
            return Err(CryptoError::Authentication);
        }

        let signature = Signature::from_slice(&raw).map_err(|_| CryptoError::Authentication)?;
        sender
            .verify_strict(&envelope.signing_message(), &signature)
            .map_err(|_| CryptoError::Authentication)
    }

    /// Encrypt for the peer and sign with our key
    pub fn seal(&self, plaintext: &[u8], keys: &ExchangeKeys) -> Result<SealedMessage> {
        let envelope = self.encrypt(plaintext, &keys.peer_rsa_public)?;
        let signature = self.sign(&envelope, &keys.own_signing);

        debug!(
            plaintext_len = plaintext.len(),
            ciphertext_len = envelope.ciphertext.len(),
            "sealed message"
        );

        Ok(SealedMessage {
            envelope: envelope.encode(),
            signature,
        })
    }

    /// Verify against the peer's key, then decrypt with ours
    pub fn open(&self, sealed: &SealedMessage, keys: &ExchangeKeys) -> Result<Vec<u8>> {
        let envelope = EncryptedEnvelope::decode(&sealed.envelope)?;
        self.verify(&envelope, &sealed.signature, &keys.peer_verifying)?;
        let plaintext = self.decrypt(&envelope, &keys.own_rsa_private)?;

        debug!(plaintext_len = plaintext.len(), "opened message");
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keygen::{generate_ed25519_pair, generate_rsa_pair};

    #[test]
    fn test_decrypt_rejects_short_nonce() {
        let (private, public) = generate_rsa_pair(2048).unwrap();
        let cipher = HybridCipher::new();

        let mut envelope = cipher.encrypt(b"hello", &public).unwrap();
        envelope.nonce.truncate(8);
        assert!(matches!(
            cipher.decrypt(&envelope, &private),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn test_verify_rejects_short_signature() {
        let (_, public) = generate_rsa_pair(2048).unwrap();
        let (signing, verifying) = generate_ed25519_pair().unwrap();
        let cipher = HybridCipher::new();

        let envelope = cipher.encrypt(b"hello", &public).unwrap();
        assert!(cipher
            .verify(&envelope, &cipher.sign(&envelope, &signing), &verifying)
            .is_ok());

        let short = STANDARD.encode([0u8; 32]);
        assert!(matches!(
            cipher.verify(&envelope, &short, &verifying),
            Err(CryptoError::Authentication)
        ));
        assert!(matches!(
            cipher.verify(&envelope, "not base64!", &verifying),
            Err(CryptoError::Format(_))
        ));
    }

    #[test]
    fn test_wrong_recipient_cannot_decrypt() {
        let (_, public) = generate_rsa_pair(2048).unwrap();
        let (other_private, _) = generate_rsa_pair(2048).unwrap();
        let cipher = HybridCipher::new();

        let envelope = cipher.encrypt(b"for someone else", &public).unwrap();
        assert!(matches!(
            cipher.decrypt(&envelope, &other_private),
            Err(CryptoError::Decryption)
        ));
    }
}
