//! PEM key validation
//!
//! Every key that enters the system, whether read from disk, imported by an
//! operator or fetched from a counterparty, passes through [`KeyValidator`].
//! It parses PKCS#8 / SPKI documents, dispatches on the algorithm OID and
//! enforces the size rules for each algorithm.

use std::path::Path;

use ed25519_dalek::{SigningKey, VerifyingKey};
use pkcs8::der::asn1::OctetStringRef;
use pkcs8::der::Decode;
use pkcs8::spki::SubjectPublicKeyInfoRef;
use pkcs8::{DecodePrivateKey, DecodePublicKey, ObjectIdentifier, PrivateKeyInfo};
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::errors::KeyError;
use crate::keys::{
    rsa_modulus_bits, KeyRole, ParsedKey, DEFAULT_RSA_KEY_BITS, ED25519_PUBLIC_KEY_LEN,
    ED25519_SEED_LEN,
};

/// rsaEncryption (PKCS#1)
pub const RSA_ALGORITHM_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// id-Ed25519 (RFC 8410)
pub const ED25519_ALGORITHM_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");

const PEM_EXTENSION: &str = "pem";

/// Parses and checks key material against the configured strength rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyValidator {
    rsa_key_bits: usize,
}

impl Default for KeyValidator {
    fn default() -> Self {
        Self::new(DEFAULT_RSA_KEY_BITS)
    }
}

impl KeyValidator {
    pub fn new(rsa_key_bits: usize) -> Self {
        Self { rsa_key_bits }
    }

    /// Exact RSA modulus size every accepted RSA key must have
    pub fn rsa_key_bits(&self) -> usize {
        self.rsa_key_bits
    }

    /// Read a `.pem` file and validate it for `role`
    pub fn validate_file(&self, path: &Path, role: KeyRole) -> Result<ParsedKey, KeyError> {
        let label = path.display().to_string();

        if !path.is_file() {
            return Err(KeyError::NotFound { path: label });
        }

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        if extension != PEM_EXTENSION {
            return Err(KeyError::UnsupportedExtension {
                path: label,
                extension: extension.to_string(),
            });
        }

        let contents = std::fs::read(path).map_err(|e| KeyError::Unreadable {
            path: label.clone(),
            reason: e.to_string(),
        })?;

        self.validate(&contents, role, &label)
    }

    /// Validate raw PEM text. `source_label` is used in errors in place of the key.
    pub fn validate(
        &self,
        raw: &[u8],
        role: KeyRole,
        source_label: &str,
    ) -> Result<ParsedKey, KeyError> {
        let (pem_label, der) =
            pem_rfc7468::decode_vec(raw).map_err(|e| KeyError::PemDecodeFailure {
                source_label: source_label.to_string(),
                reason: e.to_string(),
            })?;

        if pem_label != role.pem_label() {
            return Err(KeyError::PemDecodeFailure {
                source_label: source_label.to_string(),
                reason: format!(
                    "expected {:?} block, found {:?}",
                    role.pem_label(),
                    pem_label
                ),
            });
        }

        self.validate_der(&der, role, source_label)
    }

    /// Validate a DER encoded PKCS#8 (private) or SPKI (public) document
    pub fn validate_der(
        &self,
        der: &[u8],
        role: KeyRole,
        source_label: &str,
    ) -> Result<ParsedKey, KeyError> {
        match role {
            KeyRole::Private => self.parse_private(der, source_label),
            KeyRole::Public => self.parse_public(der, source_label),
        }
    }

    /// Re-check an already parsed key, e.g. one produced by generation
    pub fn check(&self, key: &ParsedKey, source_label: &str) -> Result<(), KeyError> {
        match key {
            ParsedKey::RsaPrivate(k) => self.check_rsa(&k.to_public_key(), source_label),
            ParsedKey::RsaPublic(k) => self.check_rsa(k, source_label),
            // Fixed-size types; the length rules are enforced when parsing.
            ParsedKey::Ed25519Private(_) | ParsedKey::Ed25519Public(_) => Ok(()),
        }
    }

    fn parse_private(&self, der: &[u8], source_label: &str) -> Result<ParsedKey, KeyError> {
        let info = PrivateKeyInfo::try_from(der).map_err(|e| parse_failure(source_label, e))?;
        let oid = info.algorithm.oid;

        if oid == RSA_ALGORITHM_OID {
            let key =
                RsaPrivateKey::from_pkcs8_der(der).map_err(|e| parse_failure(source_label, e))?;
            self.check_rsa(&key.to_public_key(), source_label)?;
            Ok(ParsedKey::RsaPrivate(key))
        } else if oid == ED25519_ALGORITHM_OID {
            let seed = OctetStringRef::from_der(info.private_key)
                .map_err(|e| parse_failure(source_label, e))?;
            if seed.as_bytes().len() != ED25519_SEED_LEN {
                return Err(KeyError::InvalidKeySize {
                    source_label: source_label.to_string(),
                    algorithm: "Ed25519 private",
                    expected: ED25519_SEED_LEN,
                    actual: seed.as_bytes().len(),
                });
            }
            let key =
                SigningKey::from_pkcs8_der(der).map_err(|e| parse_failure(source_label, e))?;
            Ok(ParsedKey::Ed25519Private(key))
        } else {
            Err(KeyError::UnsupportedKeyType {
                source_label: source_label.to_string(),
                found: oid.to_string(),
            })
        }
    }

    fn parse_public(&self, der: &[u8], source_label: &str) -> Result<ParsedKey, KeyError> {
        let spki =
            SubjectPublicKeyInfoRef::try_from(der).map_err(|e| parse_failure(source_label, e))?;
        let oid = spki.algorithm.oid;

        if oid == RSA_ALGORITHM_OID {
            let key = RsaPublicKey::from_public_key_der(der)
                .map_err(|e| parse_failure(source_label, e))?;
            self.check_rsa(&key, source_label)?;
            Ok(ParsedKey::RsaPublic(key))
        } else if oid == ED25519_ALGORITHM_OID {
            let raw_len = spki.subject_public_key.raw_bytes().len();
            if raw_len != ED25519_PUBLIC_KEY_LEN {
                return Err(KeyError::InvalidKeySize {
                    source_label: source_label.to_string(),
                    algorithm: "Ed25519 public",
                    expected: ED25519_PUBLIC_KEY_LEN,
                    actual: raw_len,
                });
            }
            let key = VerifyingKey::from_public_key_der(der)
                .map_err(|e| parse_failure(source_label, e))?;
            Ok(ParsedKey::Ed25519Public(key))
        } else {
            Err(KeyError::UnsupportedKeyType {
                source_label: source_label.to_string(),
                found: oid.to_string(),
            })
        }
    }

    fn check_rsa(&self, key: &RsaPublicKey, source_label: &str) -> Result<(), KeyError> {
        let bits = rsa_modulus_bits(key);
        if bits != self.rsa_key_bits {
            return Err(KeyError::WeakKey {
                source_label: source_label.to_string(),
                expected_bits: self.rsa_key_bits,
                actual_bits: bits,
            });
        }
        Ok(())
    }
}

fn parse_failure(source_label: &str, err: impl std::fmt::Display) -> KeyError {
    KeyError::KeyParseFailure {
        source_label: source_label.to_string(),
        reason: err.to_string(),
    }
}
