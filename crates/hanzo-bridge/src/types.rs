//! Identifiers, key records and the relay wire message

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BridgeError, Result};

const MAX_IDENTIFIER_LEN: usize = 64;

/// Owner identity of an application or bank.
///
/// Lower-case alphanumerics, `_` and `-`, starting with an alphanumeric and at
/// most 64 characters. Slugs become directory names, so nothing else is allowed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Slug(String);

impl Slug {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let mut chars = value.chars();

        let valid_start = chars
            .next()
            .map(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            .unwrap_or(false);
        let valid_rest =
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

        if !valid_start || !valid_rest || value.len() > MAX_IDENTIFIER_LEN {
            return Err(BridgeError::InvalidIdentifier(format!("slug {:?}", value)));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Slug {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Slug> for String {
    fn from(slug: Slug) -> Self {
        slug.0
    }
}

impl std::str::FromStr for Slug {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque, time-ordered key version.
///
/// Freshly minted versions are UUIDv7 strings, whose leading millisecond
/// timestamp makes string order match creation order. Versions minted
/// elsewhere are accepted if they are 1 to 64 characters of `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyVersion(String);

impl KeyVersion {
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let valid = !value.is_empty()
            && value.len() <= MAX_IDENTIFIER_LEN
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

        if !valid {
            return Err(BridgeError::InvalidIdentifier(format!(
                "key version {:?}",
                value
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for KeyVersion {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<KeyVersion> for String {
    fn from(version: KeyVersion) -> Self {
        version.0
    }
}

impl std::str::FromStr for KeyVersion {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for KeyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validity window of an application key version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValidity {
    pub valid_from: DateTime<Utc>,
    pub rsa_valid_until: DateTime<Utc>,
    pub ed25519_valid_until: DateTime<Utc>,
}

impl KeyValidity {
    /// Fails with [`BridgeError::Config`] when either expiry falls outside
    /// the representable date range.
    pub fn starting_at(
        valid_from: DateTime<Utc>,
        encryption_validity_days: u32,
        signing_validity_days: u32,
    ) -> Result<Self> {
        let until = |days: u32| {
            Duration::try_days(i64::from(days))
                .and_then(|d| valid_from.checked_add_signed(d))
                .ok_or_else(|| {
                    BridgeError::Config(format!("key validity of {} days is out of range", days))
                })
        };
        Ok(Self {
            valid_from,
            rsa_valid_until: until(encryption_validity_days)?,
            ed25519_valid_until: until(signing_validity_days)?,
        })
    }

    /// End of the window: the earlier of the two key expiries
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.rsa_valid_until.min(self.ed25519_valid_until)
    }

    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && at < self.expires_at()
    }
}

/// On-disk location of an application's four key files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationKeyPaths {
    pub rsa_private: PathBuf,
    pub rsa_public: PathBuf,
    pub ed25519_private: PathBuf,
    pub ed25519_public: PathBuf,
}

/// On-disk location of a bank's two public key files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankKeyPaths {
    pub rsa_public: PathBuf,
    pub ed25519_public: PathBuf,
}

/// One key version of an application, as recorded in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub slug: Slug,
    pub key_version: KeyVersion,
    pub paths: ApplicationKeyPaths,
    pub validity: KeyValidity,
}

/// A bank's public keys, as recorded in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankRecord {
    pub slug: Slug,
    pub paths: BankKeyPaths,
    pub recorded_at: DateTime<Utc>,
}

/// Public keys an application publishes to its counterparty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationPublicKeys {
    pub slug: Slug,
    pub key_version: KeyVersion,
    pub rsa_public_pem: String,
    pub ed25519_public_pem: String,
}

/// Public keys as served by a counterparty: base64 SPKI DER
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePublicKeys {
    pub encrypting_key: String,
    pub signing_key: String,
}

/// Signed exchange message as carried by the relay.
///
/// Missing fields deserialize as empty strings and are rejected by
/// [`WireMessage::validate`] with [`BridgeError::Format`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireMessage {
    pub from: String,
    pub to: String,
    /// Encoded envelope
    pub message: String,
    /// Base64 Ed25519 signature over the envelope
    pub signature: String,
    pub key_version: String,
}

impl WireMessage {
    /// All fields are required and non-empty
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("from", &self.from),
            ("to", &self.to),
            ("message", &self.message),
            ("signature", &self.signature),
            ("key_version", &self.key_version),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(BridgeError::Format(format!("missing {}", name)));
            }
        }
        Ok(())
    }

    pub fn from_json(raw: &[u8]) -> Result<Self> {
        let message: Self =
            serde_json::from_slice(raw).map_err(|e| BridgeError::Format(e.to_string()))?;
        message.validate()?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_rules() {
        for ok in ["acme", "firstbank", "a", "bank-01_eu", "0day"] {
            assert!(Slug::new(ok).is_ok(), "{} rejected", ok);
        }
        for bad in ["", "Acme", "-acme", "_acme", "ac/me", "..", "acme.json"] {
            assert!(Slug::new(bad).is_err(), "{:?} accepted", bad);
        }
        assert!(Slug::new("a".repeat(65)).is_err());
    }

    #[test]
    fn test_key_version_rules() {
        assert!(KeyVersion::new("01HZX3K9ZQ8V6W2Y4T7R5N1M0P").is_ok());
        assert!(KeyVersion::new("../etc").is_err());
        assert!(KeyVersion::new("").is_err());

        let generated = KeyVersion::generate();
        assert!(KeyVersion::new(generated.as_str()).is_ok());
    }

    #[test]
    fn test_generated_versions_sort_by_creation() {
        let first = KeyVersion::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = KeyVersion::generate();
        assert!(first < second);
    }

    #[test]
    fn test_identifiers_validate_on_deserialize() {
        assert!(serde_json::from_str::<Slug>("\"acme\"").is_ok());
        assert!(serde_json::from_str::<Slug>("\"../acme\"").is_err());
    }

    #[test]
    fn test_validity_window() {
        let start = Utc::now();
        let validity = KeyValidity::starting_at(start, 90, 365).unwrap();

        assert_eq!(validity.expires_at(), start + Duration::days(90));
        assert!(validity.is_active_at(start));
        assert!(validity.is_active_at(start + Duration::days(89)));
        assert!(!validity.is_active_at(start + Duration::days(90)));
        assert!(!validity.is_active_at(start - Duration::seconds(1)));
    }

    #[test]
    fn test_validity_overflow_is_an_error() {
        let start = Utc::now();
        assert!(matches!(
            KeyValidity::starting_at(start, u32::MAX, 365),
            Err(BridgeError::Config(_))
        ));
        assert!(matches!(
            KeyValidity::starting_at(start, 90, 4_000_000_000),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn test_wire_message_requires_all_fields() {
        let raw = br#"{"from":"firstbank","to":"acme","message":"a-b-c","signature":"","key_version":"v1"}"#;
        match WireMessage::from_json(raw) {
            Err(BridgeError::Format(reason)) => assert!(reason.contains("signature")),
            other => panic!("unexpected result: {:?}", other),
        }

        let raw = br#"{"from":"firstbank","to":"acme","message":"a-b-c"}"#;
        assert!(matches!(
            WireMessage::from_json(raw),
            Err(BridgeError::Format(_))
        ));
    }

    #[test]
    fn test_remote_keys_field_names() {
        let keys: RemotePublicKeys =
            serde_json::from_str(r#"{"encryptingKey":"AAA","signingKey":"BBB"}"#).unwrap();
        assert_eq!(keys.encrypting_key, "AAA");
        assert_eq!(keys.signing_key, "BBB");
    }
}
