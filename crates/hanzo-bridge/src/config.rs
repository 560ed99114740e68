//! Bridge configuration

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hanzo_bridge_crypto::{KeyValidator, DEFAULT_RSA_KEY_BITS, MIN_RSA_KEY_BITS};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

pub const DEFAULT_DATA_ROOT: &str = "./_bridge_data";
pub const DEFAULT_ENCRYPTION_KEY_VALIDITY_DAYS: u32 = 90;
pub const DEFAULT_SIGNING_KEY_VALIDITY_DAYS: u32 = 365;
/// Upper bound on either validity period (100 years)
pub const MAX_KEY_VALIDITY_DAYS: u32 = 36_500;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Root of the key store and registry files
    pub data_root: PathBuf,
    /// Exact RSA modulus size for generated and accepted keys
    pub rsa_key_bits: usize,
    pub encryption_key_validity_days: u32,
    pub signing_key_validity_days: u32,
    /// Base URL of the relay, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from(DEFAULT_DATA_ROOT),
            rsa_key_bits: DEFAULT_RSA_KEY_BITS,
            encryption_key_validity_days: DEFAULT_ENCRYPTION_KEY_VALIDITY_DAYS,
            signing_key_validity_days: DEFAULT_SIGNING_KEY_VALIDITY_DAYS,
            relay_url: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl BridgeConfig {
    /// Load from a TOML file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents =
            toml::to_string_pretty(self).map_err(|e| BridgeError::Config(e.to_string()))?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.rsa_key_bits < MIN_RSA_KEY_BITS || self.rsa_key_bits % 1024 != 0 {
            return Err(BridgeError::Config(format!(
                "rsa_key_bits must be a multiple of 1024 and at least {}, got {}",
                MIN_RSA_KEY_BITS, self.rsa_key_bits
            )));
        }
        for days in [
            self.encryption_key_validity_days,
            self.signing_key_validity_days,
        ] {
            if days == 0 || days > MAX_KEY_VALIDITY_DAYS {
                return Err(BridgeError::Config(format!(
                    "key validity periods must be between 1 and {} days, got {}",
                    MAX_KEY_VALIDITY_DAYS, days
                )));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(BridgeError::Config(
                "request_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn validator(&self) -> KeyValidator {
        KeyValidator::new(self.rsa_key_bits)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.rsa_key_bits, 3072);
        assert_eq!(config.encryption_key_validity_days, 90);
        assert_eq!(config.signing_key_validity_days, 365);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let cases = [
            BridgeConfig {
                rsa_key_bits: 1024,
                ..Default::default()
            },
            BridgeConfig {
                rsa_key_bits: 3000,
                ..Default::default()
            },
            BridgeConfig {
                encryption_key_validity_days: 0,
                ..Default::default()
            },
            BridgeConfig {
                signing_key_validity_days: 4_000_000_000,
                ..Default::default()
            },
            BridgeConfig {
                request_timeout_secs: 0,
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(BridgeError::Config(_))),
                "accepted {:?}",
                config
            );
        }
    }

    #[test]
    fn test_toml_round_trip_and_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");

        let config = BridgeConfig {
            data_root: dir.path().join("data"),
            rsa_key_bits: 4096,
            relay_url: Some("https://relay.example".into()),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(BridgeConfig::load(&path).unwrap(), config);

        fs::write(&path, "rsa_key_bits = 2048\n").unwrap();
        let partial = BridgeConfig::load(&path).unwrap();
        assert_eq!(partial.rsa_key_bits, 2048);
        assert_eq!(partial.data_root, PathBuf::from(DEFAULT_DATA_ROOT));

        fs::write(&path, "rsa_key_bits = 1024\n").unwrap();
        assert!(BridgeConfig::load(&path).is_err());
    }
}
