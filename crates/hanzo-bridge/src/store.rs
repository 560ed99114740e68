//! Filesystem key store
//!
//! Layout under the data root:
//!
//! ```text
//! application/<slug>/<version>/rsa_private_key.pem
//! application/<slug>/<version>/rsa_public_key.pem
//! application/<slug>/<version>/ed25519_private_key.pem
//! application/<slug>/<version>/ed25519_public_key.pem
//! bank/<slug>/rsa_public_key.pem
//! bank/<slug>/ed25519_public_key.pem
//! ```
//!
//! Every write goes to a temp file in the target directory, is fsynced, gets
//! its final permissions and is then renamed into place. Application versions
//! are append-only; bank keys are replaced when refreshed.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use hanzo_bridge_crypto::{
    private_key_to_pem, public_key_to_pem, KeyAlgorithm, KeyRole, KeyValidator, ParsedKey,
    RsaPrivateKey, RsaPublicKey, SigningKey, VerifyingKey,
};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::types::{ApplicationKeyPaths, BankKeyPaths, KeyVersion, Slug};

pub const APPLICATION_DIR: &str = "application";
pub const BANK_DIR: &str = "bank";

const PRIVATE_KEY_MODE: u32 = 0o600;
const PUBLIC_KEY_MODE: u32 = 0o644;

/// `<algorithm>_<role>_key.pem`
pub fn key_file_name(algorithm: KeyAlgorithm, role: KeyRole) -> String {
    format!("{}_{}_key.pem", algorithm.file_prefix(), role.file_suffix())
}

/// An application's own key material for one version
pub struct ApplicationKeys {
    pub rsa_private: RsaPrivateKey,
    pub rsa_public: RsaPublicKey,
    pub signing: SigningKey,
    pub verifying: VerifyingKey,
}

/// A counterparty bank's public keys
pub struct BankKeys {
    pub rsa_public: RsaPublicKey,
    pub verifying: VerifyingKey,
}

/// PEM key files under a data root. Reads are safe to run concurrently.
#[derive(Debug, Clone)]
pub struct FsKeyStore {
    root: PathBuf,
    validator: KeyValidator,
}

impl FsKeyStore {
    pub fn new(root: impl Into<PathBuf>, validator: KeyValidator) -> Self {
        Self {
            root: root.into(),
            validator,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn validator(&self) -> &KeyValidator {
        &self.validator
    }

    pub fn application_dir(&self, slug: &Slug) -> PathBuf {
        self.root.join(APPLICATION_DIR).join(slug.as_str())
    }

    pub fn application_version_dir(&self, slug: &Slug, version: &KeyVersion) -> PathBuf {
        self.application_dir(slug).join(version.as_str())
    }

    pub fn bank_dir(&self, slug: &Slug) -> PathBuf {
        self.root.join(BANK_DIR).join(slug.as_str())
    }

    pub fn application_key_paths(&self, slug: &Slug, version: &KeyVersion) -> ApplicationKeyPaths {
        let dir = self.application_version_dir(slug, version);
        ApplicationKeyPaths {
            rsa_private: dir.join(key_file_name(KeyAlgorithm::Rsa, KeyRole::Private)),
            rsa_public: dir.join(key_file_name(KeyAlgorithm::Rsa, KeyRole::Public)),
            ed25519_private: dir.join(key_file_name(KeyAlgorithm::Ed25519, KeyRole::Private)),
            ed25519_public: dir.join(key_file_name(KeyAlgorithm::Ed25519, KeyRole::Public)),
        }
    }

    pub fn bank_key_paths(&self, slug: &Slug) -> BankKeyPaths {
        let dir = self.bank_dir(slug);
        BankKeyPaths {
            rsa_public: dir.join(key_file_name(KeyAlgorithm::Rsa, KeyRole::Public)),
            ed25519_public: dir.join(key_file_name(KeyAlgorithm::Ed25519, KeyRole::Public)),
        }
    }

    /// Write `key` to `path`, atomically replacing any existing file
    pub fn save(&self, key: &ParsedKey, path: &Path) -> Result<()> {
        self.write_key(key, path, true)
    }

    /// Write `key` to `path`, failing with [`BridgeError::AlreadyExists`] if
    /// the file is already there
    pub fn save_new(&self, key: &ParsedKey, path: &Path) -> Result<()> {
        self.write_key(key, path, false)
    }

    fn write_key(&self, key: &ParsedKey, path: &Path, replace: bool) -> Result<()> {
        match key.role() {
            KeyRole::Private => {
                let pem = private_key_to_pem(key)?;
                write_atomic(path, pem.as_bytes(), PRIVATE_KEY_MODE, replace)?;
            }
            KeyRole::Public => {
                let pem = public_key_to_pem(key)?;
                write_atomic(path, pem.as_bytes(), PUBLIC_KEY_MODE, replace)?;
            }
        }
        debug!(path = %path.display(), kind = key.kind(), "key written");
        Ok(())
    }

    /// Read and validate a key file
    pub fn load(&self, path: &Path, role: KeyRole) -> Result<ParsedKey> {
        Ok(self.validator.validate_file(path, role)?)
    }

    pub fn load_application_keys(&self, slug: &Slug, version: &KeyVersion) -> Result<ApplicationKeys> {
        let paths = self.application_key_paths(slug, version);
        Ok(ApplicationKeys {
            rsa_private: self.load(&paths.rsa_private, KeyRole::Private)?.into_rsa_private()?,
            rsa_public: self.load(&paths.rsa_public, KeyRole::Public)?.into_rsa_public()?,
            signing: self
                .load(&paths.ed25519_private, KeyRole::Private)?
                .into_ed25519_private()?,
            verifying: self
                .load(&paths.ed25519_public, KeyRole::Public)?
                .into_ed25519_public()?,
        })
    }

    pub fn load_bank_keys(&self, slug: &Slug) -> Result<BankKeys> {
        let paths = self.bank_key_paths(slug);
        Ok(BankKeys {
            rsa_public: self.load(&paths.rsa_public, KeyRole::Public)?.into_rsa_public()?,
            verifying: self
                .load(&paths.ed25519_public, KeyRole::Public)?
                .into_ed25519_public()?,
        })
    }

    /// PEM text of a stored public key, re-validated on the way out
    pub fn public_key_pem(&self, path: &Path) -> Result<String> {
        let key = self.load(path, KeyRole::Public)?;
        Ok(public_key_to_pem(&key)?)
    }

    /// Key versions present on disk for an application, oldest first
    pub fn application_versions(&self, slug: &Slug) -> Result<Vec<KeyVersion>> {
        let dir = self.application_dir(slug);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(version) = entry
                .file_name()
                .to_str()
                .and_then(|name| KeyVersion::new(name).ok())
            {
                versions.push(version);
            }
        }
        versions.sort();
        Ok(versions)
    }
}

/// Write `contents` to `path` via temp file, fsync and rename.
///
/// With `replace == false` the rename fails if `path` exists.
pub(crate) fn write_atomic(path: &Path, contents: &[u8], mode: u32, replace: bool) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        BridgeError::Io(std::io::Error::new(
            ErrorKind::InvalidInput,
            "path has no parent",
        ))
    })?;
    fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    set_mode(file.as_file(), mode)?;
    file.as_file().sync_all()?;

    let persisted = if replace {
        file.persist(path)
    } else {
        file.persist_noclobber(path)
    };
    persisted.map_err(|e| {
        if e.error.kind() == ErrorKind::AlreadyExists {
            BridgeError::AlreadyExists(path.display().to_string())
        } else {
            BridgeError::Io(e.error)
        }
    })?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(file: &fs::File, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &fs::File, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
