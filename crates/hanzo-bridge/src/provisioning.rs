//! Key provisioning for applications and banks
//!
//! Generation and import for a given slug are serialized through a per-slug
//! async mutex, so two concurrent first-time provisioning calls end up with a
//! single key version.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use hanzo_bridge_crypto::{
    ensure_pair_matches, generate_ed25519_pair, generate_rsa_pair, public_key_from_base64,
    KeyRole, ParsedKey,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::registry::KeyRegistry;
use crate::store::FsKeyStore;
use crate::transport::RelayTransport;
use crate::types::{
    ApplicationKeyPaths, ApplicationPublicKeys, ApplicationRecord, BankRecord, KeyValidity,
    KeyVersion, Slug,
};

/// Operator-supplied application key files
#[derive(Debug, Clone)]
pub struct ApplicationKeyFiles {
    pub rsa_private: PathBuf,
    pub rsa_public: PathBuf,
    pub ed25519_private: PathBuf,
    pub ed25519_public: PathBuf,
}

/// Validated key material for one application version, not yet on disk
struct ApplicationKeyMaterial {
    rsa_private: ParsedKey,
    rsa_public: ParsedKey,
    ed25519_private: ParsedKey,
    ed25519_public: ParsedKey,
}

impl ApplicationKeyMaterial {
    fn generate(rsa_key_bits: usize) -> Result<Self> {
        let (rsa_private, rsa_public) = generate_rsa_pair(rsa_key_bits)?;
        let (signing, verifying) = generate_ed25519_pair()?;
        Ok(Self {
            rsa_private: rsa_private.into(),
            rsa_public: rsa_public.into(),
            ed25519_private: signing.into(),
            ed25519_public: verifying.into(),
        })
    }

    fn import(store: &FsKeyStore, files: &ApplicationKeyFiles) -> Result<Self> {
        let rsa_private = store.load(&files.rsa_private, KeyRole::Private)?.into_rsa_private()?;
        let rsa_public = store.load(&files.rsa_public, KeyRole::Public)?.into_rsa_public()?;
        let signing = store
            .load(&files.ed25519_private, KeyRole::Private)?
            .into_ed25519_private()?;
        let verifying = store
            .load(&files.ed25519_public, KeyRole::Public)?
            .into_ed25519_public()?;

        let material = Self {
            rsa_private: rsa_private.into(),
            rsa_public: rsa_public.into(),
            ed25519_private: signing.into(),
            ed25519_public: verifying.into(),
        };
        ensure_pair_matches(
            &material.rsa_private,
            &material.rsa_public,
            &files.rsa_public.display().to_string(),
        )?;
        ensure_pair_matches(
            &material.ed25519_private,
            &material.ed25519_public,
            &files.ed25519_public.display().to_string(),
        )?;
        Ok(material)
    }

    /// Write all four files. Private keys go first so a public key on disk
    /// always has its private half next to it.
    fn persist(&self, store: &FsKeyStore, paths: &ApplicationKeyPaths) -> Result<()> {
        store.save_new(&self.rsa_private, &paths.rsa_private)?;
        store.save_new(&self.ed25519_private, &paths.ed25519_private)?;
        store.save_new(&self.rsa_public, &paths.rsa_public)?;
        store.save_new(&self.ed25519_public, &paths.ed25519_public)?;
        Ok(())
    }
}

pub struct KeyProvisioningService {
    store: FsKeyStore,
    registry: Arc<dyn KeyRegistry>,
    transport: Arc<dyn RelayTransport>,
    rsa_key_bits: usize,
    encryption_validity_days: u32,
    signing_validity_days: u32,
    request_timeout: Duration,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Held for the duration of a per-slug critical section. The map entry is
/// dropped with the last holder.
struct SlugLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<'a> SlugLock<'a> {
    async fn acquire(locks: &'a DashMap<String, Arc<Mutex<()>>>, key: String) -> SlugLock<'a> {
        let lock = locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        SlugLock {
            locks,
            key,
            guard: Some(lock.lock_owned().await),
        }
    }
}

impl Drop for SlugLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl KeyProvisioningService {
    pub fn new(
        config: &BridgeConfig,
        store: FsKeyStore,
        registry: Arc<dyn KeyRegistry>,
        transport: Arc<dyn RelayTransport>,
    ) -> Self {
        Self {
            store,
            registry,
            transport,
            rsa_key_bits: config.rsa_key_bits,
            encryption_validity_days: config.encryption_key_validity_days,
            signing_validity_days: config.signing_key_validity_days,
            request_timeout: config.request_timeout(),
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &FsKeyStore {
        &self.store
    }

    async fn lock_slug(&self, kind: &str, slug: &Slug) -> SlugLock<'_> {
        SlugLock::acquire(&self.locks, format!("{}/{}", kind, slug)).await
    }

    /// Return the current key version of `slug`, generating one if there is none
    pub async fn provision_application(&self, slug: &Slug) -> Result<ApplicationRecord> {
        let _lock = self.lock_slug("application", slug).await;

        if let Some(existing) = self.registry.current_application(slug).await? {
            info!(slug = %slug, key_version = %existing.key_version, "application already provisioned");
            return Ok(existing);
        }

        let bits = self.rsa_key_bits;
        let material =
            tokio::task::spawn_blocking(move || ApplicationKeyMaterial::generate(bits)).await??;

        self.store_application_version(slug, material).await
    }

    /// Validate operator-supplied key files and store them as a new version.
    ///
    /// Nothing is written unless all four files pass validation and each
    /// public key matches its private key.
    pub async fn import_application_keys(
        &self,
        slug: &Slug,
        files: &ApplicationKeyFiles,
    ) -> Result<ApplicationRecord> {
        let _lock = self.lock_slug("application", slug).await;

        let store = self.store.clone();
        let owned_files = files.clone();
        let material = tokio::task::spawn_blocking(move || {
            ApplicationKeyMaterial::import(&store, &owned_files)
        })
        .await?
        .map_err(|e| {
            warn!(slug = %slug, error = %e, "application key import rejected");
            e
        })?;

        self.store_application_version(slug, material).await
    }

    async fn store_application_version(
        &self,
        slug: &Slug,
        material: ApplicationKeyMaterial,
    ) -> Result<ApplicationRecord> {
        let validity = KeyValidity::starting_at(
            Utc::now(),
            self.encryption_validity_days,
            self.signing_validity_days,
        )?;
        let version = KeyVersion::generate();
        let paths = self.store.application_key_paths(slug, &version);

        let store = self.store.clone();
        let target = paths.clone();
        tokio::task::spawn_blocking(move || material.persist(&store, &target)).await??;

        let record = self
            .registry
            .record_application_keys(slug, &version, &paths, &validity)
            .await?;

        info!(
            slug = %slug,
            key_version = %version,
            valid_until = %validity.expires_at(),
            "application keys stored"
        );
        Ok(record)
    }

    /// Validate and store a bank's public key files, replacing earlier ones.
    ///
    /// Both keys are validated before anything is written. The two files are
    /// then replaced one after the other, each by an atomic rename, so a crash
    /// between them can leave a new RSA key next to the old Ed25519 key.
    /// Exchanges against such a mixed pair fail signature verification; a
    /// repeated import or fetch repairs it.
    pub async fn import_bank_keys(
        &self,
        slug: &Slug,
        rsa_public: &std::path::Path,
        ed25519_public: &std::path::Path,
    ) -> Result<BankRecord> {
        let _lock = self.lock_slug("bank", slug).await;

        let store = self.store.clone();
        let rsa_path = rsa_public.to_path_buf();
        let ed_path = ed25519_public.to_path_buf();
        let (rsa, ed) = tokio::task::spawn_blocking(move || -> Result<(ParsedKey, ParsedKey)> {
            let rsa = store.load(&rsa_path, KeyRole::Public)?.into_rsa_public()?;
            let ed = store.load(&ed_path, KeyRole::Public)?.into_ed25519_public()?;
            Ok((rsa.into(), ed.into()))
        })
        .await??;

        self.store_bank_keys(slug, rsa, ed).await
    }

    /// Fetch a bank's public keys from `<relay_url>/public-key`, validate and store them
    pub async fn fetch_bank_keys(&self, slug: &Slug, relay_url: &str) -> Result<BankRecord> {
        let _lock = self.lock_slug("bank", slug).await;

        let remote = tokio::time::timeout(
            self.request_timeout,
            self.transport.fetch_public_keys(relay_url),
        )
        .await
        .map_err(|_| {
            BridgeError::Transport(format!("no response within {:?}", self.request_timeout))
        })??;

        let validator = *self.store.validator();
        let rsa = public_key_from_base64(
            &remote.encrypting_key,
            &validator,
            &format!("{} encrypting key", slug),
        )?
        .into_rsa_public()?;
        let ed = public_key_from_base64(
            &remote.signing_key,
            &validator,
            &format!("{} signing key", slug),
        )?
        .into_ed25519_public()?;

        self.store_bank_keys(slug, rsa.into(), ed.into()).await
    }

    /// Each file is swapped atomically; the pair is not. See
    /// [`Self::import_bank_keys`].
    async fn store_bank_keys(
        &self,
        slug: &Slug,
        rsa: ParsedKey,
        ed: ParsedKey,
    ) -> Result<BankRecord> {
        let paths = self.store.bank_key_paths(slug);

        let store = self.store.clone();
        let target = paths.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            store.save(&rsa, &target.rsa_public)?;
            store.save(&ed, &target.ed25519_public)?;
            Ok(())
        })
        .await??;

        let record = self.registry.record_bank_keys(slug, &paths).await?;
        info!(slug = %slug, "bank keys stored");
        Ok(record)
    }

    /// Current public keys of an application, as PEM, for publishing
    pub async fn application_public_keys(&self, slug: &Slug) -> Result<ApplicationPublicKeys> {
        let record = self
            .registry
            .current_application(slug)
            .await?
            .ok_or_else(|| {
                BridgeError::KeyResolution(format!("application {} is not provisioned", slug))
            })?;

        let store = self.store.clone();
        let paths = self.store.application_key_paths(slug, &record.key_version);
        let (rsa_public_pem, ed25519_public_pem) =
            tokio::task::spawn_blocking(move || -> Result<(String, String)> {
                Ok((
                    store.public_key_pem(&paths.rsa_public)?,
                    store.public_key_pem(&paths.ed25519_public)?,
                ))
            })
            .await??;

        Ok(ApplicationPublicKeys {
            slug: record.slug,
            key_version: record.key_version,
            rsa_public_pem,
            ed25519_public_pem,
        })
    }
}
