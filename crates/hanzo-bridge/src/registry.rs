//! Key registry: which slugs are registered and which key version is current
//!
//! The registry holds metadata only. Key material stays in the
//! [`FsKeyStore`](crate::store::FsKeyStore).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::store::{write_atomic, APPLICATION_DIR, BANK_DIR};
use crate::types::{
    ApplicationKeyPaths, ApplicationRecord, BankKeyPaths, BankRecord, KeyValidity, KeyVersion,
    Slug,
};

/// Registry collaborator used by provisioning and the exchange orchestrator
#[async_trait]
pub trait KeyRegistry: Send + Sync {
    /// Record a new application key version. It becomes the current version.
    async fn record_application_keys(
        &self,
        slug: &Slug,
        version: &KeyVersion,
        paths: &ApplicationKeyPaths,
        validity: &KeyValidity,
    ) -> Result<ApplicationRecord>;

    /// Record (or replace) a bank's public key locations
    async fn record_bank_keys(&self, slug: &Slug, paths: &BankKeyPaths) -> Result<BankRecord>;

    /// Look up one application key version
    async fn resolve_application_key_paths(
        &self,
        slug: &Slug,
        version: &KeyVersion,
    ) -> Result<ApplicationRecord>;

    async fn resolve_bank_key_paths(&self, slug: &Slug) -> Result<BankRecord>;

    /// Most recent key version of an application, if any
    async fn current_application(&self, slug: &Slug) -> Result<Option<ApplicationRecord>>;

    async fn registered_applications(&self) -> Result<Vec<Slug>>;

    async fn registered_banks(&self) -> Result<Vec<Slug>>;
}

fn unknown_version(slug: &Slug, version: &KeyVersion) -> BridgeError {
    BridgeError::KeyResolution(format!("no key version {} recorded for {}", version, slug))
}

fn unknown_bank(slug: &Slug) -> BridgeError {
    BridgeError::KeyResolution(format!("no keys recorded for bank {}", slug))
}

/// Insert keeping versions sorted, so the last entry is the current one
fn insert_version(versions: &mut Vec<ApplicationRecord>, record: ApplicationRecord) {
    versions.retain(|r| r.key_version != record.key_version);
    versions.push(record);
    versions.sort_by(|a, b| a.key_version.cmp(&b.key_version));
}

/// In-memory registry for tests and embedding
#[derive(Default)]
pub struct MemoryKeyRegistry {
    applications: DashMap<Slug, Vec<ApplicationRecord>>,
    banks: DashMap<Slug, BankRecord>,
}

impl MemoryKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyRegistry for MemoryKeyRegistry {
    async fn record_application_keys(
        &self,
        slug: &Slug,
        version: &KeyVersion,
        paths: &ApplicationKeyPaths,
        validity: &KeyValidity,
    ) -> Result<ApplicationRecord> {
        let record = ApplicationRecord {
            slug: slug.clone(),
            key_version: version.clone(),
            paths: paths.clone(),
            validity: *validity,
        };
        insert_version(
            &mut self.applications.entry(slug.clone()).or_default(),
            record.clone(),
        );
        Ok(record)
    }

    async fn record_bank_keys(&self, slug: &Slug, paths: &BankKeyPaths) -> Result<BankRecord> {
        let record = BankRecord {
            slug: slug.clone(),
            paths: paths.clone(),
            recorded_at: Utc::now(),
        };
        self.banks.insert(slug.clone(), record.clone());
        Ok(record)
    }

    async fn resolve_application_key_paths(
        &self,
        slug: &Slug,
        version: &KeyVersion,
    ) -> Result<ApplicationRecord> {
        self.applications
            .get(slug)
            .and_then(|versions| versions.iter().find(|r| &r.key_version == version).cloned())
            .ok_or_else(|| unknown_version(slug, version))
    }

    async fn resolve_bank_key_paths(&self, slug: &Slug) -> Result<BankRecord> {
        self.banks
            .get(slug)
            .map(|r| r.value().clone())
            .ok_or_else(|| unknown_bank(slug))
    }

    async fn current_application(&self, slug: &Slug) -> Result<Option<ApplicationRecord>> {
        Ok(self
            .applications
            .get(slug)
            .and_then(|versions| versions.last().cloned()))
    }

    async fn registered_applications(&self) -> Result<Vec<Slug>> {
        let mut slugs: Vec<Slug> = self.applications.iter().map(|e| e.key().clone()).collect();
        slugs.sort();
        Ok(slugs)
    }

    async fn registered_banks(&self) -> Result<Vec<Slug>> {
        let mut slugs: Vec<Slug> = self.banks.iter().map(|e| e.key().clone()).collect();
        slugs.sort();
        Ok(slugs)
    }
}

pub const CORE_FILE: &str = "core.json";

const METADATA_MODE: u32 = 0o644;

/// `<root>/core.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreIndex {
    #[serde(default)]
    pub relay_url: Option<String>,
    #[serde(default)]
    pub registered_applications: Vec<Slug>,
    #[serde(default)]
    pub registered_banks: Vec<Slug>,
}

/// `<root>/application/<slug>/<slug>.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApplicationEntry {
    slug: Slug,
    versions: Vec<ApplicationRecord>,
}

/// JSON files next to the key store
pub struct FileKeyRegistry {
    root: PathBuf,
    // Serializes read-modify-write cycles on core.json and entity files
    write_lock: Mutex<()>,
}

impl FileKeyRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn core_path(&self) -> PathBuf {
        self.root.join(CORE_FILE)
    }

    fn application_path(&self, slug: &Slug) -> PathBuf {
        self.root
            .join(APPLICATION_DIR)
            .join(slug.as_str())
            .join(format!("{}.json", slug))
    }

    fn bank_path(&self, slug: &Slug) -> PathBuf {
        self.root
            .join(BANK_DIR)
            .join(slug.as_str())
            .join(format!("{}.json", slug))
    }

    pub async fn core(&self) -> Result<CoreIndex> {
        Ok(read_json(&self.core_path()).await?.unwrap_or_default())
    }

    pub async fn relay_url(&self) -> Result<Option<String>> {
        Ok(self.core().await?.relay_url)
    }

    pub async fn set_relay_url(&self, relay_url: Option<String>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut core = self.core().await?;
        core.relay_url = relay_url;
        write_json(self.core_path(), &core).await
    }

    async fn application_entry(&self, slug: &Slug) -> Result<Option<ApplicationEntry>> {
        read_json(&self.application_path(slug)).await
    }
}

#[async_trait]
impl KeyRegistry for FileKeyRegistry {
    async fn record_application_keys(
        &self,
        slug: &Slug,
        version: &KeyVersion,
        paths: &ApplicationKeyPaths,
        validity: &KeyValidity,
    ) -> Result<ApplicationRecord> {
        let _guard = self.write_lock.lock().await;

        let record = ApplicationRecord {
            slug: slug.clone(),
            key_version: version.clone(),
            paths: paths.clone(),
            validity: *validity,
        };

        let mut entry = self
            .application_entry(slug)
            .await?
            .unwrap_or_else(|| ApplicationEntry {
                slug: slug.clone(),
                versions: Vec::new(),
            });
        insert_version(&mut entry.versions, record.clone());
        write_json(self.application_path(slug), &entry).await?;

        let mut core = self.core().await?;
        if !core.registered_applications.contains(slug) {
            core.registered_applications.push(slug.clone());
            core.registered_applications.sort();
            write_json(self.core_path(), &core).await?;
        }

        debug!(slug = %slug, key_version = %version, "application keys recorded");
        Ok(record)
    }

    async fn record_bank_keys(&self, slug: &Slug, paths: &BankKeyPaths) -> Result<BankRecord> {
        let _guard = self.write_lock.lock().await;

        let record = BankRecord {
            slug: slug.clone(),
            paths: paths.clone(),
            recorded_at: Utc::now(),
        };
        write_json(self.bank_path(slug), &record).await?;

        let mut core = self.core().await?;
        if !core.registered_banks.contains(slug) {
            core.registered_banks.push(slug.clone());
            core.registered_banks.sort();
            write_json(self.core_path(), &core).await?;
        }

        debug!(slug = %slug, "bank keys recorded");
        Ok(record)
    }

    async fn resolve_application_key_paths(
        &self,
        slug: &Slug,
        version: &KeyVersion,
    ) -> Result<ApplicationRecord> {
        self.application_entry(slug)
            .await?
            .and_then(|entry| {
                entry
                    .versions
                    .into_iter()
                    .find(|r| &r.key_version == version)
            })
            .ok_or_else(|| unknown_version(slug, version))
    }

    async fn resolve_bank_key_paths(&self, slug: &Slug) -> Result<BankRecord> {
        read_json(&self.bank_path(slug))
            .await?
            .ok_or_else(|| unknown_bank(slug))
    }

    async fn current_application(&self, slug: &Slug) -> Result<Option<ApplicationRecord>> {
        Ok(self
            .application_entry(slug)
            .await?
            .and_then(|entry| entry.versions.into_iter().last()))
    }

    async fn registered_applications(&self) -> Result<Vec<Slug>> {
        Ok(self.core().await?.registered_applications)
    }

    async fn registered_banks(&self) -> Result<Vec<Slug>> {
        Ok(self.core().await?.registered_banks)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice(&raw).map(Some).map_err(|e| {
            BridgeError::Registry(format!("{} is corrupt: {}", path.display(), e))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize>(path: PathBuf, value: &T) -> Result<()> {
    let contents = serde_json::to_vec_pretty(value)?;
    tokio::task::spawn_blocking(move || write_atomic(&path, &contents, METADATA_MODE, true))
        .await?
}
