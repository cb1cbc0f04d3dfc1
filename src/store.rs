//! Durable, single-file store for webhook configurations and delivery history.
//!
//! The whole state lives in one versioned JSON document. Every mutation is
//! applied to a copy of the in-memory mirror, written to `<file>.tmp`,
//! fsynced and renamed over the live file, so readers only ever observe a
//! complete file and a crash mid-write leaves the previous version intact.
//! The mirror is swapped for the new copy only after the rename succeeds.

use std::collections::{BTreeMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::types::{DeliveryRecord, OwnerId, WebhookConfiguration};

/// Delivery records retained per owner before the oldest are evicted.
pub const MAX_DELIVERIES_PER_OWNER: usize = 50;

/// Current on-disk schema version.
pub const STORE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OwnerEntry {
    #[serde(default)]
    pub configuration: Option<WebhookConfiguration>,
    /// Oldest first.
    #[serde(default)]
    pub deliveries: VecDeque<DeliveryRecord>,
}

impl OwnerEntry {
    fn is_empty(&self) -> bool {
        self.configuration.is_none() && self.deliveries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreFile {
    pub version: u32,
    #[serde(default)]
    pub owners: BTreeMap<OwnerId, OwnerEntry>,
}

impl Default for StoreFile {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            owners: BTreeMap::new(),
        }
    }
}

impl StoreFile {
    pub fn entry(&mut self, owner: &OwnerId) -> &mut OwnerEntry {
        self.owners.entry(owner.clone()).or_default()
    }

    /// Drop the owner's entry once it holds neither configuration nor history.
    pub fn compact_owner(&mut self, owner: &OwnerId) {
        if self.owners.get(owner).is_some_and(OwnerEntry::is_empty) {
            self.owners.remove(owner);
        }
    }
}

/// Handle to the store file. Construct once per process and share by `Arc`.
pub struct WebhookStore {
    path: PathBuf,
    /// `None` until the file is first loaded.
    mirror: Mutex<Option<StoreFile>>,
}

impl WebhookStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mirror: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the current state under the store lock.
    pub async fn read<R>(&self, f: impl FnOnce(&StoreFile) -> R) -> R {
        let mut guard = self.mirror.lock().await;
        let file = guard.get_or_insert_with(|| load_or_empty(&self.path));
        f(file)
    }

    /// Apply `f` to a copy of the state and persist it atomically.
    ///
    /// The whole read-modify-write runs in one critical section. On a failed
    /// write the mirror keeps the previously persisted state.
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut StoreFile) -> R) -> Result<R, StoreError> {
        let mut guard = self.mirror.lock().await;
        let current = guard.get_or_insert_with(|| load_or_empty(&self.path));

        let mut next = current.clone();
        let out = f(&mut next);
        save_atomic(&self.path, &next)?;
        *guard = Some(next);
        Ok(out)
    }

    pub async fn configuration(&self, owner: &OwnerId) -> Option<WebhookConfiguration> {
        self.read(|file| {
            file.owners
                .get(owner)
                .and_then(|entry| entry.configuration.clone())
        })
        .await
    }

    /// Insert `record`, or replace the record with the same id.
    pub async fn upsert_delivery(
        &self,
        owner: &OwnerId,
        record: DeliveryRecord,
    ) -> Result<(), StoreError> {
        self.mutate(|file| {
            let ring = &mut file.entry(owner).deliveries;
            match ring.iter_mut().find(|existing| existing.id == record.id) {
                Some(existing) => *existing = record,
                None => {
                    ring.push_back(record);
                    while ring.len() > MAX_DELIVERIES_PER_OWNER {
                        ring.pop_front();
                    }
                }
            }
        })
        .await
    }

    /// Delivery history for `owner`, newest first.
    pub async fn deliveries(&self, owner: &OwnerId) -> Vec<DeliveryRecord> {
        self.read(|file| {
            file.owners
                .get(owner)
                .map(|entry| entry.deliveries.iter().rev().cloned().collect())
                .unwrap_or_default()
        })
        .await
    }
}

fn load(path: &Path) -> Result<StoreFile, StoreError> {
    let bytes = std::fs::read(path)?;
    let file: StoreFile = serde_json::from_slice(&bytes)?;
    if file.version != STORE_VERSION {
        return Err(StoreError::SchemaMismatch {
            expected: STORE_VERSION,
            got: file.version,
        });
    }
    Ok(file)
}

/// Load the store file. A missing file is an empty store; an unreadable or
/// malformed one is logged and also treated as empty.
fn load_or_empty(path: &Path) -> StoreFile {
    match load(path) {
        Ok(file) => file,
        Err(StoreError::Io(e)) if e.kind() == io::ErrorKind::NotFound => StoreFile::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "webhook store unreadable, starting empty");
            StoreFile::default()
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn save_atomic(path: &Path, file: &StoreFile) -> Result<(), StoreError> {
    let dir = parent_dir(path);
    std::fs::create_dir_all(dir)?;

    let tmp = tmp_path(path);
    let bytes = serde_json::to_vec_pretty(file)?;
    {
        let mut out = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        out.write_all(&bytes)?;
        out.sync_all()?;
    }

    std::fs::rename(&tmp, path)?;

    // Make the rename itself durable.
    File::open(dir)?.sync_all()?;
    Ok(())
}
