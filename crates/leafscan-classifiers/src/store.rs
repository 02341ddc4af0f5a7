//! Persistent local model store
//!
//! Entries are keyed by `indexeddb://<name>` strings. The filesystem store
//! keeps one directory per key under its root, laid out like a bundled model
//! directory plus an `entry.json` record.

use crate::model_loader::{ModelArtifact, ModelTopology, WeightShard, MODEL_FILE};
use crate::sources::validate_shard_path;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leafscan_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Scheme prefix of every store key
pub const STORE_SCHEME: &str = "indexeddb://";

const ENTRY_FILE: &str = "entry.json";

/// Summary of one stored model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredModelInfo {
    pub key: String,
    pub size_bytes: u64,
    pub saved_at: DateTime<Utc>,
}

/// Durable key-value store for serialized models
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// List all stored entries
    async fn list(&self) -> Result<Vec<StoredModelInfo>>;

    /// Load the entry under `key`, `None` on a miss
    async fn load(&self, key: &str) -> Result<Option<ModelArtifact>>;

    /// Persist `artifact` under `key`, replacing any previous entry
    async fn save(&self, key: &str, artifact: &ModelArtifact) -> Result<StoredModelInfo>;

    /// Remove the entry under `key`. Returns false if there was none.
    async fn remove(&self, key: &str) -> Result<bool>;
}

/// Remove every entry whose key starts with `prefix`.
///
/// Individual failures are logged and skipped; the removed keys are returned.
pub async fn remove_with_prefix(store: &dyn ModelStore, prefix: &str) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for info in store.list().await? {
        if !info.key.starts_with(prefix) {
            continue;
        }
        match store.remove(&info.key).await {
            Ok(true) => {
                tracing::info!("Removed stored model {}", info.key);
                removed.push(info.key);
            }
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to remove stored model {}: {}", info.key, e),
        }
    }
    Ok(removed)
}

/// Strip the scheme and validate the entry name of a store key
fn entry_name(key: &str) -> Result<&str> {
    let name = key
        .strip_prefix(STORE_SCHEME)
        .ok_or_else(|| Error::storage(format!("Store key must start with {}: {}", STORE_SCHEME, key)))?;
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !valid {
        return Err(Error::storage(format!("Invalid store key: {}", key)));
    }
    Ok(name)
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryRecord {
    key: String,
    saved_at: DateTime<Utc>,
}

/// Filesystem-backed model store
pub struct FsModelStore {
    root: PathBuf,
}

impl FsModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.cache/leafscan/models`, or `./.leafscan/models` without a cache dir
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".leafscan"))
            .join("leafscan")
            .join("models")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(entry_name(key)?))
    }

    async fn read_entry(dir: &Path) -> Result<ModelArtifact> {
        let topology = ModelTopology::from_json(&tokio::fs::read(dir.join(MODEL_FILE)).await?)?;
        let mut shards = Vec::new();
        for path in topology.shard_paths() {
            validate_shard_path(&path)?;
            let bytes = tokio::fs::read(dir.join(&path)).await?;
            shards.push(WeightShard { path, bytes });
        }
        ModelArtifact::new(topology, shards)
    }

    async fn dir_size(dir: &Path) -> u64 {
        let mut total = 0;
        if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if let Ok(meta) = entry.metadata().await {
                    if meta.is_file() {
                        total += meta.len();
                    }
                }
            }
        }
        total
    }
}

#[async_trait]
impl ModelStore for FsModelStore {
    async fn list(&self) -> Result<Vec<StoredModelInfo>> {
        let mut infos = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(infos),
            Err(e) => return Err(Error::storage(format!("Failed to list model store: {}", e))),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::storage(format!("Failed to list model store: {}", e)))?
        {
            let dir = entry.path();
            let record = match tokio::fs::read(dir.join(ENTRY_FILE)).await {
                Ok(bytes) => match serde_json::from_slice::<EntryRecord>(&bytes) {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::warn!("Skipping corrupt store entry {}: {}", dir.display(), e);
                        continue;
                    }
                },
                // Partial writes and unrelated directories have no record
                Err(_) => continue,
            };
            infos.push(StoredModelInfo {
                key: record.key,
                size_bytes: Self::dir_size(&dir).await,
                saved_at: record.saved_at,
            });
        }

        infos.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(infos)
    }

    async fn load(&self, key: &str) -> Result<Option<ModelArtifact>> {
        let dir = self.entry_dir(key)?;
        if !tokio::fs::try_exists(dir.join(ENTRY_FILE)).await.unwrap_or(false) {
            return Ok(None);
        }
        Self::read_entry(&dir)
            .await
            .map(Some)
            .map_err(|e| Error::storage(format!("Failed to load {}: {}", key, e)))
    }

    async fn save(&self, key: &str, artifact: &ModelArtifact) -> Result<StoredModelInfo> {
        let name = entry_name(key)?;
        let dir = self.root.join(name);
        let staging = self.root.join(format!(".{}.partial", name));
        let storage_err = |e: std::io::Error| Error::storage(format!("Failed to save {}: {}", key, e));

        if tokio::fs::try_exists(&staging).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&staging).await.map_err(storage_err)?;
        }
        crate::sources::write_model_dir(&staging, artifact)
            .await
            .map_err(|e| Error::storage(format!("Failed to save {}: {}", key, e)))?;

        if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&dir).await.map_err(storage_err)?;
        }
        tokio::fs::rename(&staging, &dir).await.map_err(storage_err)?;

        // The record is written last; entries without one are never loaded
        let record = EntryRecord {
            key: key.to_string(),
            saved_at: Utc::now(),
        };
        tokio::fs::write(dir.join(ENTRY_FILE), serde_json::to_vec_pretty(&record)?)
            .await
            .map_err(storage_err)?;

        Ok(StoredModelInfo {
            key: record.key,
            size_bytes: Self::dir_size(&dir).await,
            saved_at: record.saved_at,
        })
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let dir = self.entry_dir(key)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::storage(format!("Failed to remove {}: {}", key, e))),
        }
    }
}

/// In-memory model store
#[derive(Default)]
pub struct MemoryModelStore {
    entries: RwLock<HashMap<String, (ModelArtifact, DateTime<Utc>)>>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModelStore for MemoryModelStore {
    async fn list(&self) -> Result<Vec<StoredModelInfo>> {
        let entries = self.entries.read().await;
        let mut infos: Vec<_> = entries
            .iter()
            .map(|(key, (artifact, saved_at))| StoredModelInfo {
                key: key.clone(),
                size_bytes: artifact.weights_size() as u64,
                saved_at: *saved_at,
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(infos)
    }

    async fn load(&self, key: &str) -> Result<Option<ModelArtifact>> {
        entry_name(key)?;
        Ok(self.entries.read().await.get(key).map(|(artifact, _)| artifact.clone()))
    }

    async fn save(&self, key: &str, artifact: &ModelArtifact) -> Result<StoredModelInfo> {
        entry_name(key)?;
        let saved_at = Utc::now();
        self.entries
            .write()
            .await
            .insert(key.to_string(), (artifact.clone(), saved_at));
        Ok(StoredModelInfo {
            key: key.to_string(),
            size_bytes: artifact.weights_size() as u64,
            saved_at,
        })
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }
}
