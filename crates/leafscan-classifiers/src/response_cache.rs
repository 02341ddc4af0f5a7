//! HTTP response cache invalidation

use async_trait::async_trait;
use leafscan_core::{Error, Result};
use std::path::PathBuf;

/// Named HTTP response cache entries
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Names of all cache entries
    async fn names(&self) -> Result<Vec<String>>;

    /// Delete one entry. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool>;
}

/// Delete every entry whose name contains one of `markers`
pub async fn purge_matching(cache: &dyn ResponseCache, markers: &[String]) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in cache.names().await? {
        if !markers.iter().any(|marker| name.contains(marker.as_str())) {
            continue;
        }
        match cache.delete(&name).await {
            Ok(true) => {
                tracing::info!("Deleted response cache {}", name);
                deleted.push(name);
            }
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to delete response cache {}: {}", name, e),
        }
    }
    Ok(deleted)
}

/// Response cache stored as one subdirectory per entry
pub struct FsResponseCache {
    root: PathBuf,
}

impl FsResponseCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.cache/leafscan/http`
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".leafscan"))
            .join("leafscan")
            .join("http")
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

#[async_trait]
impl ResponseCache for FsResponseCache {
    async fn names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(Error::storage(format!("Failed to list response cache: {}", e))),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::storage(format!("Failed to list response cache: {}", e)))?
        {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }

        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        if name.contains('/') || name.contains('\\') || name == ".." || name == "." {
            return Err(Error::storage(format!("Invalid response cache name: {}", name)));
        }
        let path = self.root.join(name);
        let result = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => Err(e),
        };
        result
            .map(|_| true)
            .map_err(|e| Error::storage(format!("Failed to delete response cache {}: {}", name, e)))
    }
}

/// No response cache
pub struct NoResponseCache;

#[async_trait]
impl ResponseCache for NoResponseCache {
    async fn names(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn delete(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_purge_matching() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["tensorflowjs-weights", "leafscan-model-example-com", "avatars"] {
            tokio::fs::create_dir_all(dir.path().join(name).join("nested")).await.unwrap();
        }

        let cache = FsResponseCache::new(dir.path());
        let markers = vec!["tensorflowjs".to_string(), "model".to_string()];
        let deleted = purge_matching(&cache, &markers).await.unwrap();

        assert_eq!(deleted, vec!["leafscan-model-example-com", "tensorflowjs-weights"]);
        assert_eq!(cache.names().await.unwrap(), vec!["avatars"]);
    }

    #[tokio::test]
    async fn test_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsResponseCache::new(dir.path().join("absent"));
        assert!(cache.names().await.unwrap().is_empty());
        assert!(!cache.delete("model").await.unwrap());
        assert!(cache.delete("../model").await.is_err());
    }

    #[tokio::test]
    async fn test_no_response_cache() {
        let deleted = purge_matching(&NoResponseCache, &["model".to_string()]).await.unwrap();
        assert!(deleted.is_empty());
    }
}
