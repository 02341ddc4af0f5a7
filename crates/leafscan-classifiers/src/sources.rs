//! Model sources
//!
//! A [`ModelSource`] knows how to fetch `model.json`, its weight shards,
//! `classes.json` and `metadata.json` from one location. The lifecycle
//! manager walks an ordered list of sources and uses the first that works.

use crate::labels::{ClassLabelTable, CLASSES_FILE};
use crate::model_config::{ModelMetadata, METADATA_FILE};
use crate::model_loader::{ModelArtifact, ModelTopology, WeightShard, MODEL_FILE};
use async_trait::async_trait;
use leafscan_core::{Error, ProgressFn, Result};
use std::path::{Path, PathBuf};

/// Options for a model fetch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Bypass intermediate caches (`?t=<millis>` for HTTP sources)
    pub cache_bust: bool,
}

/// Location a model can be fetched from
#[async_trait]
pub trait ModelSource: Send + Sync {
    /// Source name used in logs and handle metadata
    fn name(&self) -> &str;

    /// Fetch the model description and all weight shards
    async fn fetch_model(&self, options: FetchOptions, progress: Option<&ProgressFn>) -> Result<ModelArtifact>;

    /// Fetch `classes.json`
    async fn fetch_labels(&self) -> Result<ClassLabelTable>;

    /// Fetch `metadata.json`
    async fn fetch_metadata(&self) -> Result<ModelMetadata>;
}

/// Report `done / total` through an optional progress callback
pub(crate) fn report_progress(progress: Option<&ProgressFn>, done: usize, total: usize) {
    if let Some(progress) = progress {
        let fraction = if total == 0 { 1.0 } else { done as f32 / total as f32 };
        progress(fraction.clamp(0.0, 1.0));
    }
}

/// Shard paths come from an untrusted document; keep them inside the model directory
pub(crate) fn validate_shard_path(path: &str) -> Result<()> {
    let invalid = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.split('/').any(|part| part == ".." || part.is_empty());
    if invalid {
        return Err(Error::model_load(format!("Invalid weight shard path: {}", path)));
    }
    Ok(())
}

/// Model bundled in a local directory
pub struct LocalDirSource {
    name: String,
    dir: PathBuf,
}

impl LocalDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            name: format!("bundled:{}", dir.display()),
            dir,
        }
    }

    /// Override the source name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    async fn read(&self, file: &str) -> Result<Vec<u8>> {
        let path = self.dir.join(file);
        tokio::fs::read(&path)
            .await
            .map_err(|e| Error::model_load(format!("Failed to read {}: {}", path.display(), e)))
    }
}

#[async_trait]
impl ModelSource for LocalDirSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_model(&self, _options: FetchOptions, progress: Option<&ProgressFn>) -> Result<ModelArtifact> {
        let topology = ModelTopology::from_json(&self.read(MODEL_FILE).await?)?;
        let paths = topology.shard_paths();
        let total = paths.len() + 1;
        report_progress(progress, 1, total);

        let mut shards = Vec::with_capacity(paths.len());
        for (i, path) in paths.into_iter().enumerate() {
            validate_shard_path(&path)?;
            let bytes = self.read(&path).await?;
            shards.push(WeightShard { path, bytes });
            report_progress(progress, i + 2, total);
        }

        ModelArtifact::new(topology, shards)
    }

    async fn fetch_labels(&self) -> Result<ClassLabelTable> {
        ClassLabelTable::from_json(&self.read(CLASSES_FILE).await?)
    }

    async fn fetch_metadata(&self) -> Result<ModelMetadata> {
        ModelMetadata::from_json(&self.read(METADATA_FILE).await?)
    }
}

/// Model served over HTTP under a base URL
#[cfg(feature = "remote")]
pub struct RemoteSource {
    name: String,
    base_url: String,
    client: reqwest::Client,
    response_cache_dir: Option<PathBuf>,
}

#[cfg(feature = "remote")]
impl RemoteSource {
    /// Create a source for `<base_url>/model.json`
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name: format!("remote:{}", base_url),
            base_url,
            client,
            response_cache_dir: None,
        })
    }

    /// Keep downloaded files in a response cache directory.
    ///
    /// Files are reused on later fetches unless the fetch is cache-busted.
    pub fn with_response_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.response_cache_dir = Some(dir.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Name of this source's entry in the response cache
    pub fn cache_entry_name(&self) -> String {
        let sanitized: String = self
            .base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        format!("leafscan-model-{}", sanitized)
    }

    fn url(&self, file: &str, cache_bust: bool) -> String {
        if cache_bust {
            format!(
                "{}/{}?t={}",
                self.base_url,
                file,
                chrono::Utc::now().timestamp_millis()
            )
        } else {
            format!("{}/{}", self.base_url, file)
        }
    }

    fn cached_path(&self, file: &str) -> Option<PathBuf> {
        self.response_cache_dir
            .as_ref()
            .map(|dir| dir.join(self.cache_entry_name()).join(file))
    }

    async fn get(&self, file: &str, cache_bust: bool) -> Result<Vec<u8>> {
        let cached = self.cached_path(file);
        if !cache_bust {
            if let Some(path) = &cached {
                if let Ok(bytes) = tokio::fs::read(path).await {
                    tracing::debug!("Serving {} from response cache", file);
                    return Ok(bytes);
                }
            }
        }

        let url = self.url(file, cache_bust);
        tracing::debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::model_load(format!("Failed to fetch {}: {}", url, e)))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::model_load(format!("Failed to read body of {}: {}", url, e)))?
            .to_vec();

        if let Some(path) = cached {
            if let Err(e) = write_cached(&path, &bytes).await {
                tracing::warn!("Failed to cache {}: {}", file, e);
            }
        }

        Ok(bytes)
    }
}

#[cfg(feature = "remote")]
async fn write_cached(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}

#[cfg(feature = "remote")]
#[async_trait]
impl ModelSource for RemoteSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_model(&self, options: FetchOptions, progress: Option<&ProgressFn>) -> Result<ModelArtifact> {
        let topology = ModelTopology::from_json(&self.get(MODEL_FILE, options.cache_bust).await?)?;
        let paths = topology.shard_paths();
        let total = paths.len() + 1;
        report_progress(progress, 1, total);

        let mut shards = Vec::with_capacity(paths.len());
        for (i, path) in paths.into_iter().enumerate() {
            validate_shard_path(&path)?;
            let bytes = self.get(&path, options.cache_bust).await?;
            shards.push(WeightShard { path, bytes });
            report_progress(progress, i + 2, total);
        }

        ModelArtifact::new(topology, shards)
    }

    async fn fetch_labels(&self) -> Result<ClassLabelTable> {
        ClassLabelTable::from_json(&self.get(CLASSES_FILE, false).await?)
    }

    async fn fetch_metadata(&self) -> Result<ModelMetadata> {
        ModelMetadata::from_json(&self.get(METADATA_FILE, true).await?)
    }
}

/// Write an artifact as a model directory that [`LocalDirSource`] can read
pub async fn write_model_dir(dir: &Path, artifact: &ModelArtifact) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join(MODEL_FILE), artifact.topology_json()?).await?;
    for shard in &artifact.shards {
        validate_shard_path(&shard.path)?;
        let path = dir.join(&shard.path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &shard.bytes).await?;
    }
    Ok(())
}
