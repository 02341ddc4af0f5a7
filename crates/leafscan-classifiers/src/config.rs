//! Configuration for model loading, caching and inference

use crate::lifecycle::{LifecycleSettings, ModelManager, DEFAULT_CACHE_KEY_PREFIX, DEFAULT_CANONICAL_KEY};
use crate::model_loader::DeviceType;
use crate::pipeline::ClassifyOptions;
use crate::response_cache::FsResponseCache;
use crate::sources::{LocalDirSource, ModelSource};
use crate::store::{FsModelStore, STORE_SCHEME};
use leafscan_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeafscanConfig {
    /// Where models come from
    #[serde(default)]
    pub model: ModelSection,

    /// Local caches
    #[serde(default)]
    pub cache: CacheSection,

    /// Inference overrides
    #[serde(default)]
    pub inference: InferenceSection,
}

/// Model location and device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSection {
    /// Base URL serving `model.json`, `classes.json` and `metadata.json`
    #[serde(default)]
    pub base_url: Option<String>,

    /// Directory holding a bundled copy of the model
    #[serde(default)]
    pub bundled_dir: Option<PathBuf>,

    /// Store key for the canonical model
    #[serde(default = "default_canonical_key")]
    pub canonical_key: String,

    /// Prefix of every store key owned by this model
    #[serde(default = "default_cache_key_prefix")]
    pub cache_key_prefix: String,

    /// Device to run on
    #[serde(default)]
    pub device: DeviceSpec,

    /// Transport timeout for remote fetches
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Cache directories and invalidation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSection {
    /// Persistent model store
    #[serde(default = "FsModelStore::default_root")]
    pub store_dir: PathBuf,

    /// HTTP response cache
    #[serde(default = "FsResponseCache::default_root")]
    pub response_cache_dir: PathBuf,

    /// Response cache entries containing any of these are purged on reload
    #[serde(default = "default_purge_markers")]
    pub purge_markers: Vec<String>,

    /// Pause between cache teardown and refetch
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

/// Overrides for values otherwise taken from `metadata.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceSection {
    #[serde(default)]
    pub confidence_threshold: Option<f32>,

    #[serde(default)]
    pub top_k: Option<usize>,
}

/// Device specification (for config files)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSpec {
    #[default]
    Cpu,
    Cuda { index: Option<usize> },
    Metal { index: Option<usize> },
}

impl DeviceSpec {
    /// Convert to DeviceType
    pub fn to_device_type(&self) -> DeviceType {
        match self {
            DeviceSpec::Cpu => DeviceType::Cpu,
            DeviceSpec::Cuda { index } => DeviceType::Cuda(index.unwrap_or(0)),
            DeviceSpec::Metal { index } => DeviceType::Metal(index.unwrap_or(0)),
        }
    }
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            base_url: None,
            bundled_dir: None,
            canonical_key: default_canonical_key(),
            cache_key_prefix: default_cache_key_prefix(),
            device: DeviceSpec::Cpu,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            store_dir: FsModelStore::default_root(),
            response_cache_dir: FsResponseCache::default_root(),
            purge_markers: default_purge_markers(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl LeafscanConfig {
    /// Load from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| Error::config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    /// Check keys and value ranges
    pub fn validate(&self) -> Result<()> {
        for key in [&self.model.canonical_key, &self.model.cache_key_prefix] {
            if !key.starts_with(STORE_SCHEME) {
                return Err(Error::config(format!(
                    "Store key '{}' must start with {}",
                    key, STORE_SCHEME
                )));
            }
        }

        if let Some(threshold) = self.inference.confidence_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(Error::config(format!(
                    "confidence_threshold must be within [0, 1], got {}",
                    threshold
                )));
            }
        }

        if self.inference.top_k == Some(0) {
            return Err(Error::config("top_k must be at least 1"));
        }

        Ok(())
    }

    /// Lifecycle settings derived from this configuration
    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            canonical_key: self.model.canonical_key.clone(),
            cache_key_prefix: self.model.cache_key_prefix.clone(),
            purge_markers: self.cache.purge_markers.clone(),
            settle_delay: Duration::from_millis(self.cache.settle_delay_ms),
            device: self.model.device.to_device_type(),
        }
    }

    /// Model sources in fallback order: remote first, then the bundled copy
    pub fn build_sources(&self) -> Result<Vec<Arc<dyn ModelSource>>> {
        let mut sources: Vec<Arc<dyn ModelSource>> = Vec::new();

        if let Some(base_url) = &self.model.base_url {
            #[cfg(feature = "remote")]
            {
                let remote = crate::sources::RemoteSource::new(
                    base_url.clone(),
                    Duration::from_secs(self.model.request_timeout_secs),
                )?
                .with_response_cache(&self.cache.response_cache_dir);
                sources.push(Arc::new(remote));
            }
            #[cfg(not(feature = "remote"))]
            tracing::warn!("Ignoring base_url {}: built without remote support", base_url);
        }

        if let Some(dir) = &self.model.bundled_dir {
            sources.push(Arc::new(LocalDirSource::new(dir.clone()).with_name("bundled")));
        }

        Ok(sources)
    }

    /// Build a manager backed by the filesystem store and response cache
    pub fn build_manager(&self) -> Result<ModelManager> {
        let mut builder = ModelManager::builder()
            .with_store(Arc::new(FsModelStore::new(self.cache.store_dir.clone())))
            .with_response_cache(Arc::new(FsResponseCache::new(self.cache.response_cache_dir.clone())))
            .with_settings(self.lifecycle_settings());

        for source in self.build_sources()? {
            builder = builder.with_source(source);
        }

        builder.build()
    }

    /// Default per-call options carrying the inference overrides
    pub fn classify_options(&self) -> ClassifyOptions {
        ClassifyOptions {
            threshold: self.inference.confidence_threshold,
            top_k: self.inference.top_k,
            ..ClassifyOptions::default()
        }
    }
}

fn default_canonical_key() -> String {
    DEFAULT_CANONICAL_KEY.to_string()
}

fn default_cache_key_prefix() -> String {
    DEFAULT_CACHE_KEY_PREFIX.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_purge_markers() -> Vec<String> {
    vec!["tensorflowjs".to_string(), "model".to_string()]
}

fn default_settle_delay_ms() -> u64 {
    500
}
