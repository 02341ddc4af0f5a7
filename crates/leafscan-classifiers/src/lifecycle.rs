//! Model lifecycle management
//!
//! [`ModelManager`] owns the current [`ClassifierHandle`] and keeps the local
//! model store consistent with it. Loading tries the store first (warm
//! start), then each configured [`ModelSource`] in order (cold start), and
//! persists whatever it fetched. A forced reload discards the handle and the
//! cached copies before fetching again.

use crate::classifier::{self, ClassifierHandle};
use crate::labels::{ClassLabelTable, LabelOrigin};
use crate::model_config::ModelMetadata;
use crate::model_loader::{create_device, DeviceType, ModelArtifact};
use crate::response_cache::{purge_matching, NoResponseCache, ResponseCache};
use crate::sources::{FetchOptions, ModelSource};
use crate::store::{remove_with_prefix, MemoryModelStore, ModelStore};
use candle_core::Device;
use leafscan_core::{Error, ProgressFn, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

/// Key the canonical model is persisted under
pub const DEFAULT_CANONICAL_KEY: &str = "indexeddb://plant-disease-model-highaccuracy";

/// Prefix shared by every store key this manager owns
pub const DEFAULT_CACHE_KEY_PREFIX: &str = "indexeddb://plant-disease-model";

/// Lifecycle tuning
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Store key for warm starts
    pub canonical_key: String,

    /// Store entries with this prefix are removed on a forced reload
    pub cache_key_prefix: String,

    /// Response cache entries containing any marker are removed on a forced reload
    pub purge_markers: Vec<String>,

    /// Pause between cache teardown and the fresh fetch
    pub settle_delay: Duration,

    /// Device models are loaded onto
    pub device: DeviceType,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            canonical_key: DEFAULT_CANONICAL_KEY.to_string(),
            cache_key_prefix: DEFAULT_CACHE_KEY_PREFIX.to_string(),
            purge_markers: vec!["tensorflowjs".to_string(), "model".to_string()],
            settle_delay: Duration::from_millis(500),
            device: DeviceType::Cpu,
        }
    }
}

enum LifecycleState {
    Unloaded,
    Loading,
    Ready(Arc<ClassifierHandle>),
    Failed { reason: String },
    Disposed,
}

impl LifecycleState {
    fn status(&self) -> LifecycleStatus {
        match self {
            LifecycleState::Unloaded => LifecycleStatus::Unloaded,
            LifecycleState::Loading => LifecycleStatus::Loading,
            LifecycleState::Ready(_) => LifecycleStatus::Ready,
            LifecycleState::Failed { reason } => LifecycleStatus::Failed(reason.clone()),
            LifecycleState::Disposed => LifecycleStatus::Disposed,
        }
    }
}

/// Observable lifecycle status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleStatus {
    Unloaded,
    Loading,
    Ready,
    Failed(String),
    Disposed,
}

/// Owner of the session's classifier handle
pub struct ModelManager {
    sources: Vec<Arc<dyn ModelSource>>,
    store: Arc<dyn ModelStore>,
    response_cache: Arc<dyn ResponseCache>,
    settings: LifecycleSettings,
    device: Device,
    state: Mutex<LifecycleState>,
    /// Mirror of `state` readable while a load holds the state lock
    status: RwLock<LifecycleStatus>,
    /// Completed load attempts; lets waiters recognise an attempt that
    /// finished while they were queued on the state lock
    attempts: AtomicU64,
    labels: OnceCell<Arc<ClassLabelTable>>,
    metadata: OnceCell<ModelMetadata>,
}

impl ModelManager {
    /// Start building a manager
    pub fn builder() -> ModelManagerBuilder {
        ModelManagerBuilder::new()
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn ModelStore> {
        &self.store
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Current status without waiting for an in-flight load
    pub fn status(&self) -> LifecycleStatus {
        self.status.read().clone()
    }

    /// The current handle, if one is loaded
    pub async fn current(&self) -> Option<Arc<ClassifierHandle>> {
        match &*self.state.lock().await {
            LifecycleState::Ready(handle) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    /// Return the current handle, loading it first if necessary.
    ///
    /// Concurrent callers share one load: whoever takes the state lock first
    /// loads, the others wait and receive its outcome.
    pub async fn ensure_ready(&self, progress: Option<&ProgressFn>) -> Result<Arc<ClassifierHandle>> {
        let observed = self.attempts.load(Ordering::SeqCst);
        let mut state = self.state.lock().await;

        match &*state {
            LifecycleState::Ready(handle) => return Ok(Arc::clone(handle)),
            LifecycleState::Failed { reason } if self.attempts.load(Ordering::SeqCst) != observed => {
                return Err(Error::model_load(reason.clone()));
            }
            _ => {}
        }

        self.transition(&mut state, LifecycleState::Loading);
        let outcome = self.load(progress, FetchOptions::default()).await;
        self.finish_attempt(&mut state, outcome)
    }

    /// Discard the current handle and every cached copy, then fetch again.
    ///
    /// `silent` suppresses progress reporting and status logging; the
    /// operation itself is unchanged.
    pub async fn force_reload(&self, silent: bool, progress: Option<&ProgressFn>) -> Result<Arc<ClassifierHandle>> {
        let mut state = self.state.lock().await;

        if let LifecycleState::Ready(handle) = self.transition(&mut state, LifecycleState::Loading) {
            handle.dispose();
        }

        if silent {
            debug!("Reloading model");
        } else {
            info!("Reloading model from {} source(s)", self.sources.len());
        }
        metrics::counter!("leafscan_model_reloads_total").increment(1);

        self.purge_caches().await;

        if !self.settings.settle_delay.is_zero() {
            tokio::time::sleep(self.settings.settle_delay).await;
        }

        let progress = if silent { None } else { progress };
        let outcome = self.load(progress, FetchOptions { cache_bust: true }).await;
        self.finish_attempt(&mut state, outcome)
    }

    /// Probe `handle` with a zero input and compare its output with the label table
    pub async fn verify_compatibility(&self, handle: &ClassifierHandle) -> bool {
        let labels = self.labels().await;
        classifier::verify_compatibility(handle, labels.len())
    }

    /// Release `handle`. If it is the current handle the manager returns to
    /// `Unloaded`. Safe to call repeatedly.
    pub async fn dispose(&self, handle: &ClassifierHandle) -> bool {
        let mut state = self.state.lock().await;
        if let LifecycleState::Ready(current) = &*state {
            if std::ptr::eq(current.as_ref(), handle) {
                self.transition(&mut state, LifecycleState::Unloaded);
            }
        }
        handle.dispose()
    }

    /// Release the current handle and stop serving it
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let LifecycleState::Ready(handle) = self.transition(&mut state, LifecycleState::Disposed) {
            handle.dispose();
        }
        info!("Model manager shut down");
    }

    /// Class labels for this session, fetched once.
    ///
    /// Falls back to labels embedded in the metadata and finally to the
    /// built-in table; never fails.
    pub async fn labels(&self) -> Arc<ClassLabelTable> {
        self.labels
            .get_or_init(|| async { Arc::new(self.resolve_labels().await) })
            .await
            .clone()
    }

    /// Model metadata for this session, fetched once; defaults when absent
    pub async fn metadata(&self) -> ModelMetadata {
        self.metadata
            .get_or_init(|| self.resolve_metadata())
            .await
            .clone()
    }

    async fn resolve_labels(&self) -> ClassLabelTable {
        for source in &self.sources {
            match source.fetch_labels().await {
                Ok(labels) => {
                    info!("Loaded {} class labels from {}", labels.len(), source.name());
                    return labels;
                }
                Err(e) => debug!("No class labels from {}: {}", source.name(), e),
            }
        }

        if let Some(classes) = self.metadata().await.classes {
            if let Ok(labels) = ClassLabelTable::new(classes, LabelOrigin::Metadata) {
                info!("Using {} class labels from model metadata", labels.len());
                return labels;
            }
        }

        warn!("Class labels unavailable, using built-in table");
        ClassLabelTable::builtin()
    }

    async fn resolve_metadata(&self) -> ModelMetadata {
        for source in &self.sources {
            match source.fetch_metadata().await {
                Ok(metadata) => {
                    debug!("Loaded model metadata from {}", source.name());
                    return metadata;
                }
                Err(e) => debug!("No model metadata from {}: {}", source.name(), e),
            }
        }
        ModelMetadata::default()
    }

    /// Replace the state under its lock and publish the new status
    fn transition(&self, state: &mut LifecycleState, next: LifecycleState) -> LifecycleState {
        *self.status.write() = next.status();
        std::mem::replace(state, next)
    }

    fn finish_attempt(
        &self,
        state: &mut LifecycleState,
        outcome: Result<Arc<ClassifierHandle>>,
    ) -> Result<Arc<ClassifierHandle>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match outcome {
            Ok(handle) => {
                self.transition(state, LifecycleState::Ready(Arc::clone(&handle)));
                Ok(handle)
            }
            Err(e) => {
                let reason = match &e {
                    Error::ModelLoad(msg) => msg.clone(),
                    other => other.to_string(),
                };
                warn!("Model load failed: {}", reason);
                metrics::counter!("leafscan_model_loads_total", "path" => "failed").increment(1);
                self.transition(state, LifecycleState::Failed { reason });
                Err(e)
            }
        }
    }

    async fn load(&self, progress: Option<&ProgressFn>, options: FetchOptions) -> Result<Arc<ClassifierHandle>> {
        let expected = self.labels().await.len();

        if !options.cache_bust {
            if let Some(handle) = self.load_from_store(expected).await {
                metrics::counter!("leafscan_model_loads_total", "path" => "warm").increment(1);
                return Ok(Arc::new(handle));
            }
        }

        let (handle, artifact) = self.fetch_from_sources(expected, options, progress).await?;
        metrics::counter!("leafscan_model_loads_total", "path" => "cold").increment(1);

        match self.store.save(&self.settings.canonical_key, &artifact).await {
            Ok(info) => info!("Saved model to {} ({} bytes)", info.key, info.size_bytes),
            Err(e) => warn!("Failed to persist model, next start will refetch: {}", e),
        }

        Ok(Arc::new(handle))
    }

    async fn load_from_store(&self, expected_classes: usize) -> Option<ClassifierHandle> {
        let key = &self.settings.canonical_key;
        let artifact = match self.store.load(key).await {
            Ok(Some(artifact)) => artifact,
            Ok(None) => {
                debug!("No stored model under {}", key);
                return None;
            }
            Err(e) => {
                warn!("Model store unavailable, falling back to sources: {}", e);
                return None;
            }
        };

        match ClassifierHandle::from_artifact(&artifact, &self.device, key.clone(), "store") {
            Ok(handle) if classifier::verify_compatibility(&handle, expected_classes) => {
                info!("Loaded model from {}", key);
                Some(handle)
            }
            Ok(handle) => {
                warn!("Stored model {} is incompatible, discarding it", key);
                handle.dispose();
                self.discard(key).await;
                None
            }
            Err(e) => {
                warn!("Stored model {} is unreadable, discarding it: {}", key, e);
                self.discard(key).await;
                None
            }
        }
    }

    async fn fetch_from_sources(
        &self,
        expected_classes: usize,
        options: FetchOptions,
        progress: Option<&ProgressFn>,
    ) -> Result<(ClassifierHandle, ModelArtifact)> {
        if self.sources.is_empty() {
            return Err(Error::model_load("No model sources configured"));
        }

        let mut failures = Vec::new();
        for source in &self.sources {
            info!("Fetching model from {}", source.name());
            let artifact = match source.fetch_model(options, progress).await {
                Ok(artifact) => artifact,
                Err(e) => {
                    warn!("Model source {} failed: {}", source.name(), e);
                    failures.push(format!("{}: {}", source.name(), e));
                    continue;
                }
            };

            let handle = match ClassifierHandle::from_artifact(
                &artifact,
                &self.device,
                self.settings.canonical_key.clone(),
                source.name(),
            ) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("Model from {} could not be built: {}", source.name(), e);
                    failures.push(format!("{}: {}", source.name(), e));
                    continue;
                }
            };

            if classifier::verify_compatibility(&handle, expected_classes) {
                info!(
                    "Loaded model from {} ({}x{}x{} -> {} classes)",
                    source.name(),
                    handle.input_height(),
                    handle.input_width(),
                    handle.input_channels(),
                    handle.num_classes()
                );
                return Ok((handle, artifact));
            }

            handle.dispose();
            failures.push(format!(
                "{}: model is incompatible with {} class labels",
                source.name(),
                expected_classes
            ));
        }

        Err(Error::model_load(format!(
            "All model sources failed ({})",
            failures.join("; ")
        )))
    }

    async fn purge_caches(&self) {
        match remove_with_prefix(self.store.as_ref(), &self.settings.cache_key_prefix).await {
            Ok(removed) => debug!("Removed {} stored model(s)", removed.len()),
            Err(e) => warn!("Failed to clear model store: {}", e),
        }
        match purge_matching(self.response_cache.as_ref(), &self.settings.purge_markers).await {
            Ok(deleted) => debug!("Deleted {} response cache entr(ies)", deleted.len()),
            Err(e) => warn!("Failed to clear response cache: {}", e),
        }
    }

    async fn discard(&self, key: &str) {
        if let Err(e) = self.store.remove(key).await {
            warn!("Failed to remove stored model {}: {}", key, e);
        }
    }
}

/// Builder for [`ModelManager`]
pub struct ModelManagerBuilder {
    sources: Vec<Arc<dyn ModelSource>>,
    store: Option<Arc<dyn ModelStore>>,
    response_cache: Option<Arc<dyn ResponseCache>>,
    settings: LifecycleSettings,
    labels: Option<ClassLabelTable>,
    metadata: Option<ModelMetadata>,
}

impl ModelManagerBuilder {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            store: None,
            response_cache: None,
            settings: LifecycleSettings::default(),
            labels: None,
            metadata: None,
        }
    }

    /// Append a source; sources are tried in insertion order
    pub fn with_source(mut self, source: Arc<dyn ModelSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ModelStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_response_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.response_cache = Some(cache);
        self
    }

    pub fn with_settings(mut self, settings: LifecycleSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Use a fixed label table instead of fetching one
    pub fn with_labels(mut self, labels: ClassLabelTable) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Use fixed metadata instead of fetching it
    pub fn with_metadata(mut self, metadata: ModelMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn build(self) -> Result<ModelManager> {
        if !self.settings.canonical_key.starts_with(&self.settings.cache_key_prefix) {
            warn!(
                "Canonical key {} is outside cache prefix {}; forced reloads will not clear it",
                self.settings.canonical_key, self.settings.cache_key_prefix
            );
        }

        let device = create_device(self.settings.device)?;

        Ok(ModelManager {
            sources: self.sources,
            store: self.store.unwrap_or_else(|| Arc::new(MemoryModelStore::new())),
            response_cache: self.response_cache.unwrap_or_else(|| Arc::new(NoResponseCache)),
            settings: self.settings,
            device,
            state: Mutex::new(LifecycleState::Unloaded),
            status: RwLock::new(LifecycleStatus::Unloaded),
            attempts: AtomicU64::new(0),
            labels: OnceCell::new_with(self.labels.map(Arc::new)),
            metadata: OnceCell::new_with(self.metadata),
        })
    }
}

impl Default for ModelManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
