//! LeafScan Classifiers
//!
//! Offline plant disease classification on top of candle.
//!
//! - [`lifecycle::ModelManager`] owns the loaded model. It warm-starts from
//!   the local model store, falls back through an ordered list of model
//!   sources, and can force a full reload that clears every cached copy.
//! - [`pipeline::InferencePipeline`] decodes an image, resizes it to the
//!   model input, runs the forward pass and applies the confidence threshold
//!   and optional plant-type hint.
//!
//! Everything runs on CPU by default.

pub mod classifier;
pub mod config;
pub mod labels;
pub mod lifecycle;
pub mod model_config;
pub mod model_loader;
pub mod pipeline;
pub mod preprocess;
pub mod response_cache;
pub mod scope;
pub mod sources;
pub mod store;

pub use classifier::{verify_compatibility, ClassifierHandle};
pub use config::{DeviceSpec, LeafscanConfig};
pub use labels::{ClassLabelTable, LabelOrigin};
pub use lifecycle::{LifecycleSettings, LifecycleStatus, ModelManager, ModelManagerBuilder};
pub use model_config::ModelMetadata;
pub use model_loader::{DeviceType, ImageModel, LayerSpec, ModelArtifact, ModelTopology, SequentialModel};
pub use pipeline::{interpret, ClassifyOptions, InferencePipeline};
pub use preprocess::ImageInput;
pub use response_cache::{FsResponseCache, NoResponseCache, ResponseCache};
pub use scope::{BufferLedger, BufferScope};
#[cfg(feature = "remote")]
pub use sources::RemoteSource;
pub use sources::{FetchOptions, LocalDirSource, ModelSource};
pub use store::{FsModelStore, MemoryModelStore, ModelStore, StoredModelInfo};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::classifier::ClassifierHandle;
    pub use crate::labels::ClassLabelTable;
    pub use crate::lifecycle::ModelManager;
    pub use crate::pipeline::{ClassifyOptions, InferencePipeline};
    pub use crate::preprocess::ImageInput;
    pub use leafscan_core::{Error, ErrorKind, Outcome, Result};
}
