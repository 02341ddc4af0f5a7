//! Classifier handle and compatibility checks

use crate::model_loader::{ImageModel, ModelArtifact, SequentialModel};
use candle_core::{DType, Device, Tensor};
use leafscan_core::{Error, Result};
use parking_lot::RwLock;
use std::fmt;

/// A loaded image classifier.
///
/// Shape accessors are fixed when the handle is created. The underlying
/// model is released by [`ClassifierHandle::dispose`]; further inference on
/// a released handle fails with [`Error::Disposed`].
pub struct ClassifierHandle {
    model: RwLock<Option<Box<dyn ImageModel>>>,
    input_shape: [usize; 3],
    num_classes: usize,
    device: Device,
    storage_key: String,
    source: String,
}

impl ClassifierHandle {
    /// Wrap a model
    pub fn new(model: Box<dyn ImageModel>, storage_key: impl Into<String>, source: impl Into<String>) -> Self {
        let input_shape = model.input_shape();
        let num_classes = model.num_classes();
        let device = model.device().clone();

        Self {
            model: RwLock::new(Some(model)),
            input_shape,
            num_classes,
            device,
            storage_key: storage_key.into(),
            source: source.into(),
        }
    }

    /// Build a handle from a serialized artifact
    pub fn from_artifact(
        artifact: &ModelArtifact,
        device: &Device,
        storage_key: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<Self> {
        let model = SequentialModel::build(artifact, device)?;
        Ok(Self::new(Box::new(model), storage_key, source))
    }

    pub fn input_height(&self) -> usize {
        self.input_shape[0]
    }

    pub fn input_width(&self) -> usize {
        self.input_shape[1]
    }

    pub fn input_channels(&self) -> usize {
        self.input_shape[2]
    }

    /// Declared batch input shape `[1, H, W, C]`
    pub fn batch_input_shape(&self) -> [usize; 4] {
        [1, self.input_shape[0], self.input_shape[1], self.input_shape[2]]
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Device inputs must be created on
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Store key the model was last persisted under
    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    /// Where the model came from (store or source name)
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Run a forward pass.
    ///
    /// The input shape is checked against the declared shape before the
    /// model runs, so a stale model surfaces as [`Error::ShapeMismatch`].
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let guard = self.model.read();
        let model = guard.as_ref().ok_or(Error::Disposed)?;

        let expected = self.batch_input_shape();
        if input.dims() != expected {
            return Err(Error::shape_mismatch(expected.to_vec(), input.dims().to_vec()));
        }

        let output = model
            .forward(input)
            .map_err(|e| Error::inference(format!("Model forward pass failed: {}", e)))?;

        if output.elem_count() != self.num_classes {
            return Err(Error::shape_mismatch(
                vec![1, self.num_classes],
                output.dims().to_vec(),
            ));
        }

        Ok(output)
    }

    /// Release the model. Returns false if it was already released.
    pub fn dispose(&self) -> bool {
        let released = self.model.write().take();
        if released.is_some() {
            tracing::debug!("Disposed classifier handle for {}", self.storage_key);
            true
        } else {
            false
        }
    }

    /// Whether the model has been released
    pub fn is_disposed(&self) -> bool {
        self.model.read().is_none()
    }
}

impl fmt::Debug for ClassifierHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifierHandle")
            .field("input_shape", &self.input_shape)
            .field("num_classes", &self.num_classes)
            .field("storage_key", &self.storage_key)
            .field("source", &self.source)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Run one zero-filled forward pass and check the output arity.
///
/// Returns false when inference fails or the output length differs from
/// `expected_classes`.
pub fn verify_compatibility(handle: &ClassifierHandle, expected_classes: usize) -> bool {
    if handle.num_classes() != expected_classes {
        tracing::warn!(
            "Model declares {} classes, label table has {}",
            handle.num_classes(),
            expected_classes
        );
        return false;
    }

    let probe = match Tensor::zeros(handle.batch_input_shape().to_vec(), DType::F32, handle.device()) {
        Ok(probe) => probe,
        Err(e) => {
            tracing::warn!("Failed to allocate compatibility probe: {}", e);
            return false;
        }
    };

    match handle.forward(&probe) {
        Ok(output) => output.elem_count() == expected_classes,
        Err(e) => {
            tracing::warn!("Compatibility probe failed: {}", e);
            false
        }
    }
}
