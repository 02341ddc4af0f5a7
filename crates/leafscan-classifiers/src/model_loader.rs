//! Model description, serialized artifacts and Candle model construction
//!
//! A model is shipped as a `model.json` topology plus one or more
//! safetensors weight shards listed in its weights manifest. The same layout
//! is used by remote sources, bundled directories and the local model store.

use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{Conv2d, Conv2dConfig, Linear, VarBuilder};
use leafscan_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// File name of the model description inside a model directory
pub const MODEL_FILE: &str = "model.json";

/// Format tag written into every topology produced by this crate
pub const SEQUENTIAL_FORMAT: &str = "sequential-image-classifier";

/// Serializable description of a sequential image classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTopology {
    /// Model name/identifier
    #[serde(default = "default_model_name")]
    pub name: String,

    /// Format tag
    #[serde(default = "default_format")]
    pub format: String,

    /// Expected input as `[height, width, channels]`
    pub input_shape: [usize; 3],

    /// Ordered layers
    pub layers: Vec<LayerSpec>,

    /// Weight shard groups
    #[serde(default)]
    pub weights_manifest: Vec<WeightsGroup>,
}

/// A group of weight shard files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightsGroup {
    /// Shard file names, relative to the model directory
    pub paths: Vec<String>,
}

/// Layer specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    /// 2D convolution; weights `<name>.weight` and `<name>.bias`
    Conv2d {
        name: String,
        filters: usize,
        kernel_size: usize,
        #[serde(default = "default_stride")]
        stride: usize,
        #[serde(default)]
        padding: usize,
    },

    /// Max pooling with stride equal to the window size
    MaxPool2d {
        #[serde(default = "default_pool_size")]
        size: usize,
    },

    /// Rectified linear unit
    Relu,

    /// Mean over the spatial dimensions
    GlobalAveragePool,

    /// Flatten everything but the batch dimension
    Flatten,

    /// Fully connected layer; weights `<name>.weight` and `<name>.bias`
    Dense { name: String, units: usize },

    /// Softmax over the last dimension
    Softmax,
}

fn default_model_name() -> String {
    "plant-disease-model".to_string()
}

fn default_format() -> String {
    SEQUENTIAL_FORMAT.to_string()
}

fn default_stride() -> usize {
    1
}

fn default_pool_size() -> usize {
    2
}

impl ModelTopology {
    /// Parse a topology from `model.json` bytes
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::model_load(format!("Malformed model description: {}", e)))
    }

    /// All shard paths in manifest order
    pub fn shard_paths(&self) -> Vec<String> {
        self.weights_manifest
            .iter()
            .flat_map(|group| group.paths.iter().cloned())
            .collect()
    }
}

/// One weight shard file
#[derive(Debug, Clone, PartialEq)]
pub struct WeightShard {
    /// Path as listed in the weights manifest
    pub path: String,

    /// Raw safetensors bytes
    pub bytes: Vec<u8>,
}

/// A serialized model: topology plus weight shards
#[derive(Debug, Clone, PartialEq)]
pub struct ModelArtifact {
    pub topology: ModelTopology,
    pub shards: Vec<WeightShard>,
}

impl ModelArtifact {
    /// Create an artifact, checking that every manifest entry has a shard
    pub fn new(topology: ModelTopology, shards: Vec<WeightShard>) -> Result<Self> {
        for path in topology.shard_paths() {
            if !shards.iter().any(|shard| shard.path == path) {
                return Err(Error::model_load(format!("Missing weight shard: {}", path)));
            }
        }
        Ok(Self { topology, shards })
    }

    /// Serialize named tensors into a single shard and attach it to the topology
    pub fn from_tensors(mut topology: ModelTopology, tensors: &HashMap<String, Tensor>) -> Result<Self> {
        let bytes = safetensors::serialize(
            tensors.iter().map(|(name, tensor)| (name.as_str(), tensor)),
            &None,
        )
        .map_err(|e| Error::internal(format!("Failed to serialize weights: {}", e)))?;

        let path = "weights.safetensors".to_string();
        topology.weights_manifest = vec![WeightsGroup {
            paths: vec![path.clone()],
        }];

        Self::new(topology, vec![WeightShard { path, bytes }])
    }

    /// `model.json` contents for this artifact
    pub fn topology_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&self.topology)?)
    }

    /// Total size of the weight shards in bytes
    pub fn weights_size(&self) -> usize {
        self.shards.iter().map(|shard| shard.bytes.len()).sum()
    }

    /// Decode every shard into named tensors on `device`
    fn load_tensors(&self, device: &Device) -> Result<HashMap<String, Tensor>> {
        let mut tensors = HashMap::new();
        for shard in &self.shards {
            let loaded = candle_core::safetensors::load_buffer(&shard.bytes, device).map_err(|e| {
                Error::model_load(format!("Failed to decode weight shard {}: {}", shard.path, e))
            })?;
            tensors.extend(loaded);
        }
        Ok(tensors)
    }
}

/// Device type for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// CPU inference (always available)
    #[default]
    Cpu,
    /// CUDA GPU inference (if available)
    Cuda(usize), // GPU index
    /// Metal (Apple Silicon)
    Metal(usize),
}

/// Create Candle device from device type
pub fn create_device(device_type: DeviceType) -> Result<Device> {
    match device_type {
        DeviceType::Cpu => Ok(Device::Cpu),
        DeviceType::Cuda(idx) => Device::new_cuda(idx)
            .map_err(|e| Error::config(format!("Failed to create CUDA device: {}", e))),
        DeviceType::Metal(idx) => Device::new_metal(idx)
            .map_err(|e| Error::config(format!("Failed to create Metal device: {}", e))),
    }
}

/// Runnable model. Implemented by [`SequentialModel`] and by test doubles.
pub trait ImageModel: Send + Sync {
    /// Expected input as `[height, width, channels]`
    fn input_shape(&self) -> [usize; 3];

    /// Length of the output probability vector
    fn num_classes(&self) -> usize;

    /// Device the weights live on
    fn device(&self) -> &Device;

    /// Forward pass over an NHWC batch, returning `[batch, num_classes]`
    fn forward(&self, input: &Tensor) -> candle_core::Result<Tensor>;
}

enum Layer {
    Conv2d(Conv2d),
    MaxPool2d(usize),
    Relu,
    GlobalAveragePool,
    Flatten,
    Dense(Linear),
    Softmax,
}

#[derive(Debug, Clone, Copy)]
enum FeatureShape {
    Spatial { channels: usize, height: usize, width: usize },
    Flat(usize),
}

/// Sequential classifier built from a [`ModelTopology`]
pub struct SequentialModel {
    name: String,
    layers: Vec<Layer>,
    input_shape: [usize; 3],
    num_classes: usize,
    device: Device,
}

impl SequentialModel {
    /// Build a model from an artifact.
    ///
    /// Shapes are propagated through the layer list so that a topology whose
    /// weights or output arity do not line up fails here rather than at
    /// inference time.
    pub fn build(artifact: &ModelArtifact, device: &Device) -> Result<Self> {
        let topology = &artifact.topology;
        if topology.format != SEQUENTIAL_FORMAT {
            return Err(Error::model_load(format!(
                "Unsupported model format: {}",
                topology.format
            )));
        }

        let [height, width, channels] = topology.input_shape;
        if height == 0 || width == 0 || channels == 0 {
            return Err(Error::model_load(format!(
                "Invalid input shape: {:?}",
                topology.input_shape
            )));
        }

        let tensors = artifact.load_tensors(device)?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, device);

        let mut shape = FeatureShape::Spatial { channels, height, width };
        let mut layers = Vec::with_capacity(topology.layers.len());

        for spec in &topology.layers {
            let (layer, next) = build_layer(spec, shape, &vb)?;
            layers.push(layer);
            shape = next;
        }

        let num_classes = match shape {
            FeatureShape::Flat(n) => n,
            FeatureShape::Spatial { .. } => {
                return Err(Error::model_load(
                    "Model output is not a flat class vector; add a pooling or flatten layer",
                ))
            }
        };

        Ok(Self {
            name: topology.name.clone(),
            layers,
            input_shape: topology.input_shape,
            num_classes,
            device: device.clone(),
        })
    }

    /// Model name
    pub fn name(&self) -> &str {
        &self.name
    }
}

fn build_layer(spec: &LayerSpec, shape: FeatureShape, vb: &VarBuilder) -> Result<(Layer, FeatureShape)> {
    let weights_err =
        |name: &str, e: candle_core::Error| Error::model_load(format!("Failed to load weights for {}: {}", name, e));

    match (spec, shape) {
        (
            LayerSpec::Conv2d {
                name,
                filters,
                kernel_size,
                stride,
                padding,
            },
            FeatureShape::Spatial { channels, height, width },
        ) => {
            let padded_h = height + 2 * padding;
            let padded_w = width + 2 * padding;
            if *kernel_size == 0 || *stride == 0 || *kernel_size > padded_h || *kernel_size > padded_w {
                return Err(Error::model_load(format!(
                    "Convolution {} does not fit a {}x{} input",
                    name, height, width
                )));
            }
            let config = Conv2dConfig {
                padding: *padding,
                stride: *stride,
                ..Default::default()
            };
            let conv = candle_nn::conv2d(channels, *filters, *kernel_size, config, vb.pp(name))
                .map_err(|e| weights_err(name, e))?;
            let next = FeatureShape::Spatial {
                channels: *filters,
                height: (padded_h - kernel_size) / stride + 1,
                width: (padded_w - kernel_size) / stride + 1,
            };
            Ok((Layer::Conv2d(conv), next))
        }
        (LayerSpec::MaxPool2d { size }, FeatureShape::Spatial { channels, height, width }) => {
            if *size == 0 || *size > height || *size > width {
                return Err(Error::model_load(format!(
                    "Pooling window {} does not fit a {}x{} input",
                    size, height, width
                )));
            }
            let next = FeatureShape::Spatial {
                channels,
                height: height / size,
                width: width / size,
            };
            Ok((Layer::MaxPool2d(*size), next))
        }
        (LayerSpec::Relu, shape) => Ok((Layer::Relu, shape)),
        (LayerSpec::GlobalAveragePool, FeatureShape::Spatial { channels, .. }) => {
            Ok((Layer::GlobalAveragePool, FeatureShape::Flat(channels)))
        }
        (LayerSpec::Flatten, FeatureShape::Spatial { channels, height, width }) => {
            Ok((Layer::Flatten, FeatureShape::Flat(channels * height * width)))
        }
        (LayerSpec::Flatten, FeatureShape::Flat(n)) => Ok((Layer::Flatten, FeatureShape::Flat(n))),
        (LayerSpec::Dense { name, units }, FeatureShape::Flat(features)) => {
            let dense = candle_nn::linear(features, *units, vb.pp(name)).map_err(|e| weights_err(name, e))?;
            Ok((Layer::Dense(dense), FeatureShape::Flat(*units)))
        }
        (LayerSpec::Softmax, FeatureShape::Flat(n)) => Ok((Layer::Softmax, FeatureShape::Flat(n))),
        (spec, shape) => Err(Error::model_load(format!(
            "Layer {:?} cannot follow features of shape {:?}",
            spec, shape
        ))),
    }
}

impl ImageModel for SequentialModel {
    fn input_shape(&self) -> [usize; 3] {
        self.input_shape
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn forward(&self, input: &Tensor) -> candle_core::Result<Tensor> {
        // NHWC -> NCHW for the convolution kernels
        let mut x = input.permute((0, 3, 1, 2))?.contiguous()?;
        for layer in &self.layers {
            x = match layer {
                Layer::Conv2d(conv) => conv.forward(&x)?,
                Layer::MaxPool2d(size) => x.max_pool2d(*size)?,
                Layer::Relu => x.relu()?,
                Layer::GlobalAveragePool => x.mean((2, 3))?,
                Layer::Flatten => x.flatten_from(1)?,
                Layer::Dense(dense) => dense.forward(&x)?,
                Layer::Softmax => candle_nn::ops::softmax(&x, D::Minus1)?,
            };
        }
        Ok(x)
    }
}
