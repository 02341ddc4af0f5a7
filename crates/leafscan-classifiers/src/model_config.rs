//! Model metadata (`metadata.json`)

use leafscan_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// File name of the metadata document next to `model.json`
pub const METADATA_FILE: &str = "metadata.json";

/// Optional metadata published alongside a model.
///
/// Every field is optional on the wire. Missing fields fall back to
/// divide-by-255 normalization, a 0.4 confidence threshold and top 3; without
/// `targetSize` or `inputShape` images are resized to the model's own input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    /// Declared input shape, e.g. `[null, 224, 224, 3]`
    #[serde(default)]
    pub input_shape: Option<Vec<Option<usize>>>,

    /// Preprocessing settings
    #[serde(default)]
    pub preprocessing_params: PreprocessingParams,

    /// Postprocessing settings
    #[serde(default)]
    pub postprocessing_params: PostprocessingParams,

    /// Class labels embedded in the metadata, if any
    #[serde(default)]
    pub classes: Option<Vec<String>>,
}

/// Preprocessing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessingParams {
    /// Resize target as `[height, width]`
    #[serde(default)]
    pub target_size: Option<[usize; 2]>,

    /// Normalization scheme
    #[serde(default = "default_normalization")]
    pub normalization: String,
}

/// Postprocessing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostprocessingParams {
    /// Minimum top-class probability for a positive detection
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Number of ranked predictions to report
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

/// Default confidence threshold
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.4;

/// The only normalization the pipeline implements
pub const DIVIDE_BY_255: &str = "divide-by-255";

fn default_normalization() -> String {
    DIVIDE_BY_255.to_string()
}

fn default_confidence_threshold() -> f32 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

fn default_top_k() -> usize {
    3
}

impl Default for PreprocessingParams {
    fn default() -> Self {
        Self {
            target_size: None,
            normalization: default_normalization(),
        }
    }
}

impl Default for PostprocessingParams {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            top_k: default_top_k(),
        }
    }
}

impl Default for ModelMetadata {
    fn default() -> Self {
        Self {
            input_shape: None,
            preprocessing_params: PreprocessingParams::default(),
            postprocessing_params: PostprocessingParams::default(),
            classes: None,
        }
    }
}

impl ModelMetadata {
    /// Parse and validate `metadata.json` bytes
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let metadata: Self = serde_json::from_slice(bytes)?;
        metadata.validate()?;
        Ok(metadata)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        let threshold = self.postprocessing_params.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::config(format!(
                "confidenceThreshold must be within [0, 1], got {}",
                threshold
            )));
        }

        if let Some([height, width]) = self.preprocessing_params.target_size {
            if height == 0 || width == 0 {
                return Err(Error::config("targetSize must be non-zero"));
            }
        }

        if let Some(shape) = &self.input_shape {
            if shape.len() != 4 || shape[1..].iter().any(|dim| *dim == Some(0)) {
                return Err(Error::config(format!(
                    "inputShape must be [batch, height, width, channels], got {:?}",
                    shape
                )));
            }
        }

        if self.preprocessing_params.normalization != DIVIDE_BY_255 {
            tracing::warn!(
                "Unsupported normalization '{}', pixels are divided by 255",
                self.preprocessing_params.normalization
            );
        }

        Ok(())
    }

    /// Declared resize target as `(height, width)`.
    ///
    /// `targetSize` wins over the spatial dimensions of `inputShape`; `None`
    /// when neither declares both.
    pub fn target_size(&self) -> Option<(usize, usize)> {
        if let Some([height, width]) = self.preprocessing_params.target_size {
            return Some((height, width));
        }
        match self.input_shape.as_deref() {
            Some([_, Some(height), Some(width), _]) => Some((*height, *width)),
            _ => None,
        }
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.postprocessing_params.confidence_threshold
    }

    pub fn top_k(&self) -> usize {
        self.postprocessing_params.top_k
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_metadata() {
        let json = br#"{
            "inputShape": [null, 224, 224, 3],
            "outputShape": [null, 38],
            "modelType": "classification",
            "preprocessingParams": {
                "targetSize": [224, 224],
                "normalization": "divide-by-255"
            },
            "postprocessingParams": {
                "confidenceThreshold": 0.55,
                "topK": 5
            },
            "classes": ["Apple___Apple_scab", "Apple___healthy"]
        }"#;

        let metadata = ModelMetadata::from_json(json).unwrap();
        assert_eq!(metadata.input_shape, Some(vec![None, Some(224), Some(224), Some(3)]));
        assert_eq!(metadata.target_size(), Some((224, 224)));
        assert_eq!(metadata.confidence_threshold(), 0.55);
        assert_eq!(metadata.top_k(), 5);
        assert_eq!(metadata.classes.unwrap().len(), 2);
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let metadata = ModelMetadata::from_json(b"{}").unwrap();
        assert_eq!(metadata, ModelMetadata::default());
        assert_eq!(metadata.target_size(), None);
        assert_eq!(metadata.confidence_threshold(), 0.4);
        assert_eq!(metadata.top_k(), 3);
    }

    #[test]
    fn test_partial_postprocessing() {
        let json = br#"{"postprocessingParams": {"topK": 1}}"#;
        let metadata = ModelMetadata::from_json(json).unwrap();
        assert_eq!(metadata.confidence_threshold(), 0.4);
        assert_eq!(metadata.top_k(), 1);
    }

    #[test]
    fn test_target_size_from_input_shape() {
        let metadata = ModelMetadata::from_json(br#"{"inputShape": [null, 128, 96, 3]}"#).unwrap();
        assert_eq!(metadata.target_size(), Some((128, 96)));

        let json = br#"{"inputShape": [null, 128, 96, 3], "preprocessingParams": {"targetSize": [64, 64]}}"#;
        assert_eq!(ModelMetadata::from_json(json).unwrap().target_size(), Some((64, 64)));

        let dynamic = ModelMetadata::from_json(br#"{"inputShape": [null, null, null, 3]}"#).unwrap();
        assert_eq!(dynamic.target_size(), None);
    }

    #[test]
    fn test_invalid_input_shape() {
        assert!(ModelMetadata::from_json(br#"{"inputShape": [224, 224]}"#).is_err());
        assert!(ModelMetadata::from_json(br#"{"preprocessingParams": {"targetSize": [0, 224]}}"#).is_err());
    }

    #[test]
    fn test_invalid_threshold() {
        let json = br#"{"postprocessingParams": {"confidenceThreshold": 1.5}}"#;
        let err = ModelMetadata::from_json(json).unwrap_err();
        assert_eq!(err.kind(), leafscan_core::ErrorKind::Config);
    }
}
