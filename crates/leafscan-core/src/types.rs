//! Core types for LeafScan

use serde::{Deserialize, Serialize};

/// Callback receiving fractional download progress in `[0, 1]`
pub type ProgressFn = dyn Fn(f32) + Send + Sync;

/// A single scored label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Index into the class label table
    pub index: usize,

    /// Raw label as stored in the label table
    pub label: String,

    /// Probability assigned by the model (0.0-1.0)
    pub confidence: f32,
}

impl Prediction {
    /// Create a new prediction
    pub fn new(index: usize, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            index,
            label: label.into(),
            confidence,
        }
    }

    /// Label formatted for display
    pub fn display_label(&self) -> String {
        display_label(&self.label)
    }
}

/// A positive detection that met the confidence threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    /// Predicted label index
    pub index: usize,

    /// Raw label (e.g. `Apple___Apple_scab`)
    pub label: String,

    /// Human readable label (e.g. `Apple: Apple scab`)
    pub display_label: String,

    /// Confidence score (0.0-1.0)
    pub confidence: f32,

    /// Full probability vector, index-aligned with the label table
    pub probabilities: Vec<f32>,

    /// Best K predictions in descending order of confidence
    pub top_k: Vec<Prediction>,

    /// True when a plant-type hint replaced the unfiltered top prediction
    pub hint_applied: bool,

    /// Latency in microseconds
    pub latency_us: u64,
}

/// The best prediction did not reach the confidence threshold.
///
/// This is a valid outcome rather than a failure: the caller should ask for a
/// clearer photograph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowConfidence {
    /// Confidence of the best candidate
    pub confidence: f32,

    /// Threshold that was not met
    pub threshold: f32,

    /// Best candidate, for diagnostics
    pub best: Prediction,
}

/// Result of classifying one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Confident detection
    Detected(InferenceResult),

    /// Below the confidence threshold
    LowConfidence(LowConfidence),
}

impl Outcome {
    /// Confidence of the best candidate, regardless of the outcome
    pub fn confidence(&self) -> f32 {
        match self {
            Self::Detected(result) => result.confidence,
            Self::LowConfidence(low) => low.confidence,
        }
    }

    /// Whether the threshold was met
    pub fn is_detected(&self) -> bool {
        matches!(self, Self::Detected(_))
    }

    /// The detection, if any
    pub fn detection(&self) -> Option<&InferenceResult> {
        match self {
            Self::Detected(result) => Some(result),
            Self::LowConfidence(_) => None,
        }
    }

    /// Short outcome name used in logs and metrics labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detected(_) => "detected",
            Self::LowConfidence(_) => "low_confidence",
        }
    }
}

/// Render a raw label for display.
///
/// The triple underscore between plant and condition becomes `": "`, every
/// remaining underscore becomes a space.
pub fn display_label(raw: &str) -> String {
    raw.replace("___", ": ")
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_label() {
        assert_eq!(display_label("Apple___Apple_scab"), "Apple: Apple scab");
        assert_eq!(display_label("Apple_healthy"), "Apple healthy");
        assert_eq!(
            display_label("Corn_(maize)___Common_rust_"),
            "Corn (maize): Common rust"
        );
        assert_eq!(
            display_label("Tomato___Spider_mites Two-spotted_spider_mite"),
            "Tomato: Spider mites Two-spotted spider mite"
        );
    }

    #[test]
    fn test_outcome_accessors() {
        let low = Outcome::LowConfidence(LowConfidence {
            confidence: 0.3,
            threshold: 0.4,
            best: Prediction::new(0, "Apple_scab", 0.3),
        });
        assert!(!low.is_detected());
        assert_eq!(low.confidence(), 0.3);
        assert!(low.detection().is_none());
        assert_eq!(low.as_str(), "low_confidence");
    }

    #[test]
    fn test_outcome_serialization() {
        let low = Outcome::LowConfidence(LowConfidence {
            confidence: 0.25,
            threshold: 0.4,
            best: Prediction::new(1, "Apple_rot", 0.25),
        });
        let json = serde_json::to_value(&low).unwrap();
        assert_eq!(json["outcome"], "low_confidence");
        assert_eq!(json["best"]["label"], "Apple_rot");
    }
}
