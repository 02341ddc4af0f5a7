//! Image classification pipeline
//!
//! Turns one image into an [`Outcome`]:
//!
//! ```text
//! decode -> resize (bilinear, H x W) -> / 255 -> [1, H, W, 3] -> forward
//!        -> arg-max -> plant hint -> threshold
//! ```
//!
//! Intermediate tensors live in a [`BufferScope`] and are released on every
//! exit path. A [`Error::ShapeMismatch`] from a stale model is recovered by
//! [`InferencePipeline::classify_with_recovery`] with one forced reload and
//! one retry.

use crate::classifier::ClassifierHandle;
use crate::labels::ClassLabelTable;
use crate::lifecycle::ModelManager;
use crate::model_config::ModelMetadata;
use crate::preprocess::{decode_async, resize_bilinear, to_input_tensor, ImageInput};
use crate::scope::BufferLedger;
use candle_core::DType;
use image::RgbImage;
use leafscan_core::{
    display_label, Error, ErrorKind, InferenceResult, LowConfidence, Outcome, Prediction, Result,
};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Per-call overrides
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifyOptions {
    /// Expected plant type, matched case-insensitively against labels
    pub plant_hint: Option<String>,

    /// Confidence threshold override
    pub threshold: Option<f32>,

    /// Number of ranked predictions to return
    pub top_k: Option<usize>,

    /// Resize target `(height, width)`; defaults to the metadata's input
    /// size, then to the model's
    pub target_size: Option<(usize, usize)>,
}

impl ClassifyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plant_hint(mut self, hint: impl Into<String>) -> Self {
        self.plant_hint = Some(hint.into());
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_target_size(mut self, height: usize, width: usize) -> Self {
        self.target_size = Some((height, width));
        self
    }
}

/// Stateless classification pipeline with buffer accounting
pub struct InferencePipeline {
    metadata: ModelMetadata,
    ledger: BufferLedger,
}

impl InferencePipeline {
    /// Create a pipeline using `metadata` for threshold and top-K defaults
    pub fn new(metadata: ModelMetadata) -> Self {
        Self {
            metadata,
            ledger: BufferLedger::new(),
        }
    }

    /// Build a pipeline from the manager's session metadata
    pub async fn for_manager(manager: &ModelManager) -> Self {
        Self::new(manager.metadata().await)
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// Buffer accounting shared by every call on this pipeline
    pub fn ledger(&self) -> &BufferLedger {
        &self.ledger
    }

    /// Classify one image with an explicit handle and label table
    pub async fn classify(
        &self,
        image: ImageInput,
        handle: &ClassifierHandle,
        labels: &ClassLabelTable,
        options: &ClassifyOptions,
    ) -> Result<Outcome> {
        let decoded = decode_async(image).await.inspect_err(|_| record_failure(ErrorKind::Decode))?;
        self.classify_decoded(&decoded, handle, labels, options)
    }

    /// Classify already decoded pixels
    pub fn classify_decoded(
        &self,
        image: &RgbImage,
        handle: &ClassifierHandle,
        labels: &ClassLabelTable,
        options: &ClassifyOptions,
    ) -> Result<Outcome> {
        let start = Instant::now();
        let outcome = self.run(image, handle, labels, options, start);

        match &outcome {
            Ok(outcome) => {
                metrics::counter!("leafscan_classifications_total", "outcome" => outcome.as_str()).increment(1);
                metrics::histogram!("leafscan_inference_latency_us").record(start.elapsed().as_micros() as f64);
            }
            Err(e) => record_failure(e.kind()),
        }

        outcome
    }

    /// Classify through `manager`, recovering once from a shape mismatch.
    ///
    /// A mismatch means the loaded model no longer matches the pipeline, so
    /// the model is force-reloaded silently and the image classified again.
    /// Any second failure is returned as is.
    pub async fn classify_with_recovery(
        &self,
        manager: &ModelManager,
        image: ImageInput,
        options: &ClassifyOptions,
    ) -> Result<Outcome> {
        let decoded = decode_async(image).await.inspect_err(|_| record_failure(ErrorKind::Decode))?;
        let labels = manager.labels().await;
        let handle = manager.ensure_ready(None).await?;

        match self.classify_decoded(&decoded, &handle, &labels, options) {
            Err(e) if e.kind() == ErrorKind::ShapeMismatch => {
                warn!("{}; reloading model and retrying once", e);
                let handle = manager.force_reload(true, None).await?;
                self.classify_decoded(&decoded, &handle, &labels, options)
            }
            other => other,
        }
    }

    fn run(
        &self,
        image: &RgbImage,
        handle: &ClassifierHandle,
        labels: &ClassLabelTable,
        options: &ClassifyOptions,
        start: Instant,
    ) -> Result<Outcome> {
        let mut scope = self.ledger.scope();

        let (height, width) = options
            .target_size
            .or_else(|| self.metadata.target_size())
            .unwrap_or((handle.input_height(), handle.input_width()));
        let resized = resize_bilinear(image, height, width);

        let input = scope.track(to_input_tensor(&resized, handle.device())?);
        let output = scope.track(handle.forward(&input)?);
        let flat = scope.track(
            output
                .flatten_all()
                .and_then(|t| t.to_dtype(DType::F32))
                .map_err(|e| Error::inference(format!("Failed to read model output: {}", e)))?,
        );
        let probabilities = flat
            .to_vec1::<f32>()
            .map_err(|e| Error::inference(format!("Failed to read model output: {}", e)))?;
        drop(scope);

        let threshold = options
            .threshold
            .unwrap_or_else(|| self.metadata.confidence_threshold());
        let top_k = options.top_k.unwrap_or_else(|| self.metadata.top_k());

        let mut outcome = interpret(
            probabilities,
            labels,
            threshold,
            top_k,
            options.plant_hint.as_deref(),
        )?;

        if let Outcome::Detected(result) = &mut outcome {
            result.latency_us = start.elapsed().as_micros() as u64;
            debug!(
                "Classified as {} ({:.2}%) in {}us",
                result.label,
                result.confidence * 100.0,
                result.latency_us
            );
        }

        Ok(outcome)
    }
}

fn record_failure(kind: ErrorKind) {
    let outcome = match kind {
        ErrorKind::Decode => "decode_error",
        ErrorKind::ShapeMismatch => "shape_mismatch",
        ErrorKind::Disposed => "disposed",
        _ => "error",
    };
    metrics::counter!("leafscan_classifications_total", "outcome" => outcome).increment(1);
}

/// Turn a probability vector into an [`Outcome`].
///
/// The threshold gates the model's unfiltered best confidence. When a plant
/// hint is given and the best label does not contain it, the best label
/// that does is reported instead; without any matching label the unfiltered
/// prediction stands. Non-finite probabilities count as zero. The threshold
/// must lie within [0, 1].
pub fn interpret(
    probabilities: Vec<f32>,
    labels: &ClassLabelTable,
    threshold: f32,
    top_k: usize,
    plant_hint: Option<&str>,
) -> Result<Outcome> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(Error::config(format!(
            "Confidence threshold must be within [0, 1], got {}",
            threshold
        )));
    }

    if probabilities.is_empty() || probabilities.len() != labels.len() {
        return Err(Error::shape_mismatch(vec![1, labels.len()], vec![1, probabilities.len()]));
    }

    let probabilities: Vec<f32> = probabilities
        .into_iter()
        .map(|p| if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 })
        .collect();

    let ranked = rank(&probabilities);
    let top = ranked[0];
    let mut chosen = top;
    let mut hint_applied = false;

    if let Some(hint) = plant_hint.map(str::trim).filter(|h| !h.is_empty()) {
        if !labels.matches_hint(top, hint) {
            match ranked.iter().copied().find(|&i| labels.matches_hint(i, hint)) {
                Some(index) => {
                    info!(
                        "Top prediction does not match plant '{}', using {}",
                        hint,
                        labels.get(index).unwrap_or_default()
                    );
                    chosen = index;
                    hint_applied = true;
                }
                None => debug!("No label matches plant '{}', keeping top prediction", hint),
            }
        }
    }

    let prediction = |index: usize| {
        Prediction::new(index, labels.get(index).unwrap_or_default(), probabilities[index])
    };

    if probabilities[top] < threshold {
        return Ok(Outcome::LowConfidence(LowConfidence {
            confidence: probabilities[top],
            threshold,
            best: prediction(chosen),
        }));
    }

    let best = prediction(chosen);
    let top_k = ranked.iter().take(top_k).map(|&i| prediction(i)).collect();

    Ok(Outcome::Detected(InferenceResult {
        index: best.index,
        display_label: display_label(&best.label),
        label: best.label,
        confidence: best.confidence,
        probabilities,
        top_k,
        hint_applied,
        latency_us: 0,
    }))
}

/// Indices ordered by descending probability; ties keep the lower index first
fn rank(probabilities: &[f32]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..probabilities.len()).collect();
    indices.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]));
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelOrigin;

    fn apple_labels() -> ClassLabelTable {
        ClassLabelTable::new(
            vec![
                "Apple_scab".to_string(),
                "Apple_rot".to_string(),
                "Apple_healthy".to_string(),
                "Apple_rust".to_string(),
            ],
            LabelOrigin::Source,
        )
        .unwrap()
    }

    #[test]
    fn test_confident_detection() {
        let outcome = interpret(vec![0.1, 0.05, 0.8, 0.05], &apple_labels(), 0.4, 3, None).unwrap();

        let result = outcome.detection().unwrap();
        assert_eq!(result.index, 2);
        assert_eq!(result.label, "Apple_healthy");
        assert_eq!(result.display_label, "Apple healthy");
        assert!((result.confidence - 0.8).abs() < 1e-6);
        assert!(!result.hint_applied);

        let ranked: Vec<usize> = result.top_k.iter().map(|p| p.index).collect();
        assert_eq!(ranked, vec![2, 0, 1]);
    }

    #[test]
    fn test_low_confidence() {
        let outcome = interpret(vec![0.3, 0.3, 0.2, 0.2], &apple_labels(), 0.4, 3, None).unwrap();

        match outcome {
            Outcome::LowConfidence(low) => {
                assert!((low.confidence - 0.3).abs() < 1e-6);
                assert_eq!(low.best.index, 0);
                assert!((low.threshold - 0.4).abs() < 1e-6);
            }
            other => panic!("expected low confidence, got {:?}", other),
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let outcome = interpret(vec![0.4, 0.3, 0.2, 0.1], &apple_labels(), 0.4, 1, None).unwrap();
        assert!(outcome.is_detected());
    }

    #[test]
    fn test_plant_hint_substitutes_matching_label() {
        let labels = ClassLabelTable::new(
            vec![
                "Apple_healthy".to_string(),
                "Grape_black_rot".to_string(),
                "Grape_healthy".to_string(),
            ],
            LabelOrigin::Source,
        )
        .unwrap();

        let outcome = interpret(vec![0.9, 0.3, 0.1], &labels, 0.4, 3, Some("grape")).unwrap();
        let result = outcome.detection().unwrap();
        assert_eq!(result.label, "Grape_black_rot");
        assert!((result.confidence - 0.3).abs() < 1e-6);
        assert!(result.hint_applied);
    }

    #[test]
    fn test_plant_hint_without_match_keeps_top() {
        let outcome = interpret(vec![0.1, 0.05, 0.8, 0.05], &apple_labels(), 0.4, 3, Some("Tomato")).unwrap();
        let result = outcome.detection().unwrap();
        assert_eq!(result.label, "Apple_healthy");
        assert!(!result.hint_applied);
    }

    #[test]
    fn test_length_mismatch_is_shape_mismatch() {
        let err = interpret(vec![0.5, 0.5], &apple_labels(), 0.4, 3, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
    }

    #[test]
    fn test_non_finite_probabilities() {
        let outcome = interpret(vec![f32::NAN, 0.7, f32::INFINITY, 0.1], &apple_labels(), 0.4, 3, None).unwrap();
        let result = outcome.detection().unwrap();
        assert_eq!(result.index, 1);
        assert_eq!(result.probabilities[0], 0.0);
        assert_eq!(result.probabilities[2], 0.0);
    }

    #[test]
    fn test_threshold_outside_unit_range_rejected() {
        for threshold in [f32::NAN, -1.0, 1.5, f32::INFINITY] {
            let err = interpret(vec![0.3, 0.3, 0.2, 0.2], &apple_labels(), threshold, 3, None).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config);
        }
    }

    #[test]
    fn test_options_builder() {
        let options = ClassifyOptions::new()
            .with_plant_hint("grape")
            .with_threshold(0.5)
            .with_top_k(1)
            .with_target_size(8, 8);
        assert_eq!(options.plant_hint.as_deref(), Some("grape"));
        assert_eq!(options.threshold, Some(0.5));
        assert_eq!(options.top_k, Some(1));
        assert_eq!(options.target_size, Some((8, 8)));
    }
}
