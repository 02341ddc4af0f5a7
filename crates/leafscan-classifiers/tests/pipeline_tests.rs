//! End-to-end classification tests through a real candle model


use image::{Rgb, RgbImage};
use leafscan_classifiers::{ClassifyOptions, ImageInput, InferencePipeline, ModelMetadata};
use leafscan_core::{ErrorKind, Outcome};
use mock_models::*;
use std::sync::Arc;

fn leaf_image() -> RgbImage {
    RgbImage::from_fn(32, 24, |x, y| Rgb([(x * 7) as u8, 120, (y * 9) as u8]))
}

fn png_bytes(image: &RgbImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

#[tokio::test]
async fn test_confident_detection_end_to_end() {
    let source = Arc::new(MockSource::serving(
        "remote",
        probability_artifact(&[0.1, 0.05, 0.8, 0.05], 8, 8),
    ));
    let manager = manager_with(source, apple_labels());
    let pipeline = InferencePipeline::new(ModelMetadata::default());

    let outcome = pipeline
        .classify_with_recovery(&manager, ImageInput::Rgb(leaf_image()), &ClassifyOptions::default())
        .await
        .unwrap();

    let result = outcome.detection().unwrap();
    assert_eq!(result.label, "Apple_healthy");
    assert_eq!(result.display_label, "Apple healthy");
    assert!((result.confidence - 0.8).abs() < 1e-4);
    assert_eq!(result.probabilities.len(), 4);
    assert_eq!(result.top_k.len(), 3);
}

#[tokio::test]
async fn test_low_confidence_end_to_end() {
    let source = Arc::new(MockSource::serving(
        "remote",
        probability_artifact(&[0.3, 0.3, 0.2, 0.2], 8, 8),
    ));
    let manager = manager_with(source, apple_labels());
    let pipeline = InferencePipeline::new(ModelMetadata::default());

    let outcome = pipeline
        .classify_with_recovery(&manager, ImageInput::Rgb(leaf_image()), &ClassifyOptions::default())
        .await
        .unwrap();

    match outcome {
        Outcome::LowConfidence(low) => assert!((low.confidence - 0.3).abs() < 1e-4),
        other => panic!("expected low confidence, got {:?}", other),
    }
}

#[tokio::test]
async fn test_plant_hint_end_to_end() {
    let grape_labels = labels(&["Apple_healthy", "Grape___Black_rot", "Grape___healthy"]);
    let source = Arc::new(MockSource::serving(
        "remote",
        probability_artifact(&[0.65, 0.3, 0.05], 8, 8),
    ));
    let manager = manager_with(source, grape_labels);
    let pipeline = InferencePipeline::new(ModelMetadata::default());

    let options = ClassifyOptions::new().with_plant_hint("grape");
    let outcome = pipeline
        .classify_with_recovery(&manager, ImageInput::Rgb(leaf_image()), &options)
        .await
        .unwrap();

    let result = outcome.detection().unwrap();
    assert_eq!(result.label, "Grape___Black_rot");
    assert_eq!(result.display_label, "Grape: Black rot");
    assert!(result.hint_applied);
}

#[tokio::test]
async fn test_threshold_override() {
    let source = Arc::new(MockSource::serving(
        "remote",
        probability_artifact(&[0.1, 0.05, 0.8, 0.05], 8, 8),
    ));
    let manager = manager_with(source, apple_labels());
    let pipeline = InferencePipeline::new(ModelMetadata::default());

    let options = ClassifyOptions::new().with_threshold(0.9);
    let outcome = pipeline
        .classify_with_recovery(&manager, ImageInput::Rgb(leaf_image()), &options)
        .await
        .unwrap();

    assert!(!outcome.is_detected());
}

#[tokio::test]
async fn test_metadata_top_k() {
    let mut metadata = ModelMetadata::default();
    metadata.postprocessing_params.top_k = 2;

    let source = Arc::new(MockSource::serving(
        "remote",
        probability_artifact(&[0.1, 0.05, 0.8, 0.05], 8, 8),
    ));
    let manager = manager_with(source, apple_labels());
    let pipeline = InferencePipeline::new(metadata);

    let outcome = pipeline
        .classify_with_recovery(&manager, ImageInput::Rgb(leaf_image()), &ClassifyOptions::default())
        .await
        .unwrap();

    let top: Vec<&str> = outcome
        .detection()
        .unwrap()
        .top_k
        .iter()
        .map(|p| p.label.as_str())
        .collect();
    assert_eq!(top, vec!["Apple_healthy", "Apple_scab"]);
}

#[tokio::test]
async fn test_classify_encoded_bytes_and_path() {
    let source = Arc::new(MockSource::serving(
        "remote",
        probability_artifact(&[0.1, 0.05, 0.8, 0.05], 8, 8),
    ));
    let manager = manager_with(source, apple_labels());
    let pipeline = InferencePipeline::new(ModelMetadata::default());
    let handle = manager.ensure_ready(None).await.unwrap();
    let labels = manager.labels().await;

    let bytes = png_bytes(&leaf_image());
    let from_bytes = pipeline
        .classify(ImageInput::Bytes(bytes.clone()), &handle, &labels, &ClassifyOptions::default())
        .await
        .unwrap();
    assert!(from_bytes.is_detected());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("leaf.png");
    std::fs::write(&path, bytes).unwrap();
    let from_path = pipeline
        .classify(ImageInput::Path(path), &handle, &labels, &ClassifyOptions::default())
        .await
        .unwrap();
    let (a, b) = (from_bytes.detection().unwrap(), from_path.detection().unwrap());
    assert_eq!(a.label, b.label);
    assert_eq!(a.probabilities, b.probabilities);
}

#[tokio::test]
async fn test_decode_error_is_not_retried() {
    let source = Arc::new(MockSource::serving(
        "remote",
        probability_artifact(&[0.1, 0.05, 0.8, 0.05], 8, 8),
    ));
    let manager = manager_with(source.clone(), apple_labels());
    let pipeline = InferencePipeline::new(ModelMetadata::default());

    let err = pipeline
        .classify_with_recovery(&manager, ImageInput::Bytes(b"not an image".to_vec()), &ClassifyOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Decode);
    assert_eq!(source.fetches(), 0);
}

#[tokio::test]
async fn test_no_live_buffers_after_many_calls() {
    let source = Arc::new(MockSource::serving(
        "remote",
        probability_artifact(&[0.1, 0.05, 0.8, 0.05], 8, 8),
    ));
    let manager = manager_with(source, apple_labels());
    let pipeline = InferencePipeline::new(ModelMetadata::default());

    for _ in 0..25 {
        pipeline
            .classify_with_recovery(&manager, ImageInput::Rgb(leaf_image()), &ClassifyOptions::default())
            .await
            .unwrap();
        assert_eq!(pipeline.ledger().live(), 0);
    }
    assert_eq!(pipeline.ledger().allocated(), 75);
}

#[tokio::test]
async fn test_no_live_buffers_after_failure() {
    let source = Arc::new(MockSource::serving(
        "remote",
        probability_artifact(&[0.1, 0.05, 0.8, 0.05], 8, 8),
    ));
    let manager = manager_with(source, apple_labels());
    let pipeline = InferencePipeline::new(ModelMetadata::default());
    let handle = manager.ensure_ready(None).await.unwrap();
    let labels = manager.labels().await;

    handle.dispose();
    let err = pipeline
        .classify_decoded(&leaf_image(), &handle, &labels, &ClassifyOptions::default())
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Disposed);
    assert_eq!(pipeline.ledger().live(), 0);
}

#[tokio::test]
async fn test_shape_mismatch_recovers_after_reload() {
    let source = Arc::new(MockSource::serving(
        "remote",
        probability_artifact(&[0.1, 0.05, 0.8, 0.05], 16, 16),
    ));
    let manager = manager_with(source.clone(), apple_labels());
    let stale = manager.ensure_ready(None).await.unwrap();

    source.set_artifact(Some(probability_artifact(&[0.1, 0.05, 0.8, 0.05], 8, 8)));
    let pipeline = InferencePipeline::new(ModelMetadata::default());
    let options = ClassifyOptions::new().with_target_size(8, 8);

    let outcome = pipeline
        .classify_with_recovery(&manager, ImageInput::Rgb(leaf_image()), &options)
        .await
        .unwrap();

    assert!(outcome.is_detected());
    assert!(stale.is_disposed());
    assert_eq!(source.fetches(), 2);
    assert_eq!(source.cache_busts(), 1);
    assert_eq!(manager.current().await.unwrap().input_height(), 8);
}

#[tokio::test]
async fn test_persistent_shape_mismatch_is_surfaced() {
    let source = Arc::new(MockSource::serving(
        "remote",
        probability_artifact(&[0.1, 0.05, 0.8, 0.05], 16, 16),
    ));
    let manager = manager_with(source.clone(), apple_labels());
    let pipeline = InferencePipeline::new(ModelMetadata::default());
    let options = ClassifyOptions::new().with_target_size(8, 8);

    let err = pipeline
        .classify_with_recovery(&manager, ImageInput::Rgb(leaf_image()), &options)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
    assert_eq!(source.fetches(), 2);
    assert_eq!(pipeline.ledger().live(), 0);
}

#[tokio::test]
async fn test_invalid_threshold_rejected() {
    let source = Arc::new(MockSource::serving(
        "remote",
        probability_artifact(&[0.3, 0.3, 0.2, 0.2], 8, 8),
    ));
    let manager = manager_with(source, apple_labels());
    let pipeline = InferencePipeline::new(ModelMetadata::default());

    for threshold in [f32::NAN, -1.0] {
        let options = ClassifyOptions::new().with_threshold(threshold);
        let err = pipeline
            .classify_with_recovery(&manager, ImageInput::Rgb(leaf_image()), &options)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
    assert_eq!(pipeline.ledger().live(), 0);
}

#[tokio::test]
async fn test_metadata_target_size_drives_resize() {
    let mut metadata = ModelMetadata::default();
    metadata.preprocessing_params.target_size = Some([16, 16]);

    let source = Arc::new(MockSource::serving(
        "remote",
        probability_artifact(&[0.1, 0.05, 0.8, 0.05], 8, 8),
    ));
    let manager = manager_with(source.clone(), apple_labels());
    let pipeline = InferencePipeline::new(metadata);

    let err = pipeline
        .classify_with_recovery(&manager, ImageInput::Rgb(leaf_image()), &ClassifyOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
    assert_eq!(source.fetches(), 2);
    assert_eq!(source.cache_busts(), 1);
}

#[tokio::test]
async fn test_stale_model_replaced_to_match_metadata() {
    let mut metadata = ModelMetadata::default();
    metadata.input_shape = Some(vec![None, Some(8), Some(8), Some(3)]);

    let source = Arc::new(MockSource::serving(
        "remote",
        probability_artifact(&[0.1, 0.05, 0.8, 0.05], 16, 16),
    ));
    let manager = manager_with(source.clone(), apple_labels());
    let stale = manager.ensure_ready(None).await.unwrap();
    source.set_artifact(Some(probability_artifact(&[0.1, 0.05, 0.8, 0.05], 8, 8)));

    let pipeline = InferencePipeline::new(metadata);
    let outcome = pipeline
        .classify_with_recovery(&manager, ImageInput::Rgb(leaf_image()), &ClassifyOptions::default())
        .await
        .unwrap();

    assert!(outcome.is_detected());
    assert!(stale.is_disposed());
    assert_eq!(source.fetches(), 2);
}
