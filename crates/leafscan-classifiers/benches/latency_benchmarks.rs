//! Latency benchmarks for the classification pipeline
//!
//! Measures each stage separately so regressions can be attributed:
//! - preprocessing (bilinear resize + tensor conversion)
//! - post-processing over the 38-class label table
//! - full classify of a decoded image through a small convolutional model
//!
//! Run with: cargo bench -p leafscan-classifiers

use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{Rgb, RgbImage};
use std::collections::HashMap;

use leafscan_classifiers::model_loader::SEQUENTIAL_FORMAT;
use leafscan_classifiers::preprocess::{resize_bilinear, to_input_tensor};
use leafscan_classifiers::{
    interpret, ClassLabelTable, ClassifierHandle, ClassifyOptions, InferencePipeline, LayerSpec,
    ModelArtifact, ModelMetadata, ModelTopology,
};

fn photo(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, 140, (y % 256) as u8]))
}

/// Conv -> ReLU -> pool -> GAP -> dense over the built-in label table
fn small_model(size: usize, classes: usize) -> ClassifierHandle {
    let topology = ModelTopology {
        name: "bench-model".to_string(),
        format: SEQUENTIAL_FORMAT.to_string(),
        input_shape: [size, size, 3],
        layers: vec![
            LayerSpec::Conv2d {
                name: "conv1".to_string(),
                filters: 8,
                kernel_size: 3,
                stride: 1,
                padding: 1,
            },
            LayerSpec::Relu,
            LayerSpec::MaxPool2d { size: 2 },
            LayerSpec::GlobalAveragePool,
            LayerSpec::Dense {
                name: "head".to_string(),
                units: classes,
            },
            LayerSpec::Softmax,
        ],
        weights_manifest: Vec::new(),
    };

    let device = Device::Cpu;
    let mut tensors = HashMap::new();
    tensors.insert("conv1.weight".to_string(), Tensor::randn(0f32, 0.1, (8, 3, 3, 3), &device).unwrap());
    tensors.insert("conv1.bias".to_string(), Tensor::zeros(8, DType::F32, &device).unwrap());
    tensors.insert("head.weight".to_string(), Tensor::randn(0f32, 0.1, (classes, 8), &device).unwrap());
    tensors.insert("head.bias".to_string(), Tensor::zeros(classes, DType::F32, &device).unwrap());

    let artifact = ModelArtifact::from_tensors(topology, &tensors).unwrap();
    ClassifierHandle::from_artifact(&artifact, &device, "indexeddb://plant-disease-model-bench", "bench").unwrap()
}

fn benchmark_preprocessing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Preprocessing");
    group.sample_size(50);

    for (name, width, height) in [("vga", 640, 480), ("hd", 1280, 720), ("square", 224, 224)] {
        let image = photo(width, height);
        group.bench_with_input(BenchmarkId::new("resize_to_224", name), &image, |b, image| {
            b.iter(|| {
                let resized = resize_bilinear(black_box(image), 224, 224);
                to_input_tensor(&resized, &Device::Cpu).unwrap()
            });
        });
    }

    group.finish();
}

fn benchmark_interpret(c: &mut Criterion) {
    let labels = ClassLabelTable::builtin();
    let mut probabilities = vec![0.01f32; labels.len()];
    probabilities[29] = 1.0 - 0.01 * (labels.len() - 1) as f32;

    let mut group = c.benchmark_group("Postprocessing");
    group.bench_function("interpret_38_classes", |b| {
        b.iter(|| interpret(black_box(probabilities.clone()), &labels, 0.4, 3, None).unwrap());
    });
    group.bench_function("interpret_with_hint", |b| {
        b.iter(|| interpret(black_box(probabilities.clone()), &labels, 0.4, 3, Some("Tomato")).unwrap());
    });
    group.finish();
}

fn benchmark_classify(c: &mut Criterion) {
    let labels = ClassLabelTable::builtin();
    let pipeline = InferencePipeline::new(ModelMetadata::default());
    let options = ClassifyOptions::default();

    let mut group = c.benchmark_group("Classify");
    group.sample_size(20);

    for size in [64usize, 128, 224] {
        let handle = small_model(size, labels.len());
        let image = photo(640, 480);
        group.bench_with_input(BenchmarkId::new("classify_decoded", size), &image, |b, image| {
            b.iter(|| {
                pipeline
                    .classify_decoded(black_box(image), &handle, &labels, &options)
                    .unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_preprocessing,
    benchmark_interpret,
    benchmark_classify
);

criterion_main!(benches);
