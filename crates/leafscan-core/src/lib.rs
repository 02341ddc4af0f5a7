//! LeafScan Core
//!
//! Core types and utilities shared across LeafScan components.
//!
//! This crate provides:
//! - The error taxonomy used by the model lifecycle and inference pipeline
//! - Inference outcome types (detections and low-confidence results)
//! - Label display formatting and the progress callback shape

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::{display_label, InferenceResult, LowConfidence, Outcome, Prediction, ProgressFn};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::types::{InferenceResult, LowConfidence, Outcome, Prediction, ProgressFn};
}
