//! Class label table

use leafscan_core::{Error, Result};
use std::sync::Arc;

/// File name of the label list next to `model.json`
pub const CLASSES_FILE: &str = "classes.json";

/// Built-in PlantVillage labels, index-aligned with the canonical model
pub const BUILTIN_LABELS: [&str; 38] = [
    "Apple___Apple_scab",
    "Apple___Black_rot",
    "Apple___Cedar_apple_rust",
    "Apple___healthy",
    "Blueberry___healthy",
    "Cherry_(including_sour)___Powdery_mildew",
    "Cherry_(including_sour)___healthy",
    "Corn_(maize)___Cercospora_leaf_spot Gray_leaf_spot",
    "Corn_(maize)___Common_rust_",
    "Corn_(maize)___Northern_Leaf_Blight",
    "Corn_(maize)___healthy",
    "Grape___Black_rot",
    "Grape___Esca_(Black_Measles)",
    "Grape___Leaf_blight_(Isariopsis_Leaf_Spot)",
    "Grape___healthy",
    "Orange___Haunglongbing_(Citrus_greening)",
    "Peach___Bacterial_spot",
    "Peach___healthy",
    "Pepper,_bell___Bacterial_spot",
    "Pepper,_bell___healthy",
    "Potato___Early_blight",
    "Potato___Late_blight",
    "Potato___healthy",
    "Raspberry___healthy",
    "Soybean___healthy",
    "Squash___Powdery_mildew",
    "Strawberry___Leaf_scorch",
    "Strawberry___healthy",
    "Tomato___Bacterial_spot",
    "Tomato___Early_blight",
    "Tomato___Late_blight",
    "Tomato___Leaf_Mold",
    "Tomato___Septoria_leaf_spot",
    "Tomato___Spider_mites Two-spotted_spider_mite",
    "Tomato___Target_Spot",
    "Tomato___Tomato_Yellow_Leaf_Curl_Virus",
    "Tomato___Tomato_mosaic_virus",
    "Tomato___healthy",
];

/// Where a label table came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelOrigin {
    /// `classes.json` from a model source
    Source,
    /// `classes` embedded in `metadata.json`
    Metadata,
    /// [`BUILTIN_LABELS`]
    Builtin,
}

/// Ordered, immutable label table
#[derive(Debug, Clone, PartialEq)]
pub struct ClassLabelTable {
    labels: Arc<[String]>,
    origin: LabelOrigin,
}

impl ClassLabelTable {
    /// Create a table; empty tables are rejected
    pub fn new(labels: Vec<String>, origin: LabelOrigin) -> Result<Self> {
        if labels.is_empty() {
            return Err(Error::config("Class label table is empty"));
        }
        Ok(Self {
            labels: labels.into(),
            origin,
        })
    }

    /// Parse a `classes.json` document
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let labels: Vec<String> = serde_json::from_slice(bytes)?;
        Self::new(labels, LabelOrigin::Source)
    }

    /// The built-in 38-label table
    pub fn builtin() -> Self {
        Self {
            labels: BUILTIN_LABELS.iter().map(|s| s.to_string()).collect(),
            origin: LabelOrigin::Builtin,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    pub fn origin(&self) -> LabelOrigin {
        self.origin
    }

    /// Whether the label at `index` contains `hint`, ignoring case
    pub fn matches_hint(&self, index: usize, hint: &str) -> bool {
        let hint = hint.to_lowercase();
        self.get(index)
            .map(|label| label.to_lowercase().contains(&hint))
            .unwrap_or(false)
    }
}
