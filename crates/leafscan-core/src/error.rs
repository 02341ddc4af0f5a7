//! Error types for LeafScan

/// Result type alias using LeafScan's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for LeafScan operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Every model source failed, or returned malformed data
    #[error("model load error: {0}")]
    ModelLoad(String),

    /// Declared and produced tensor shapes disagree
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Image could not be decoded into pixel data
    #[error("image decode error: {0}")]
    Decode(String),

    /// Persistent model store or response cache failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Forward pass failures other than shape mismatches
    #[error("inference error: {0}")]
    Inference(String),

    /// The classifier handle was released before use
    #[error("classifier handle has been disposed")]
    Disposed,

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem/IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

/// Discriminant used for retry and recovery decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ModelLoad,
    ShapeMismatch,
    Decode,
    Storage,
    Inference,
    Disposed,
    Config,
    Io,
    Serialization,
    Internal,
}

impl Error {
    /// Create a new model load error
    pub fn model_load(msg: impl Into<String>) -> Self {
        Self::ModelLoad(msg.into())
    }

    /// Create a new shape mismatch error
    pub fn shape_mismatch(expected: impl Into<Vec<usize>>, actual: impl Into<Vec<usize>>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a new decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new inference error
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ModelLoad(_) => ErrorKind::ModelLoad,
            Self::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Inference(_) => ErrorKind::Inference,
            Self::Disposed => ErrorKind::Disposed,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a user-initiated retry can reasonably succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ModelLoad | ErrorKind::ShapeMismatch | ErrorKind::Storage | ErrorKind::Disposed
        )
    }
}
