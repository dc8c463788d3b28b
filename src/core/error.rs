use thiserror::Error;

/// Errors that can occur during geometry, layer and network operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Invalid network or layer configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Training data has no nodes
    #[error("training data contains no nodes")]
    EmptyData,

    /// Edge or hyperedge references a node that does not exist
    #[error("node index {index} out of range for {len} nodes")]
    Index { index: usize, len: usize },

    /// Labels are not aligned with nodes
    #[error("label count {labels} does not match node count {nodes}")]
    LabelMismatch { labels: usize, nodes: usize },

    /// Point lies on or outside the unit ball where strict membership is required
    #[error("geometry violation: point norm {norm} is not inside the Poincaré ball")]
    GeometryViolation { norm: f64 },

    /// NaN or infinity detected mid-computation
    #[error("numerical instability: {0}")]
    NumericalInstability(String),

    /// `predict` called before a successful `train`
    #[error("model has not been trained")]
    UntrainedModel,

    /// Dimension mismatch
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Model state could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A data source collaborator failed to supply training data
    #[error("data source error: {0}")]
    DataSource(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type for hyperbolic operations
pub type Result<T> = std::result::Result<T, Error>;
