use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Which geometry the network reports its results in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryMode {
    /// Flat metric, curvature 0
    Euclidean,
    /// Poincaré ball at curvature −1
    #[default]
    Hyperbolic,
    /// Curvature is refitted to observed triangle defects after every epoch
    Adaptive,
}

/// Hyper-parameters of a [`HyperbolicNetwork`](super::HyperbolicNetwork)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Width of the input vectors; `None` means `embedding_dim`
    pub input_dim: Option<usize>,
    pub embedding_dim: usize,
    pub num_layers: usize,
    pub num_heads: usize,
    pub curvature: f64,
    pub learning_rate: f64,
    pub dropout: f64,
    pub batch_size: usize,
    pub max_epochs: usize,
    /// Training stops once the mean epoch loss drops below this
    pub tolerance: f64,
    pub geometry_mode: GeometryMode,
    pub seed: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            input_dim: None,
            embedding_dim: 8,
            num_layers: 2,
            num_heads: 2,
            curvature: -1.0,
            learning_rate: 0.01,
            dropout: 0.1,
            batch_size: 32,
            max_epochs: 100,
            tolerance: 1e-4,
            geometry_mode: GeometryMode::Hyperbolic,
            seed: None,
        }
    }
}

impl NetworkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input_dim(mut self, input_dim: usize) -> Self {
        self.input_dim = Some(input_dim);
        self
    }

    pub fn with_embedding_dim(mut self, embedding_dim: usize) -> Self {
        self.embedding_dim = embedding_dim;
        self
    }

    pub fn with_num_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = num_layers;
        self
    }

    pub fn with_num_heads(mut self, num_heads: usize) -> Self {
        self.num_heads = num_heads;
        self
    }

    pub fn with_curvature(mut self, curvature: f64) -> Self {
        self.curvature = curvature;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_epochs(mut self, max_epochs: usize) -> Self {
        self.max_epochs = max_epochs;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_geometry_mode(mut self, mode: GeometryMode) -> Self {
        self.geometry_mode = mode;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Width of the vectors `forward` accepts
    pub fn input_dim(&self) -> usize {
        self.input_dim.unwrap_or(self.embedding_dim)
    }

    pub fn validate(&self) -> Result<()> {
        if self.embedding_dim == 0 || self.input_dim() == 0 {
            return Err(Error::Configuration(
                "embedding and input dimensions must be positive".to_string(),
            ));
        }
        if self.num_layers == 0 {
            return Err(Error::Configuration(
                "network needs at least one layer".to_string(),
            ));
        }
        if self.num_heads == 0 {
            return Err(Error::Configuration(
                "number of heads must be positive".to_string(),
            ));
        }
        if self.embedding_dim % self.num_heads != 0 {
            return Err(Error::Configuration(format!(
                "embedding dimension {} is not divisible by {} heads",
                self.embedding_dim, self.num_heads
            )));
        }
        if self.batch_size == 0 || self.max_epochs == 0 {
            return Err(Error::Configuration(
                "batch size and epoch limit must be positive".to_string(),
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(Error::Configuration(format!(
                "learning rate must be positive and finite, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Configuration(format!(
                "dropout must lie in [0, 1), got {}",
                self.dropout
            )));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(Error::Configuration(format!(
                "tolerance must be a non-negative number, got {}",
                self.tolerance
            )));
        }
        if !self.curvature.is_finite() {
            return Err(Error::Configuration(format!(
                "curvature must be finite, got {}",
                self.curvature
            )));
        }
        if self.geometry_mode != GeometryMode::Euclidean && self.curvature >= 0.0 {
            return Err(Error::Configuration(format!(
                "hyperbolic geometry needs negative curvature, got {}",
                self.curvature
            )));
        }
        Ok(())
    }
}

/// Per-call replacements for the configured training schedule
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainOverrides {
    pub max_epochs: Option<usize>,
    pub batch_size: Option<usize>,
    pub learning_rate: Option<f64>,
}

impl TrainOverrides {
    pub fn epochs(max_epochs: usize) -> Self {
        TrainOverrides {
            max_epochs: Some(max_epochs),
            ..Self::default()
        }
    }
}
