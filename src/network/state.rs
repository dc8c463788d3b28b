use serde::{Deserialize, Serialize};

use crate::algorithms::GeometricInsights;
use crate::core::{Result, Vector};
use crate::layers::{
    HyperbolicAttention, HyperbolicBatchNorm, HyperbolicLinear, HyperbolicMessagePassing,
};
use crate::network::config::NetworkConfig;

/// Summary of one completed training epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistoryEntry {
    pub epoch: usize,
    /// Mean composite loss over the epoch's examples
    pub loss: f64,
    /// Mean unweighted sum of the geometric terms
    pub geometric_loss: f64,
    /// Mean boundary-violation term
    pub boundary_loss: f64,
    /// Mean label accuracy, when any example was labelled
    pub accuracy: Option<f64>,
}

/// Result of [`HyperbolicNetwork::predict`](super::HyperbolicNetwork::predict)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub embeddings: Vec<Vector>,
    /// Embedding norms
    pub predictions: Vec<f64>,
    /// `exp(−norm)`, higher near the origin
    pub confidence: Vec<f64>,
    pub geometric_insights: GeometricInsights,
}

/// Learned parameters of every layer, in stack order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkWeights {
    pub message_passing: Vec<HyperbolicMessagePassing>,
    pub batch_norm: Vec<HyperbolicBatchNorm>,
    pub attention: HyperbolicAttention,
    pub output: HyperbolicLinear,
}

/// Everything needed to rebuild a network in another process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelState {
    pub config: NetworkConfig,
    pub current_curvature: f64,
    pub training_history: Vec<TrainingHistoryEntry>,
    pub trained: bool,
    pub weights: NetworkWeights,
}

impl ModelState {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
