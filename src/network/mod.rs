mod config;
mod state;

pub use config::{GeometryMode, NetworkConfig, TrainOverrides};
pub use state::{ModelState, NetworkWeights, Prediction, TrainingHistoryEntry};

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::algorithms::insights;
use crate::algorithms::loss::{
    accuracy, fit_curvature, CompositeLoss, LossBreakdown, TriangleSample,
};
use crate::algorithms::GeometricInsights;
use crate::core::{DataSource, Error, Result, TrainingData, Vector};
use crate::layers::{
    hyperbolic_relu, HyperbolicAttention, HyperbolicBatchNorm, HyperbolicDropout, HyperbolicLinear,
    HyperbolicMessagePassing, LayerConfig,
};
use crate::manifolds::poincare::project;
use crate::manifolds::{Euclidean, PoincareBall};

/// Per-batch gradient clipping threshold
const MAX_GRAD_NORM: f64 = 5.0;

/// Fraction of the gap to the fitted curvature closed after each adaptive epoch
const CURVATURE_ADAPTATION_RATE: f64 = 0.1;

/// Adaptive curvature is kept at or below this
const MAX_ADAPTIVE_CURVATURE: f64 = -1e-3;

#[derive(Debug, Clone)]
struct Block {
    message_passing: HyperbolicMessagePassing,
    batch_norm: HyperbolicBatchNorm,
    dropout: HyperbolicDropout,
}

/// Hyperbolic graph network over the Poincaré ball
///
/// Stack: `num_layers` × {message passing → batch norm → hyperbolic ReLU →
/// dropout}, one global attention pass, one output linear map.
///
/// Training pushes the closed-form loss gradient back through the output map,
/// attention, batch norm and message passing, and updates all of their
/// parameters. ReLU and dropout are crossed straight-through.
#[derive(Debug, Clone)]
pub struct HyperbolicNetwork {
    config: NetworkConfig,
    blocks: Vec<Block>,
    attention: HyperbolicAttention,
    output: HyperbolicLinear,
    history: Vec<TrainingHistoryEntry>,
    current_curvature: f64,
    trained: bool,
    rng: StdRng,
}

impl HyperbolicNetwork {
    /// Validate `config` and build a freshly initialised layer stack
    ///
    /// The network starts in inference mode; only `train` switches dropout
    /// and batch-norm statistics on.
    pub fn new(config: NetworkConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let dim = config.embedding_dim;
        let mut blocks = Vec::with_capacity(config.num_layers);
        for layer in 0..config.num_layers {
            let input_dim = if layer == 0 { config.input_dim() } else { dim };
            let same =
                LayerConfig::new(dim, dim, config.learning_rate).with_dropout(config.dropout);
            blocks.push(Block {
                message_passing: HyperbolicMessagePassing::new(
                    &LayerConfig::new(input_dim, dim, config.learning_rate),
                    &mut rng,
                )?,
                batch_norm: HyperbolicBatchNorm::new(&same)?,
                dropout: HyperbolicDropout::new(&same)?,
            });
        }

        let attention = HyperbolicAttention::new(
            &LayerConfig::new(dim, dim, config.learning_rate).with_num_heads(config.num_heads),
            &mut rng,
        )?;
        let output =
            HyperbolicLinear::new(&LayerConfig::new(dim, dim, config.learning_rate), &mut rng)?;

        let current_curvature = match config.geometry_mode {
            GeometryMode::Euclidean => 0.0,
            GeometryMode::Hyperbolic | GeometryMode::Adaptive => config.curvature,
        };

        info!(
            input_dim = config.input_dim(),
            embedding_dim = dim,
            num_layers = config.num_layers,
            num_heads = config.num_heads,
            mode = ?config.geometry_mode,
            "built hyperbolic network"
        );

        let mut network = HyperbolicNetwork {
            config,
            blocks,
            attention,
            output,
            history: Vec::new(),
            current_curvature,
            trained: false,
            rng,
        };
        network.set_training(false);
        Ok(network)
    }

    /// Rebuild a network from exported state
    pub fn from_state(state: ModelState) -> Result<Self> {
        if !state.current_curvature.is_finite() {
            return Err(Error::Configuration(format!(
                "imported curvature must be finite, got {}",
                state.current_curvature
            )));
        }
        let mut network = HyperbolicNetwork::new(state.config)?;
        network.load_weights(&state.weights)?;
        network.current_curvature = state.current_curvature;
        network.history = state.training_history;
        network.trained = state.trained;
        Ok(network)
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn geometry_mode(&self) -> GeometryMode {
        self.config.geometry_mode
    }

    pub fn current_curvature(&self) -> f64 {
        self.current_curvature
    }

    pub fn training_history(&self) -> &[TrainingHistoryEntry] {
        &self.history
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Embed every node of `data` with the current weights and mode
    pub fn forward(&mut self, data: &TrainingData) -> Result<Vec<Vector>> {
        self.run(data, false)
    }

    /// Train on `data`, appending one history entry per epoch
    ///
    /// Stops after `max_epochs` or as soon as an epoch's mean loss falls
    /// below the configured tolerance.
    pub fn train(
        &mut self,
        data: &[TrainingData],
        overrides: Option<TrainOverrides>,
    ) -> Result<&[TrainingHistoryEntry]> {
        if data.is_empty() {
            return Err(Error::EmptyData);
        }
        for example in data {
            example.validate()?;
        }

        let overrides = overrides.unwrap_or_default();
        let max_epochs = overrides.max_epochs.unwrap_or(self.config.max_epochs);
        let batch_size = overrides.batch_size.unwrap_or(self.config.batch_size);
        let learning_rate = overrides.learning_rate.unwrap_or(self.config.learning_rate);
        if max_epochs == 0 || batch_size == 0 {
            return Err(Error::Configuration(
                "batch size and epoch limit must be positive".to_string(),
            ));
        }
        if !(learning_rate > 0.0 && learning_rate.is_finite()) {
            return Err(Error::Configuration(format!(
                "learning rate must be positive and finite, got {}",
                learning_rate
            )));
        }

        self.set_learning_rate(learning_rate);
        self.set_training(true);
        let outcome = self.run_epochs(data, max_epochs, batch_size);
        self.set_training(false);
        outcome?;

        self.trained = true;
        Ok(&self.history)
    }

    /// Pull training graphs from a collaborator and train on them
    pub fn train_from_source(
        &mut self,
        source: &dyn DataSource,
        overrides: Option<TrainOverrides>,
    ) -> Result<&[TrainingHistoryEntry]> {
        let data = source.training_data()?;
        self.train(&data, overrides)
    }

    /// Inference-mode embedding with norm-based predictions and geometric insights
    pub fn predict(&mut self, data: &TrainingData) -> Result<Prediction> {
        if !self.trained {
            return Err(Error::UntrainedModel);
        }
        self.set_training(false);

        let embeddings = self.run(data, false)?;
        let predictions: Vec<f64> = embeddings.iter().map(Vector::norm).collect();
        let confidence = predictions.iter().map(|n| (-n).exp()).collect();
        let geometric_insights = self.geometric_insights(&embeddings)?;

        Ok(Prediction {
            embeddings,
            predictions,
            confidence,
            geometric_insights,
        })
    }

    /// Insights under the metric of the current geometry mode
    pub fn geometric_insights(&self, embeddings: &[Vector]) -> Result<GeometricInsights> {
        let dim = self.config.embedding_dim;
        match self.config.geometry_mode {
            GeometryMode::Euclidean => {
                insights::compute(&Euclidean::new(dim), embeddings, self.current_curvature)
            }
            GeometryMode::Hyperbolic | GeometryMode::Adaptive => {
                insights::compute(&PoincareBall::new(dim), embeddings, self.current_curvature)
            }
        }
    }

    /// Switch geometry without touching learned weights
    ///
    /// Euclidean forces curvature 0 and hyperbolic forces -1. Adaptive keeps
    /// the current curvature for training to update. The configured curvature
    /// is kept negative in the curved modes so exported state stays valid.
    pub fn set_geometry_mode(&mut self, mode: GeometryMode) {
        match mode {
            GeometryMode::Euclidean => self.current_curvature = 0.0,
            GeometryMode::Hyperbolic => {
                self.current_curvature = -1.0;
                self.config.curvature = -1.0;
            }
            GeometryMode::Adaptive => {
                if self.config.curvature >= 0.0 {
                    self.config.curvature = -1.0;
                }
            }
        }
        self.config.geometry_mode = mode;
        debug!(?mode, curvature = self.current_curvature, "geometry mode changed");
    }

    pub fn export_model(&self) -> ModelState {
        ModelState {
            config: self.config.clone(),
            current_curvature: self.current_curvature,
            training_history: self.history.clone(),
            trained: self.trained,
            weights: NetworkWeights {
                message_passing: self
                    .blocks
                    .iter()
                    .map(|b| b.message_passing.clone())
                    .collect(),
                batch_norm: self.blocks.iter().map(|b| b.batch_norm.clone()).collect(),
                attention: self.attention.clone(),
                output: self.output.clone(),
            },
        }
    }

    /// Replace this network with one rebuilt from `state`
    ///
    /// On error `self` is left unchanged.
    pub fn import_model(&mut self, state: ModelState) -> Result<()> {
        *self = HyperbolicNetwork::from_state(state)?;
        info!(
            curvature = self.current_curvature,
            epochs = self.history.len(),
            "imported model"
        );
        Ok(())
    }

    fn load_weights(&mut self, weights: &NetworkWeights) -> Result<()> {
        let layers = self.blocks.len();
        if weights.message_passing.len() != layers || weights.batch_norm.len() != layers {
            return Err(Error::Configuration(format!(
                "weights hold {} message-passing and {} batch-norm layers, config needs {}",
                weights.message_passing.len(),
                weights.batch_norm.len(),
                layers
            )));
        }
        for ((block, mp), bn) in self
            .blocks
            .iter_mut()
            .zip(&weights.message_passing)
            .zip(&weights.batch_norm)
        {
            block.message_passing.load(mp)?;
            block.batch_norm.load(bn)?;
        }
        self.attention.load(&weights.attention)?;
        self.output.load(&weights.output)
    }

    fn set_training(&mut self, training: bool) {
        for block in &mut self.blocks {
            block.batch_norm.set_training(training);
            block.dropout.set_training(training);
        }
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        for block in &mut self.blocks {
            block.message_passing.linear_mut().set_learning_rate(learning_rate);
            block.batch_norm.set_learning_rate(learning_rate);
        }
        self.attention.set_learning_rate(learning_rate);
        self.output.set_learning_rate(learning_rate);
    }

    /// Validated, finite inputs projected into the ball
    fn prepare_inputs(&self, data: &TrainingData) -> Result<Vec<Vector>> {
        data.validate()?;
        let dim = self.config.input_dim();
        data.nodes
            .iter()
            .map(|node| {
                if node.dim() != dim {
                    return Err(Error::DimensionMismatch {
                        expected: dim,
                        got: node.dim(),
                    });
                }
                node.ensure_finite("network input")?;
                Ok(Vector::from(project(node.data())))
            })
            .collect()
    }

    fn run(&mut self, data: &TrainingData, record: bool) -> Result<Vec<Vector>> {
        let mut hidden = self.prepare_inputs(data)?;
        let adjacency = data.adjacency();

        for block in &mut self.blocks {
            hidden = block.message_passing.forward(&hidden, &adjacency, record)?;
            hidden = block.batch_norm.forward(&hidden, record)?;
            hidden = hyperbolic_relu(&hidden)?;
            hidden = block.dropout.forward(&hidden, &mut self.rng)?;
        }

        hidden = self.attention.forward(&hidden, record)?;
        self.output.forward(&hidden, record)
    }

    fn backpropagate(&mut self, grad_outputs: &[Array1<f64>]) -> Result<()> {
        let grad = self.output.backward(grad_outputs)?;
        let mut grad = self.attention.backward(&grad)?;
        // dropout and ReLU are crossed straight-through
        for block in self.blocks.iter_mut().rev() {
            grad = block.batch_norm.backward(&grad)?;
            grad = block.message_passing.backward(&grad)?;
        }
        Ok(())
    }

    /// Largest pre-clip gradient norm among the updated layers
    fn apply_gradients(&mut self, count: usize) -> Result<f64> {
        let mut grad_norm = self.output.apply_gradients(count, MAX_GRAD_NORM)?;
        grad_norm = grad_norm.max(self.attention.apply_gradients(count, MAX_GRAD_NORM)?);
        for block in &mut self.blocks {
            let norm = block
                .message_passing
                .linear_mut()
                .apply_gradients(count, MAX_GRAD_NORM)?;
            let bn_norm = block.batch_norm.apply_gradients(count, MAX_GRAD_NORM)?;
            grad_norm = grad_norm.max(norm).max(bn_norm);
        }
        Ok(grad_norm)
    }

    fn run_epochs(
        &mut self,
        data: &[TrainingData],
        max_epochs: usize,
        batch_size: usize,
    ) -> Result<()> {
        let adaptive = self.config.geometry_mode == GeometryMode::Adaptive;

        for _ in 0..max_epochs {
            let loss = CompositeLoss::new(self.current_curvature);
            let mut totals = EpochTotals::default();
            let mut triangles = Vec::new();

            for batch in data.chunks(batch_size) {
                for example in batch {
                    let embeddings = self.run(example, true)?;
                    let (breakdown, example_triangles) =
                        loss.evaluate_with_triangles(&embeddings, example)?;
                    if !breakdown.is_finite() {
                        return Err(Error::NumericalInstability(format!(
                            "non-finite loss {:?}",
                            breakdown
                        )));
                    }
                    let grads = loss.gradients(&embeddings, example)?;
                    self.backpropagate(&grads)?;

                    totals.add(&breakdown, accuracy(&embeddings, example.labels.as_deref()));
                    if adaptive {
                        triangles.extend(example_triangles);
                    }
                }
                let grad_norm = self.apply_gradients(batch.len())?;
                debug!(batch_len = batch.len(), grad_norm, "applied batch update");
            }

            let entry = totals.entry(self.history.len() + 1, data.len());
            self.history.push(entry);
            info!(
                epoch = entry.epoch,
                loss = entry.loss,
                geometric_loss = entry.geometric_loss,
                boundary_loss = entry.boundary_loss,
                "epoch complete"
            );

            if adaptive {
                self.adapt_curvature(&triangles);
            }
            if entry.loss < self.config.tolerance {
                info!(epoch = entry.epoch, loss = entry.loss, "loss below tolerance, stopping");
                break;
            }
        }
        Ok(())
    }

    fn adapt_curvature(&mut self, triangles: &[TriangleSample]) {
        match fit_curvature(triangles) {
            Some(fitted) if fitted.is_finite() => {
                let target = fitted.min(MAX_ADAPTIVE_CURVATURE);
                self.current_curvature +=
                    CURVATURE_ADAPTATION_RATE * (target - self.current_curvature);
                debug!(fitted, curvature = self.current_curvature, "adapted curvature");
            }
            _ => warn!(
                triangles = triangles.len(),
                "no usable triangles, curvature left unchanged"
            ),
        }
    }
}

#[derive(Debug, Default)]
struct EpochTotals {
    loss: f64,
    geometric: f64,
    boundary: f64,
    accuracy: f64,
    labelled: usize,
}

impl EpochTotals {
    fn add(&mut self, breakdown: &LossBreakdown, accuracy: Option<f64>) {
        self.loss += breakdown.total();
        self.geometric += breakdown.geometric();
        self.boundary += breakdown.boundary;
        if let Some(acc) = accuracy {
            self.accuracy += acc;
            self.labelled += 1;
        }
    }

    fn entry(&self, epoch: usize, examples: usize) -> TrainingHistoryEntry {
        let n = examples.max(1) as f64;
        TrainingHistoryEntry {
            epoch,
            loss: self.loss / n,
            geometric_loss: self.geometric / n,
            boundary_loss: self.boundary / n,
            accuracy: (self.labelled > 0).then(|| self.accuracy / self.labelled as f64),
        }
    }
}
