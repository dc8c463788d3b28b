use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result, Vector};
use crate::layers::{ball_inputs, finite_output, sgd_step_vector, LayerConfig};
use crate::manifolds::poincare::{exp0, exp0_vjp, log0, log0_vjp, project};

/// Intermediates of the last recorded forward pass
#[derive(Debug, Clone, Default)]
struct NormTrace {
    inputs: Vec<Array1<f64>>,
    /// `(t - mean) / denom` before the affine map
    normalized: Vec<Array1<f64>>,
    /// `normalized * gamma + beta`
    shifted: Vec<Array1<f64>>,
    denom: Array1<f64>,
    /// mean and variance came from the batch itself
    batch_stats: bool,
}

/// Batch normalization in the tangent space at the origin
///
/// Running statistics are updated only in training mode. Batches of a single
/// point fall back to the running statistics. The scale `gamma` and shift
/// `beta` are learned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperbolicBatchNorm {
    gamma: Array1<f64>,
    beta: Array1<f64>,
    running_mean: Array1<f64>,
    running_var: Array1<f64>,
    momentum: f64,
    eps: f64,
    training: bool,
    learning_rate: f64,
    #[serde(skip)]
    trace: NormTrace,
    #[serde(skip)]
    grads: Option<(Array1<f64>, Array1<f64>)>,
}

impl HyperbolicBatchNorm {
    pub fn new(config: &LayerConfig) -> Result<Self> {
        config.validate()?;
        if config.output_dim != config.input_dim {
            return Err(Error::Configuration(
                "batch norm must preserve dimension".to_string(),
            ));
        }
        let dim = config.input_dim;

        // unit expected tangent norm after normalization
        let gamma = Array1::from_elem(dim, 1.0 / (dim as f64).sqrt());

        Ok(HyperbolicBatchNorm {
            gamma,
            beta: Array1::zeros(dim),
            running_mean: Array1::zeros(dim),
            running_var: Array1::ones(dim),
            momentum: 0.1,
            eps: 1e-5,
            training: true,
            learning_rate: config.learning_rate,
            trace: NormTrace::default(),
            grads: None,
        })
    }

    pub fn dim(&self) -> usize {
        self.gamma.len()
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    pub fn gamma(&self) -> &Array1<f64> {
        &self.gamma
    }

    pub fn beta(&self) -> &Array1<f64> {
        &self.beta
    }

    pub fn running_mean(&self) -> &Array1<f64> {
        &self.running_mean
    }

    pub fn running_var(&self) -> &Array1<f64> {
        &self.running_var
    }

    /// Normalize every input; `record` keeps what `backward` needs
    pub fn forward(&mut self, inputs: &[Vector], record: bool) -> Result<Vec<Vector>> {
        let points = ball_inputs(inputs, self.dim())?;
        let tangents: Vec<Array1<f64>> = points.iter().map(|x| log0(x)).collect();

        let batch_stats = self.training && tangents.len() > 1;
        let (mean, var) = if batch_stats {
            let n = tangents.len() as f64;
            let mut mean = Array1::<f64>::zeros(self.dim());
            for t in &tangents {
                mean += t;
            }
            mean /= n;

            let mut var = Array1::<f64>::zeros(self.dim());
            for t in &tangents {
                let centered = t - &mean;
                var += &(&centered * &centered);
            }
            var /= n;

            self.running_mean = &self.running_mean * (1.0 - self.momentum) + &mean * self.momentum;
            self.running_var = &self.running_var * (1.0 - self.momentum) + &var * self.momentum;
            (mean, var)
        } else {
            (self.running_mean.clone(), self.running_var.clone())
        };

        let denom = var.mapv(|v| (v + self.eps).sqrt());
        let mut trace = NormTrace {
            batch_stats,
            ..NormTrace::default()
        };
        let mut outputs = Vec::with_capacity(tangents.len());
        for (x, t) in points.iter().zip(&tangents) {
            let normalized = (t - &mean) / &denom;
            let shifted = &normalized * &self.gamma + &self.beta;
            outputs.push(finite_output(project(&exp0(&shifted)), "hyperbolic batch norm")?);

            if record {
                trace.inputs.push((*x).clone());
                trace.normalized.push(normalized);
                trace.shifted.push(shifted);
            }
        }
        if record {
            trace.denom = denom;
        }
        self.trace = trace;
        Ok(outputs)
    }

    /// Accumulate `gamma`/`beta` gradients and return gradients w.r.t. the inputs
    ///
    /// With batch statistics the gradient also flows through the batch mean
    /// and variance. The projection clamp is treated as identity.
    pub fn backward(&mut self, grad_outputs: &[Array1<f64>]) -> Result<Vec<Array1<f64>>> {
        let n = self.trace.inputs.len();
        if grad_outputs.len() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                got: grad_outputs.len(),
            });
        }
        if n == 0 {
            return Ok(Vec::new());
        }

        let dim = self.dim();
        let trace = &self.trace;
        let (grad_gamma, grad_beta) = self
            .grads
            .get_or_insert_with(|| (Array1::zeros(dim), Array1::zeros(dim)));

        let mut grad_normalized = Vec::with_capacity(n);
        let rows = trace.shifted.iter().zip(&trace.normalized).zip(grad_outputs);
        for ((shifted, normalized), grad_y) in rows {
            let grad_shifted = exp0_vjp(shifted, grad_y);
            *grad_gamma += &(&grad_shifted * normalized);
            *grad_beta += &grad_shifted;
            grad_normalized.push(grad_shifted * &self.gamma);
        }

        let grad_tangents: Vec<Array1<f64>> = if trace.batch_stats {
            let count = n as f64;
            let mut mean_grad = Array1::<f64>::zeros(dim);
            let mut mean_dot = Array1::<f64>::zeros(dim);
            for (g, normalized) in grad_normalized.iter().zip(&trace.normalized) {
                mean_grad += g;
                mean_dot += &(g * normalized);
            }
            mean_grad /= count;
            mean_dot /= count;

            grad_normalized
                .iter()
                .zip(&trace.normalized)
                .map(|(g, normalized)| {
                    (g - &mean_grad - &(normalized * &mean_dot)) / &trace.denom
                })
                .collect()
        } else {
            grad_normalized.iter().map(|g| g / &trace.denom).collect()
        };

        Ok(trace
            .inputs
            .iter()
            .zip(&grad_tangents)
            .map(|(x, g)| log0_vjp(x, g))
            .collect())
    }

    /// Apply accumulated gradients (averaged over `count` examples) and reset them
    pub fn apply_gradients(&mut self, count: usize, max_grad_norm: f64) -> Result<f64> {
        let Some((grad_gamma, grad_beta)) = self.grads.take() else {
            return Ok(0.0);
        };
        let scale = 1.0 / count.max(1) as f64;
        let lr = self.learning_rate;

        let gamma_norm =
            sgd_step_vector(&mut self.gamma, &(grad_gamma * scale), lr, max_grad_norm)?;
        let beta_norm =
            sgd_step_vector(&mut self.beta, &(grad_beta * scale), lr, max_grad_norm)?;
        Ok(gamma_norm.max(beta_norm))
    }

    pub fn load(&mut self, other: &HyperbolicBatchNorm) -> Result<()> {
        if self.dim() != other.dim() {
            return Err(Error::Configuration(format!(
                "batch norm of width {} cannot replace width {}",
                other.dim(),
                self.dim()
            )));
        }
        self.gamma.assign(&other.gamma);
        self.beta.assign(&other.beta);
        self.running_mean.assign(&other.running_mean);
        self.running_var.assign(&other.running_var);
        self.momentum = other.momentum;
        self.eps = other.eps;
        Ok(())
    }
}
