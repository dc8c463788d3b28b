pub mod attention;
pub mod batch_norm;
pub mod dropout;
pub mod linear;
pub mod message_passing;

pub use attention::{AttentionScore, HyperbolicAttention};
pub use batch_norm::HyperbolicBatchNorm;
pub use dropout::HyperbolicDropout;
pub use linear::HyperbolicLinear;
pub use message_passing::HyperbolicMessagePassing;

use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::algorithms::optimization::sgd_step;
use crate::core::{Error, Result, Vector};
use crate::manifolds::poincare::{check_in_ball, exp0, log0, project};

/// Shape and training hyper-parameters of a single layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub input_dim: usize,
    pub output_dim: usize,
    pub learning_rate: f64,
    pub dropout: Option<f64>,
    pub num_heads: Option<usize>,
}

impl LayerConfig {
    pub fn new(input_dim: usize, output_dim: usize, learning_rate: f64) -> Self {
        LayerConfig {
            input_dim,
            output_dim,
            learning_rate,
            dropout: None,
            num_heads: None,
        }
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = Some(dropout);
        self
    }

    pub fn with_num_heads(mut self, num_heads: usize) -> Self {
        self.num_heads = Some(num_heads);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_dim == 0 || self.output_dim == 0 {
            return Err(Error::Configuration(format!(
                "layer dimensions must be positive, got {} -> {}",
                self.input_dim, self.output_dim
            )));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(Error::Configuration(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if let Some(rate) = self.dropout {
            if !(0.0..1.0).contains(&rate) {
                return Err(Error::Configuration(format!(
                    "dropout must lie in [0, 1), got {}",
                    rate
                )));
            }
        }
        if self.num_heads == Some(0) {
            return Err(Error::Configuration(
                "number of heads must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Xavier/Glorot normal initialisation, shape (rows, cols)
pub(crate) fn xavier<R: Rng + ?Sized>(
    rows: usize,
    cols: usize,
    rng: &mut R,
) -> Result<Array2<f64>> {
    let scale = (2.0 / (rows + cols) as f64).sqrt();
    let normal = Normal::new(0.0, scale).map_err(|e| Error::Configuration(e.to_string()))?;
    Ok(Array2::from_shape_fn((rows, cols), |_| normal.sample(&mut *rng)))
}

/// Borrow the coordinates of every input after checking ball membership and width
///
/// Points on or outside the unit sphere fail with `GeometryViolation`.
pub(crate) fn ball_inputs<'a>(
    inputs: &'a [Vector],
    dim: usize,
) -> Result<Vec<&'a Array1<f64>>> {
    inputs
        .iter()
        .map(|v| {
            if v.dim() != dim {
                return Err(Error::DimensionMismatch {
                    expected: dim,
                    got: v.dim(),
                });
            }
            check_in_ball(v.data())?;
            Ok(v.data())
        })
        .collect()
}

/// Wrap a freshly computed point, rejecting NaN/∞
pub(crate) fn finite_output(point: Array1<f64>, layer: &str) -> Result<Vector> {
    let out = Vector::from(point);
    out.ensure_finite(layer)?;
    Ok(out)
}

/// Outer product `a bᵀ`
pub(crate) fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    a.view()
        .insert_axis(Axis(1))
        .dot(&b.view().insert_axis(Axis(0)))
}

/// `sgd_step` for a parameter vector
pub(crate) fn sgd_step_vector(
    params: &mut Array1<f64>,
    grads: &Array1<f64>,
    learning_rate: f64,
    max_grad_norm: f64,
) -> Result<f64> {
    let mut row = params.clone().insert_axis(Axis(0));
    let grad_row = grads.view().insert_axis(Axis(0)).to_owned();
    let grad_norm = sgd_step(&mut row, &grad_row, learning_rate, max_grad_norm)?;
    *params = row.remove_axis(Axis(0));
    Ok(grad_norm)
}

/// Hyperbolic ReLU: exp0(relu(log0(x))), re-projected
pub fn hyperbolic_relu(inputs: &[Vector]) -> Result<Vec<Vector>> {
    inputs
        .iter()
        .map(|v| {
            check_in_ball(v.data())?;
            let tangent = log0(v.data()).mapv(|x| x.max(0.0));
            finite_output(project(&exp0(&tangent)), "hyperbolic relu")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_config_validation() {
        assert!(LayerConfig::new(4, 4, 0.01).validate().is_ok());
        assert!(LayerConfig::new(0, 4, 0.01).validate().is_err());
        assert!(LayerConfig::new(4, 4, -0.1).validate().is_err());
        assert!(LayerConfig::new(4, 4, 0.01).with_dropout(1.0).validate().is_err());
        assert!(LayerConfig::new(4, 4, 0.01).with_num_heads(0).validate().is_err());
    }

    #[test]
    fn test_hyperbolic_relu_zeroes_negative_directions() {
        let out = hyperbolic_relu(&[Vector::new(vec![-0.3, 0.4])]).unwrap();
        assert_eq!(out[0].data()[0], 0.0);
        assert!((out[0].data()[1] - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_hyperbolic_relu_rejects_outside_points() {
        let result = hyperbolic_relu(&[Vector::new(vec![1.0, 0.5])]);
        assert!(matches!(result, Err(Error::GeometryViolation { .. })));
    }
}
