use ndarray::{Array1, Array2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::algorithms::optimization::sgd_step;
use crate::core::{Error, Result, Vector};
use crate::layers::{ball_inputs, finite_output, outer, sgd_step_vector, xavier, LayerConfig};
use crate::manifolds::poincare::{exp0, exp0_vjp, log0, log0_vjp, project};

/// Values a training forward pass keeps for the backward pass of one node
#[derive(Debug, Clone)]
struct LinearTrace {
    input: Array1<f64>,
    tangent: Array1<f64>,
    pre_activation: Array1<f64>,
}

/// Manifold-aware affine map: project(exp0(W · log0(x) + b))
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperbolicLinear {
    weights: Array2<f64>,
    bias: Array1<f64>,
    learning_rate: f64,
    #[serde(skip)]
    trace: Vec<LinearTrace>,
    #[serde(skip)]
    grads: Option<(Array2<f64>, Array1<f64>)>,
}

impl HyperbolicLinear {
    /// Create a new layer with Xavier/Glorot initialization
    pub fn new<R: Rng + ?Sized>(config: &LayerConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        Ok(HyperbolicLinear {
            weights: xavier(config.output_dim, config.input_dim, rng)?,
            bias: Array1::zeros(config.output_dim),
            learning_rate: config.learning_rate,
            trace: Vec::new(),
            grads: None,
        })
    }

    /// Build a layer from known parameters, `weights` shaped (output, input)
    pub fn from_parameters(
        weights: Array2<f64>,
        bias: Array1<f64>,
        learning_rate: f64,
    ) -> Result<Self> {
        LayerConfig::new(weights.ncols(), weights.nrows(), learning_rate).validate()?;
        if bias.len() != weights.nrows() {
            return Err(Error::DimensionMismatch {
                expected: weights.nrows(),
                got: bias.len(),
            });
        }
        if weights.iter().chain(bias.iter()).any(|w| !w.is_finite()) {
            return Err(Error::NumericalInstability(
                "non-finite linear parameters".to_string(),
            ));
        }
        Ok(HyperbolicLinear {
            weights,
            bias,
            learning_rate,
            trace: Vec::new(),
            grads: None,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.weights.ncols()
    }

    pub fn output_dim(&self) -> usize {
        self.weights.nrows()
    }

    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    pub fn bias(&self) -> &Array1<f64> {
        &self.bias
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    /// Map every input through the tangent space at the origin
    ///
    /// With `record` set, per-node intermediates are kept for [`backward`](Self::backward).
    pub fn forward(&mut self, inputs: &[Vector], record: bool) -> Result<Vec<Vector>> {
        let points = ball_inputs(inputs, self.input_dim())?;
        self.trace.clear();

        let mut outputs = Vec::with_capacity(points.len());
        for x in points {
            let tangent = log0(x);
            let pre_activation = self.weights.dot(&tangent) + &self.bias;
            outputs.push(finite_output(project(&exp0(&pre_activation)), "hyperbolic linear")?);

            if record {
                self.trace.push(LinearTrace {
                    input: x.clone(),
                    tangent,
                    pre_activation,
                });
            }
        }
        Ok(outputs)
    }

    /// Accumulate parameter gradients and return gradients w.r.t. the input points
    ///
    /// `grad_outputs[i]` is the Euclidean gradient of the loss at output `i` of
    /// the last recorded forward pass. The projection clamp is treated as identity.
    pub fn backward(&mut self, grad_outputs: &[Array1<f64>]) -> Result<Vec<Array1<f64>>> {
        if grad_outputs.len() != self.trace.len() {
            return Err(Error::DimensionMismatch {
                expected: self.trace.len(),
                got: grad_outputs.len(),
            });
        }

        let (rows, cols) = self.weights.dim();
        let (grad_w, grad_b) = self
            .grads
            .get_or_insert_with(|| (Array2::zeros((rows, cols)), Array1::zeros(rows)));

        let mut grad_inputs = Vec::with_capacity(grad_outputs.len());
        for (trace, grad_y) in self.trace.iter().zip(grad_outputs) {
            let grad_z = exp0_vjp(&trace.pre_activation, grad_y);

            *grad_w += &outer(&grad_z, &trace.tangent);
            *grad_b += &grad_z;

            let grad_t = self.weights.t().dot(&grad_z);
            grad_inputs.push(log0_vjp(&trace.input, &grad_t));
        }
        Ok(grad_inputs)
    }

    /// Apply accumulated gradients (averaged over `count` examples) and reset them
    pub fn apply_gradients(&mut self, count: usize, max_grad_norm: f64) -> Result<f64> {
        let Some((grad_w, grad_b)) = self.grads.take() else {
            return Ok(0.0);
        };
        let scale = 1.0 / count.max(1) as f64;

        let grad_w = grad_w * scale;
        let weight_norm = sgd_step(&mut self.weights, &grad_w, self.learning_rate, max_grad_norm)?;

        sgd_step_vector(&mut self.bias, &(grad_b * scale), self.learning_rate, max_grad_norm)?;

        Ok(weight_norm)
    }

    /// Copy parameters from another layer of identical shape
    pub fn load(&mut self, other: &HyperbolicLinear) -> Result<()> {
        if self.weights.dim() != other.weights.dim() || self.bias.len() != other.bias.len() {
            return Err(Error::Configuration(format!(
                "linear weights of shape {:?} cannot replace {:?}",
                other.weights.dim(),
                self.weights.dim()
            )));
        }
        self.weights.assign(&other.weights);
        self.bias.assign(&other.bias);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn layer(input: usize, output: usize) -> HyperbolicLinear {
        let mut rng = StdRng::seed_from_u64(3);
        HyperbolicLinear::new(&LayerConfig::new(input, output, 0.05), &mut rng).unwrap()
    }

    fn loss(layer: &mut HyperbolicLinear, x: &Vector, g: &Array1<f64>) -> f64 {
        layer.forward(std::slice::from_ref(x), false).unwrap()[0]
            .data()
            .dot(g)
    }

    #[test]
    fn test_output_inside_ball() {
        let mut layer = layer(3, 5);
        let inputs = vec![Vector::new(vec![0.9, 0.1, -0.3]), Vector::zeros(3)];
        let outputs = layer.forward(&inputs, false).unwrap();

        assert_eq!(outputs.len(), 2);
        for out in &outputs {
            assert_eq!(out.dim(), 5);
            assert!(out.norm() < 1.0);
        }
    }

    #[test]
    fn test_rejects_points_outside_ball() {
        let mut layer = layer(2, 2);
        let result = layer.forward(&[Vector::new(vec![1.0, 0.0])], false);
        assert!(matches!(result, Err(Error::GeometryViolation { .. })));
    }

    #[test]
    fn test_rejects_wrong_width() {
        let mut layer = layer(2, 2);
        let result = layer.forward(&[Vector::new(vec![0.1, 0.0, 0.0])], false);
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn test_input_gradient_matches_finite_difference() {
        let mut layer = layer(3, 2);
        let x = Vector::new(vec![0.2, -0.1, 0.3]);
        let g = Array1::from(vec![1.0, -0.5]);

        layer.forward(std::slice::from_ref(&x), true).unwrap();
        let analytic = layer.backward(std::slice::from_ref(&g)).unwrap();

        let h = 1e-6;
        for i in 0..3 {
            let mut up = x.to_vec();
            up[i] += h;
            let mut down = x.to_vec();
            down[i] -= h;
            let numeric = (loss(&mut layer, &Vector::new(up), &g)
                - loss(&mut layer, &Vector::new(down), &g))
                / (2.0 * h);
            assert_relative_eq!(analytic[0][i], numeric, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_apply_gradients_reduces_objective() {
        let mut layer = layer(2, 2);
        let x = Vector::new(vec![0.3, 0.2]);
        let g = Array1::from(vec![1.0, 1.0]);

        let before = loss(&mut layer, &x, &g);
        for _ in 0..20 {
            layer.forward(std::slice::from_ref(&x), true).unwrap();
            layer.backward(std::slice::from_ref(&g)).unwrap();
            layer.apply_gradients(1, 10.0).unwrap();
        }
        let after = loss(&mut layer, &x, &g);
        assert!(after < before);
    }

    #[test]
    fn test_backward_without_trace_fails() {
        let mut layer = layer(2, 2);
        let result = layer.backward(&[Array1::zeros(2)]);
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn test_from_parameters_validates() {
        let weights = Array2::eye(2);
        let layer = HyperbolicLinear::from_parameters(weights.clone(), Array1::zeros(2), 0.1);
        assert_eq!(layer.unwrap().weights(), &weights);

        assert!(matches!(
            HyperbolicLinear::from_parameters(weights.clone(), Array1::zeros(3), 0.1),
            Err(Error::DimensionMismatch { expected: 2, got: 3 })
        ));
        assert!(HyperbolicLinear::from_parameters(weights.clone(), Array1::zeros(2), 0.0).is_err());
        assert!(HyperbolicLinear::from_parameters(
            weights * f64::NAN,
            Array1::zeros(2),
            0.1
        )
        .is_err());
    }

    #[test]
    fn test_load_checks_shape() {
        let mut a = layer(2, 3);
        let b = layer(2, 3);
        let c = layer(3, 3);
        assert!(a.load(&b).is_ok());
        assert_eq!(a.weights(), b.weights());
        assert!(a.load(&c).is_err());
    }
}
