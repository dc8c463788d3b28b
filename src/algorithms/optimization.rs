use ndarray::{Array1, Array2};
use tracing::{debug, trace};

use crate::core::error::{Error, Result};
use crate::core::traits::Manifold;
use crate::manifolds::Euclidean;

/// Manifold whose points and tangent vectors are plain coordinate arrays
pub trait ArrayManifold:
    Manifold<Point = Array1<f64>, Vector = Array1<f64>, Scalar = f64>
{
}

impl<M> ArrayManifold for M where
    M: Manifold<Point = Array1<f64>, Vector = Array1<f64>, Scalar = f64>
{
}

/// Objective function on a Riemannian manifold
pub trait ObjectiveFunction<M: ArrayManifold> {
    /// Evaluate the function at point p
    fn eval(&self, manifold: &M, p: &Array1<f64>) -> Result<f64>;

    /// Euclidean gradient in ambient coordinates
    fn gradient_ambient(&self, manifold: &M, p: &Array1<f64>) -> Result<Array1<f64>>;

    /// Riemannian gradient: the Euclidean gradient rescaled by the inverse metric
    fn riemannian_gradient(&self, manifold: &M, p: &Array1<f64>) -> Result<Array1<f64>> {
        let grad_ambient = self.gradient_ambient(manifold, p)?;
        manifold.egrad_to_rgrad(p, &grad_ambient)
    }
}

/// Method for taking steps on the manifold
#[derive(Debug, Clone, Copy, Default)]
pub enum RetractionMethod {
    /// Use exponential map: p_new = exp_p(v)
    Exponential,

    /// Use projection retraction: p_new = Proj(p + v)
    #[default]
    Projection,
}

/// Line search strategy
#[derive(Debug, Clone, Copy)]
pub enum LineSearch {
    /// No line search, use fixed step size
    None,
    /// Backtracking line search with Armijo condition
    /// alpha_{k+1} = rho * alpha_k until f(R(p, alpha*v)) ≤ f(p) + c1*alpha*⟨grad f, v⟩
    Backtracking {
        initial_alpha: f64,
        rho: f64,
        c1: f64,
    },
}

impl Default for LineSearch {
    fn default() -> Self {
        LineSearch::Backtracking {
            initial_alpha: 1.0,
            rho: 0.5,
            c1: 1e-4,
        }
    }
}

/// Convergence criteria
#[derive(Debug, Clone)]
pub struct Convergence {
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Tolerance on gradient norm: ||grad f|| < grad_tol
    pub grad_tol: f64,
    /// Tolerance on function value change: |f_k - f_{k-1}| < f_tol
    pub f_tol: f64,
    /// Tolerance on step size: d(p_k, p_{k-1}) < step_tol
    pub step_tol: f64,
}

impl Default for Convergence {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            grad_tol: 1e-6,
            f_tol: 1e-9,
            step_tol: 1e-9,
        }
    }
}

/// Optimization result
#[derive(Debug, Clone)]
pub struct OptimizationResult<P> {
    /// Final point
    pub point: P,
    /// Final objective value
    pub value: f64,
    /// Final gradient norm
    pub grad_norm: f64,
    /// Number of iterations
    pub iterations: usize,
    /// Convergence status
    pub converged: bool,
    /// Reason for termination
    pub message: String,
}

/// Riemannian gradient descent optimizer
pub struct RiemannianGradientDescent {
    /// Step size (learning rate)
    pub step_size: f64,
    /// Line search strategy
    pub line_search: LineSearch,
    /// Retraction method (exponential vs projection)
    pub retraction: RetractionMethod,
    /// Convergence criteria
    pub convergence: Convergence,
}

impl Default for RiemannianGradientDescent {
    fn default() -> Self {
        Self {
            step_size: 0.01,
            line_search: LineSearch::default(),
            retraction: RetractionMethod::default(),
            convergence: Convergence::default(),
        }
    }
}

impl RiemannianGradientDescent {
    /// Create a new optimizer with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set retraction method
    pub fn with_retraction(mut self, retraction: RetractionMethod) -> Self {
        self.retraction = retraction;
        self
    }

    /// Set step size
    pub fn with_step_size(mut self, step_size: f64) -> Self {
        self.step_size = step_size;
        self
    }

    /// Set line search strategy
    pub fn with_line_search(mut self, line_search: LineSearch) -> Self {
        self.line_search = line_search;
        self
    }

    /// Set convergence criteria
    pub fn with_convergence(mut self, convergence: Convergence) -> Self {
        self.convergence = convergence;
        self
    }

    /// Take a step on the manifold using configured retraction method
    pub fn retract<M: ArrayManifold>(
        &self,
        manifold: &M,
        p: &Array1<f64>,
        v: &Array1<f64>,
    ) -> Result<Array1<f64>> {
        match self.retraction {
            RetractionMethod::Exponential => manifold.exp(p, v),
            RetractionMethod::Projection => manifold.project(&(p + v)),
        }
    }

    /// Single descent step p_new = R_p(-step_size * grad)
    pub fn step<M: ArrayManifold>(
        &self,
        manifold: &M,
        p: &Array1<f64>,
        rgrad: &Array1<f64>,
    ) -> Result<Array1<f64>> {
        self.retract(manifold, p, &(rgrad * (-self.step_size)))
    }

    /// Optimize using Riemannian gradient descent
    pub fn minimize<M, F>(
        &self,
        manifold: &M,
        objective: &F,
        p0: Array1<f64>,
    ) -> Result<OptimizationResult<Array1<f64>>>
    where
        M: ArrayManifold,
        F: ObjectiveFunction<M>,
    {
        let mut p = p0;
        let mut f_val = objective.eval(manifold, &p)?;

        for iter in 0..self.convergence.max_iterations {
            let grad = objective.riemannian_gradient(manifold, &p)?;
            let grad_norm = manifold.metric(&p, &grad, &grad).sqrt();
            if !grad_norm.is_finite() {
                return Err(Error::NumericalInstability(format!(
                    "gradient norm is {} at iteration {}",
                    grad_norm, iter
                )));
            }

            trace!(iter, f = f_val, grad_norm, "riemannian gradient descent");

            if grad_norm < self.convergence.grad_tol {
                debug!(
                    iterations = iter,
                    value = f_val,
                    "converged: gradient norm below tolerance"
                );
                return Ok(OptimizationResult {
                    point: p,
                    value: f_val,
                    grad_norm,
                    iterations: iter,
                    converged: true,
                    message: "Gradient norm below tolerance".to_string(),
                });
            }

            let direction = &grad * (-1.0);
            let alpha =
                self.perform_line_search(manifold, objective, &p, &direction, &grad, f_val)?;

            let p_new = self.retract(manifold, &p, &(&direction * alpha))?;
            let f_new = objective.eval(manifold, &p_new)?;

            if (f_val - f_new).abs() < self.convergence.f_tol {
                debug!(
                    iterations = iter + 1,
                    value = f_new,
                    "converged: function change below tolerance"
                );
                return Ok(OptimizationResult {
                    point: p_new,
                    value: f_new,
                    grad_norm,
                    iterations: iter + 1,
                    converged: true,
                    message: "Function value change below tolerance".to_string(),
                });
            }

            let step_dist = manifold.distance(&p, &p_new)?;
            if step_dist < self.convergence.step_tol {
                debug!(
                    iterations = iter + 1,
                    value = f_new,
                    "converged: step size below tolerance"
                );
                return Ok(OptimizationResult {
                    point: p_new,
                    value: f_new,
                    grad_norm,
                    iterations: iter + 1,
                    converged: true,
                    message: "Step size below tolerance".to_string(),
                });
            }

            p = p_new;
            f_val = f_new;
        }

        let grad = objective.riemannian_gradient(manifold, &p)?;
        let grad_norm = manifold.metric(&p, &grad, &grad).sqrt();
        debug!(
            iterations = self.convergence.max_iterations,
            value = f_val,
            "maximum iterations reached"
        );

        Ok(OptimizationResult {
            point: p,
            value: f_val,
            grad_norm,
            iterations: self.convergence.max_iterations,
            converged: false,
            message: "Maximum iterations reached".to_string(),
        })
    }

    /// Perform line search to find step size
    fn perform_line_search<M, F>(
        &self,
        manifold: &M,
        objective: &F,
        p: &Array1<f64>,
        direction: &Array1<f64>,
        grad: &Array1<f64>,
        f_val: f64,
    ) -> Result<f64>
    where
        M: ArrayManifold,
        F: ObjectiveFunction<M>,
    {
        match self.line_search {
            LineSearch::None => Ok(self.step_size),
            LineSearch::Backtracking {
                initial_alpha,
                rho,
                c1,
            } => {
                let mut alpha = initial_alpha;
                let directional_derivative = manifold.metric(p, grad, direction);

                let max_backtracks = 30;
                for _ in 0..max_backtracks {
                    let p_trial = self.retract(manifold, p, &(direction * alpha))?;
                    let f_trial = objective.eval(manifold, &p_trial)?;

                    if f_trial <= f_val + c1 * alpha * directional_derivative {
                        return Ok(alpha);
                    }

                    alpha *= rho;
                    if alpha < 1e-16 {
                        break;
                    }
                }

                Ok(alpha.max(1e-16))
            }
        }
    }
}

/// Descent step for flat layer parameters with gradient-norm clipping
///
/// The parameters are one point of a Euclidean space, moved by a single
/// projection-retraction step. Returns the gradient norm before clipping.
pub fn sgd_step(
    params: &mut Array2<f64>,
    grads: &Array2<f64>,
    learning_rate: f64,
    max_grad_norm: f64,
) -> Result<f64> {
    if params.shape() != grads.shape() {
        return Err(Error::DimensionMismatch {
            expected: params.len(),
            got: grads.len(),
        });
    }

    let grad_norm = grads.iter().map(|g| g * g).sum::<f64>().sqrt();
    if !grad_norm.is_finite() {
        return Err(Error::NumericalInstability(
            "non-finite parameter gradient".to_string(),
        ));
    }

    let scale = if grad_norm > max_grad_norm {
        max_grad_norm / grad_norm
    } else {
        1.0
    };
    let point: Array1<f64> = params.iter().copied().collect();
    let rgrad: Array1<f64> = grads.iter().map(|g| g * scale).collect();
    let optimizer = RiemannianGradientDescent::new()
        .with_step_size(learning_rate)
        .with_retraction(RetractionMethod::Projection);
    let updated = optimizer.step(&Euclidean::new(point.len()), &point, &rgrad)?;

    params
        .iter_mut()
        .zip(updated.iter())
        .for_each(|(param, value)| *param = *value);
    Ok(grad_norm)
}
