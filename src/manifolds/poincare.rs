use ndarray::Array1;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::algorithms::optimization::{
    Convergence, LineSearch, ObjectiveFunction, RetractionMethod, RiemannianGradientDescent,
};
use crate::core::{Error, Manifold, Result};

/// Safety margin kept between projected points and the ball boundary
pub const BALL_EPS: f64 = 1e-2;

/// Largest norm a projected point may have
pub const MAX_NORM: f64 = 1.0 - BALL_EPS;

const MIN_NORM: f64 = 1e-15;

/// Euclidean norm of the coordinate vector
pub fn norm(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}

/// Fails unless `v` is finite and strictly inside the unit ball
pub fn check_in_ball(v: &Array1<f64>) -> Result<()> {
    let n = norm(v);
    if !n.is_finite() {
        return Err(Error::NumericalInstability(
            "non-finite point coordinates".to_string(),
        ));
    }
    if n >= 1.0 {
        return Err(Error::GeometryViolation { norm: n });
    }
    Ok(())
}

/// Pull a point on or outside the unit sphere back to norm `1 - BALL_EPS`
///
/// Points strictly inside the ball are returned unchanged.
pub fn project(v: &Array1<f64>) -> Array1<f64> {
    let n = norm(v);
    if n >= 1.0 {
        v * (MAX_NORM / n)
    } else {
        v.clone()
    }
}

fn mobius_add_raw(u: &Array1<f64>, v: &Array1<f64>) -> Array1<f64> {
    let uv = u.dot(v);
    let uu = u.dot(u);
    let vv = v.dot(v);

    let numerator = u * (1.0 + 2.0 * uv + vv) + v * (1.0 - uu);
    let denominator = (1.0 + 2.0 * uv + uu * vv).max(MIN_NORM);

    numerator / denominator
}

/// Möbius addition u ⊕ v in the Poincaré ball
///
/// Both arguments must lie strictly inside the ball. A result that rounds onto
/// the boundary is pulled back by `project`.
pub fn mobius_add(u: &Array1<f64>, v: &Array1<f64>) -> Result<Array1<f64>> {
    check_in_ball(u)?;
    check_in_ball(v)?;
    Ok(project(&mobius_add_raw(u, v)))
}

/// Geodesic distance acosh(1 + 2‖u−v‖² / ((1−‖u‖²)(1−‖v‖²)))
pub fn distance(u: &Array1<f64>, v: &Array1<f64>) -> Result<f64> {
    check_in_ball(u)?;
    check_in_ball(v)?;

    let diff = u - v;
    let alpha = 1.0 - u.dot(u);
    let beta = 1.0 - v.dot(v);
    let arg = 1.0 + 2.0 * diff.dot(&diff) / (alpha * beta);

    Ok(arg.max(1.0).acosh())
}

/// Euclidean gradient of `distance(u, v)` with respect to `u`
///
/// Zero when the points coincide, where the distance is not differentiable.
pub fn distance_gradient(u: &Array1<f64>, v: &Array1<f64>) -> Array1<f64> {
    let uu = u.dot(u);
    let vv = v.dot(v);
    let diff = u - v;
    let alpha = (1.0 - uu).max(MIN_NORM);
    let beta = (1.0 - vv).max(MIN_NORM);
    let gamma = 1.0 + 2.0 * diff.dot(&diff) / (alpha * beta);

    let root = (gamma * gamma - 1.0).max(0.0).sqrt();
    if root < 1e-12 {
        return Array1::zeros(u.len());
    }

    let coeff = 4.0 / (beta * root);
    let u_term = u * ((vv - 2.0 * u.dot(v) + 1.0) / (alpha * alpha));
    let v_term = v / alpha;
    (u_term - v_term) * coeff
}

/// Exponential map at the origin: tanh(‖t‖) t/‖t‖
pub fn exp0(t: &Array1<f64>) -> Array1<f64> {
    let n = norm(t);
    if n < MIN_NORM {
        return t.clone();
    }
    t * (n.tanh() / n)
}

/// Logarithmic map at the origin: artanh(‖x‖) x/‖x‖
pub fn log0(x: &Array1<f64>) -> Array1<f64> {
    let n = norm(x);
    if n < MIN_NORM {
        return x.clone();
    }
    let clamped = n.min(1.0 - 1e-12);
    x * (clamped.atanh() / n)
}

/// Vector-Jacobian product of `exp0` at `t`
pub fn exp0_vjp(t: &Array1<f64>, grad: &Array1<f64>) -> Array1<f64> {
    let r = norm(t);
    if r < 1e-8 {
        return grad.clone();
    }
    let tanh_r = r.tanh();
    let sech2 = 1.0 - tanh_r * tanh_r;
    let radial = tanh_r / r;
    let dir = t / r;
    grad * radial + &dir * ((sech2 - radial) * dir.dot(grad))
}

/// Vector-Jacobian product of `log0` at `x`
pub fn log0_vjp(x: &Array1<f64>, grad: &Array1<f64>) -> Array1<f64> {
    let s = norm(x);
    if s < 1e-8 {
        return grad.clone();
    }
    let s = s.min(1.0 - 1e-12);
    let radial = s.atanh() / s;
    let dir = x / norm(x);
    grad * radial + &dir * ((1.0 / (1.0 - s * s) - radial) * dir.dot(grad))
}

/// Sample uniformly inside the `dim`-ball of radius `max_radius`
///
/// Deeper hierarchy levels are typically seeded with larger radii.
pub fn random_hyperbolic_point<R: Rng + ?Sized>(
    dim: usize,
    max_radius: f64,
    rng: &mut R,
) -> Result<Array1<f64>> {
    if dim == 0 {
        return Err(Error::Configuration(
            "point dimension must be positive".to_string(),
        ));
    }
    if !(0.0..1.0).contains(&max_radius) {
        return Err(Error::Configuration(format!(
            "sampling radius must lie in [0, 1), got {}",
            max_radius
        )));
    }

    let direction: Array1<f64> =
        Array1::from_shape_fn(dim, |_| -> f64 { StandardNormal.sample(&mut *rng) });
    let n = norm(&direction);
    if n < MIN_NORM {
        return Ok(Array1::zeros(dim));
    }

    let radius = max_radius * rng.gen::<f64>().powf(1.0 / dim as f64);
    Ok(direction * (radius / n))
}

/// Hyperbolic triangle defect: sum of interior angles minus π
///
/// Non-positive for any three points of the ball. Degenerate triangles have
/// defect zero.
pub fn triangle_defect(a: &Array1<f64>, b: &Array1<f64>, c: &Array1<f64>) -> Result<f64> {
    let sides = triangle_sides(a, b, c)?;
    Ok(defect_from_sides(sides))
}

/// Geodesic side lengths (|BC|, |AC|, |AB|)
pub fn triangle_sides(
    a: &Array1<f64>,
    b: &Array1<f64>,
    c: &Array1<f64>,
) -> Result<(f64, f64, f64)> {
    Ok((distance(b, c)?, distance(a, c)?, distance(a, b)?))
}

pub fn defect_from_sides((a, b, c): (f64, f64, f64)) -> f64 {
    if a < 1e-9 || b < 1e-9 || c < 1e-9 {
        return 0.0;
    }

    // hyperbolic law of cosines
    let angle = |opposite: f64, s1: f64, s2: f64| {
        let cos = (s1.cosh() * s2.cosh() - opposite.cosh()) / (s1.sinh() * s2.sinh());
        cos.clamp(-1.0, 1.0).acos()
    };

    angle(a, b, c) + angle(b, a, c) + angle(c, a, b) - std::f64::consts::PI
}

/// Heron's formula applied to the geodesic side lengths
///
/// This is the Euclidean area of a triangle with the same side lengths, not
/// the hyperbolic area `π − angle sum`. The two agree for small triangles and
/// the Euclidean value grows faster for large ones, so the curvature fit
/// built on it is an approximation.
pub fn heron_area((a, b, c): (f64, f64, f64)) -> f64 {
    let s = 0.5 * (a + b + c);
    (s * (s - a) * (s - b) * (s - c)).max(0.0).sqrt()
}

/// Poincaré ball model of hyperbolic space with curvature -1
pub struct PoincareBall {
    dim: usize,
}

impl PoincareBall {
    pub fn new(dim: usize) -> Self {
        PoincareBall { dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Conformal factor λ_p = 2 / (1 − ‖p‖²)
    pub fn conformal_factor(&self, p: &Array1<f64>) -> f64 {
        2.0 / (1.0 - p.dot(p)).max(MIN_NORM)
    }
}

impl Manifold for PoincareBall {
    type Point = Array1<f64>;
    type Vector = Array1<f64>;
    type Scalar = f64;

    /// exp_p(x) = p ⊕ tanh(λ_p‖x‖/2) x/‖x‖
    fn exp_unchecked(&self, p: &Self::Point, x: &Self::Vector) -> Self::Point {
        let n = norm(x);
        if n < MIN_NORM {
            return p.clone();
        }
        let step = x * ((0.5 * self.conformal_factor(p) * n).tanh() / n);
        project(&mobius_add_raw(p, &project(&step)))
    }

    /// log_p(q) = (2/λ_p) artanh(‖−p ⊕ q‖) w/‖w‖ with w = −p ⊕ q
    fn log_unchecked(&self, p: &Self::Point, q: &Self::Point) -> Self::Vector {
        let neg_p = -p;
        let w = mobius_add_raw(&neg_p, q);
        let n = norm(&w);
        if n < MIN_NORM {
            return Array1::zeros(p.len());
        }
        let scale = (2.0 / self.conformal_factor(p)) * n.min(1.0 - 1e-12).atanh() / n;
        w * scale
    }

    fn metric(&self, p: &Self::Point, x: &Self::Vector, y: &Self::Vector) -> Self::Scalar {
        let lambda = self.conformal_factor(p);
        lambda * lambda * x.dot(y)
    }

    fn distance(&self, p: &Self::Point, q: &Self::Point) -> Result<Self::Scalar> {
        self.validate_point(p)?;
        self.validate_point(q)?;
        distance(p, q)
    }

    fn project(&self, p: &Self::Point) -> Result<Self::Point> {
        Ok(project(p))
    }

    /// Inverse metric rescaling (1 − ‖p‖²)² / 4
    fn egrad_to_rgrad(&self, p: &Self::Point, egrad: &Self::Vector) -> Result<Self::Vector> {
        let lambda = self.conformal_factor(p);
        Ok(egrad / (lambda * lambda))
    }

    fn validate_point(&self, p: &Self::Point) -> Result<()> {
        if p.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                got: p.len(),
            });
        }
        check_in_ball(p)
    }

    fn validate_vector(&self, _p: &Self::Point, x: &Self::Vector) -> Result<()> {
        if x.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                got: x.len(),
            });
        }
        Ok(())
    }
}

/// Half the mean squared geodesic distance to a fixed set of points
struct FrechetObjective<'a> {
    points: &'a [Array1<f64>],
}

impl ObjectiveFunction<PoincareBall> for FrechetObjective<'_> {
    fn eval(&self, manifold: &PoincareBall, p: &Array1<f64>) -> Result<f64> {
        let mut total = 0.0;
        for x in self.points {
            let d = manifold.distance(p, x)?;
            total += d * d;
        }
        Ok(0.5 * total / self.points.len() as f64)
    }

    fn gradient_ambient(&self, manifold: &PoincareBall, p: &Array1<f64>) -> Result<Array1<f64>> {
        let lambda = manifold.conformal_factor(p);
        let rgrad = self.riemannian_gradient(manifold, p)?;
        Ok(rgrad * (lambda * lambda))
    }

    /// grad f(p) = −mean_i log_p(x_i)
    fn riemannian_gradient(&self, manifold: &PoincareBall, p: &Array1<f64>) -> Result<Array1<f64>> {
        let mut grad = Array1::zeros(p.len());
        for x in self.points {
            grad -= &manifold.log(p, x)?;
        }
        Ok(grad / self.points.len() as f64)
    }
}

/// Fréchet (Karcher) mean of points in the ball
///
/// Starts from the tangent-space mean at the origin and refines it with
/// Riemannian gradient descent using the exponential map and Armijo
/// backtracking.
pub fn frechet_mean(points: &[Array1<f64>]) -> Result<Array1<f64>> {
    let first = points.first().ok_or(Error::EmptyData)?;
    let manifold = PoincareBall::new(first.len());
    for p in points {
        manifold.validate_point(p)?;
    }

    let mut tangent_sum = Array1::zeros(first.len());
    for p in points {
        tangent_sum += &log0(p);
    }
    let start = project(&exp0(&(tangent_sum / points.len() as f64)));

    let optimizer = RiemannianGradientDescent::new()
        .with_line_search(LineSearch::default())
        .with_retraction(RetractionMethod::Exponential)
        .with_convergence(Convergence {
            max_iterations: 100,
            grad_tol: 1e-10,
            f_tol: 1e-14,
            step_tol: 1e-12,
        });

    let result = optimizer.minimize(&manifold, &FrechetObjective { points }, start)?;
    Ok(result.point)
}
