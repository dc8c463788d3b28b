use ndarray::Array1;

use crate::core::{Error, Manifold, Result};

/// Euclidean space R^n with standard metric
///
/// Serves as the flat reference geometry: the network switches to it in
/// euclidean mode, and geodesic preservation compares against it.
pub struct Euclidean {
    dim: usize,
}

impl Euclidean {
    pub fn new(dim: usize) -> Self {
        Euclidean { dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

impl Manifold for Euclidean {
    type Point = Array1<f64>;
    type Vector = Array1<f64>;
    type Scalar = f64;

    /// Exponential map: simple addition in Euclidean space (unchecked)
    fn exp_unchecked(&self, p: &Self::Point, x: &Self::Vector) -> Self::Point {
        p + x
    }

    /// Logarithmic map: simple subtraction in Euclidean space (unchecked)
    fn log_unchecked(&self, p: &Self::Point, q: &Self::Point) -> Self::Vector {
        q - p
    }

    /// Standard Euclidean metric: g(x, y) = x^T y
    fn metric(&self, _p: &Self::Point, x: &Self::Vector, y: &Self::Vector) -> Self::Scalar {
        x.dot(y)
    }

    /// Distance is Euclidean norm
    fn distance(&self, p: &Self::Point, q: &Self::Point) -> Result<Self::Scalar> {
        self.validate_point(p)?;
        self.validate_point(q)?;
        let diff = q - p;
        Ok(diff.dot(&diff).sqrt())
    }

    fn validate_point(&self, p: &Self::Point) -> Result<()> {
        if p.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                got: p.len(),
            });
        }
        Ok(())
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
