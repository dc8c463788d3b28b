use num_traits::Float;

use crate::core::error::Result;

/// Core trait for a Riemannian manifold
/// All manifolds are assumed to be smooth
#[must_use]
pub trait Manifold {
    /// Point on the manifold
    type Point;

    /// Tangent vector at a point
    type Vector;

    /// Scalar field (f64 or f32)
    type Scalar: Float;

    /// Exponential map: TpM → M (unchecked, assumes valid input)
    ///
    /// Maps tangent vector x at point p to a point on the manifold.
    fn exp_unchecked(&self, p: &Self::Point, x: &Self::Vector) -> Self::Point;

    /// Exponential map with validation
    fn exp(&self, p: &Self::Point, x: &Self::Vector) -> Result<Self::Point> {
        self.validate_point(p)?;
        self.validate_vector(p, x)?;
        Ok(self.exp_unchecked(p, x))
    }

    /// Logarithmic map: M → TpM (unchecked, assumes valid input)
    ///
    /// Inverse of exp: finds tangent vector from p to q.
    fn log_unchecked(&self, p: &Self::Point, q: &Self::Point) -> Self::Vector;

    /// Logarithmic map with validation
    fn log(&self, p: &Self::Point, q: &Self::Point) -> Result<Self::Vector> {
        self.validate_point(p)?;
        self.validate_point(q)?;
        Ok(self.log_unchecked(p, q))
    }

    /// Riemannian metric: g_p(x, y) for x, y ∈ TpM
    fn metric(&self, p: &Self::Point, x: &Self::Vector, y: &Self::Vector) -> Self::Scalar;

    /// Riemannian distance between two points
    fn distance(&self, p: &Self::Point, q: &Self::Point) -> Result<Self::Scalar> {
        let x = self.log(p, q)?;
        Ok(self.metric(p, &x, &x).sqrt())
    }

    /// Project a point onto the manifold (for constraints)
    fn project(&self, p: &Self::Point) -> Result<Self::Point>
    where
        Self::Point: Clone,
    {
        Ok(p.clone())
    }

    /// Convert a Euclidean gradient at p into the Riemannian gradient
    ///
    /// Identity for flat metrics; conformal manifolds rescale by the inverse metric.
    fn egrad_to_rgrad(&self, _p: &Self::Point, egrad: &Self::Vector) -> Result<Self::Vector>
    where
        Self::Vector: Clone,
    {
        Ok(egrad.clone())
    }

    /// Validate that a point lies on the manifold
    ///
    /// Default implementation is optimistic (always returns Ok).
    fn validate_point(&self, _p: &Self::Point) -> Result<()> {
        Ok(())
    }

    /// Validate that a vector is in the tangent space at p
    ///
    /// Default implementation is optimistic (always returns Ok).
    fn validate_vector(&self, _p: &Self::Point, _x: &Self::Vector) -> Result<()> {
        Ok(())
    }
}
