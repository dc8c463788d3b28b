use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};

/// Immutable fixed-length real vector
///
/// Embeddings produced by this crate always satisfy `norm() < 1`. Every
/// transform returns a new `Vector`; nothing mutates in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    data: Array1<f64>,
}

impl Vector {
    pub fn new(data: Vec<f64>) -> Self {
        Vector {
            data: Array1::from(data),
        }
    }

    pub fn zeros(dim: usize) -> Self {
        Vector {
            data: Array1::zeros(dim),
        }
    }

    pub fn dim(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &Array1<f64> {
        &self.data
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.data.to_vec()
    }

    /// Euclidean norm of the coordinates
    pub fn norm(&self) -> f64 {
        self.data.dot(&self.data).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }

    /// Fails with `NumericalInstability` if any coordinate is NaN or infinite
    pub fn ensure_finite(&self, context: &str) -> Result<()> {
        if self.is_finite() {
            Ok(())
        } else {
            Err(Error::NumericalInstability(format!(
                "non-finite coordinate in {}",
                context
            )))
        }
    }
}

impl From<Array1<f64>> for Vector {
    fn from(data: Array1<f64>) -> Self {
        Vector { data }
    }
}

impl From<Vec<f64>> for Vector {
    fn from(data: Vec<f64>) -> Self {
        Vector::new(data)
    }
}

impl AsRef<Array1<f64>> for Vector {
    fn as_ref(&self) -> &Array1<f64> {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_vector_norm_and_dim() {
        let v = Vector::new(vec![0.3, 0.4]);
        assert_eq!(v.dim(), 2);
        assert_relative_eq!(v.norm(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_vector_finiteness() {
        let v = Vector::new(vec![0.1, f64::NAN]);
        assert!(!v.is_finite());
        assert!(matches!(
            v.ensure_finite("test"),
            Err(Error::NumericalInstability(_))
        ));
        assert!(Vector::zeros(3).ensure_finite("test").is_ok());
    }
}
