use ndarray::Array1;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result, Vector};
use crate::layers::{ball_inputs, HyperbolicLinear, LayerConfig};
use crate::manifolds::poincare::{exp0, log0, mobius_add, project};

/// Neighbour aggregation followed by a hyperbolic linear transform
///
/// Node i becomes `Linear(x_i ⊕ m_i)` where `m_i` is the tangent-space mean
/// of its neighbours mapped back into the ball. Isolated nodes use `m_i = 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperbolicMessagePassing {
    linear: HyperbolicLinear,
}

impl HyperbolicMessagePassing {
    pub fn new<R: Rng + ?Sized>(config: &LayerConfig, rng: &mut R) -> Result<Self> {
        Ok(HyperbolicMessagePassing {
            linear: HyperbolicLinear::new(config, rng)?,
        })
    }

    pub fn linear(&self) -> &HyperbolicLinear {
        &self.linear
    }

    pub fn linear_mut(&mut self) -> &mut HyperbolicLinear {
        &mut self.linear
    }

    pub fn forward(
        &mut self,
        inputs: &[Vector],
        adjacency: &[Vec<usize>],
        record: bool,
    ) -> Result<Vec<Vector>> {
        if adjacency.len() != inputs.len() {
            return Err(Error::DimensionMismatch {
                expected: inputs.len(),
                got: adjacency.len(),
            });
        }
        let points = ball_inputs(inputs, self.linear.input_dim())?;

        let mut combined = Vec::with_capacity(points.len());
        for (x, neighbours) in points.iter().zip(adjacency) {
            let message = aggregate(&points, neighbours)?;
            combined.push(Vector::from(mobius_add(x, &message)?));
        }

        self.linear.forward(&combined, record)
    }

    /// Backward through the linear transform; the Möbius combination is
    /// crossed straight-through to the node's own input.
    pub fn backward(&mut self, grad_outputs: &[Array1<f64>]) -> Result<Vec<Array1<f64>>> {
        self.linear.backward(grad_outputs)
    }

    pub fn load(&mut self, other: &HyperbolicMessagePassing) -> Result<()> {
        self.linear.load(&other.linear)
    }
}

fn aggregate(points: &[&Array1<f64>], neighbours: &[usize]) -> Result<Array1<f64>> {
    let dim = points.first().map(|p| p.len()).unwrap_or(0);
    if neighbours.is_empty() {
        return Ok(Array1::zeros(dim));
    }

    let mut tangent = Array1::<f64>::zeros(dim);
    for &j in neighbours {
        let neighbour = points.get(j).ok_or(Error::Index {
            index: j,
            len: points.len(),
        })?;
        tangent += &log0(neighbour);
    }
    tangent /= neighbours.len() as f64;
    Ok(project(&exp0(&tangent)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn layer() -> HyperbolicMessagePassing {
        let mut rng = StdRng::seed_from_u64(5);
        HyperbolicMessagePassing::new(&LayerConfig::new(3, 3, 0.01), &mut rng).unwrap()
    }

    fn nodes() -> Vec<Vector> {
        vec![
            Vector::new(vec![0.1, 0.0, 0.2]),
            Vector::new(vec![0.0, 0.3, -0.1]),
            Vector::new(vec![-0.2, 0.1, 0.0]),
        ]
    }

    #[test]
    fn test_outputs_inside_ball() {
        let mut mp = layer();
        let adjacency = vec![vec![1], vec![0, 2], vec![1]];
        let outputs = mp.forward(&nodes(), &adjacency, false).unwrap();
        assert_eq!(outputs.len(), 3);
        assert!(outputs.iter().all(|v| v.norm() < 1.0));
    }

    #[test]
    fn test_neighbours_change_output() {
        let mut mp = layer();
        let isolated = mp.forward(&nodes(), &[vec![], vec![], vec![]], false).unwrap();
        let linked = mp.forward(&nodes(), &[vec![1], vec![0], vec![]], false).unwrap();

        assert_ne!(isolated[0], linked[0]);
        assert_eq!(isolated[2], linked[2]);
    }

    #[test]
    fn test_invalid_neighbour_index() {
        let mut mp = layer();
        let result = mp.forward(&nodes(), &[vec![7], vec![], vec![]], false);
        assert!(matches!(result, Err(Error::Index { index: 7, len: 3 })));
    }

    #[test]
    fn test_adjacency_length_mismatch() {
        let mut mp = layer();
        assert!(mp.forward(&nodes(), &[vec![]], false).is_err());
    }
}
