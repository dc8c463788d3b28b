use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result, Vector};
use crate::layers::{ball_inputs, finite_output, LayerConfig};
use crate::manifolds::poincare::project;

/// Coordinate dropout with re-projection; identity outside training mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperbolicDropout {
    rate: f64,
    dim: usize,
    training: bool,
}

impl HyperbolicDropout {
    pub fn new(config: &LayerConfig) -> Result<Self> {
        config.validate()?;
        if config.output_dim != config.input_dim {
            return Err(Error::Configuration(
                "dropout must preserve dimension".to_string(),
            ));
        }
        Ok(HyperbolicDropout {
            rate: config.dropout.unwrap_or(0.0),
            dim: config.input_dim,
            training: true,
        })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn forward<R: Rng + ?Sized>(&self, inputs: &[Vector], rng: &mut R) -> Result<Vec<Vector>> {
        let points = ball_inputs(inputs, self.dim)?;
        if !self.training || self.rate == 0.0 {
            return Ok(inputs.to_vec());
        }

        let keep = 1.0 - self.rate;
        points
            .into_iter()
            .map(|x| {
                let dropped = x.mapv(|c| if rng.gen::<f64>() < self.rate { 0.0 } else { c / keep });
                finite_output(project(&dropped), "hyperbolic dropout")
            })
            .collect()
    }
}
