use ndarray::{s, Array1, Array2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::algorithms::optimization::sgd_step;
use crate::core::{Error, Result, Vector};
use crate::layers::{ball_inputs, finite_output, outer, xavier, LayerConfig};
use crate::manifolds::poincare::{
    distance, distance_gradient, exp0, exp0_vjp, log0, log0_vjp, project,
};

/// How query/key pairs are scored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AttentionScore {
    /// Negative hyperbolic distance between per-head query and key points,
    /// scaled by `1/√head_dim`
    #[default]
    Distance,
    /// Scaled dot product of the tangent-space projections
    TangentDot,
}

/// Intermediates of the last recorded forward pass
#[derive(Debug, Clone, Default)]
struct AttentionTrace {
    inputs: Vec<Array1<f64>>,
    tangents: Vec<Array1<f64>>,
    queries: Vec<Array1<f64>>,
    keys: Vec<Array1<f64>>,
    values: Vec<Array1<f64>>,
    /// `weights[h][i][j]`: share of node j in node i's aggregate for head h
    weights: Vec<Vec<Vec<f64>>>,
    aggregated: Vec<Array1<f64>>,
}

#[derive(Debug, Clone)]
struct AttentionGrads {
    query: Array2<f64>,
    key: Array2<f64>,
    value: Array2<f64>,
}

/// Multi-head attention over all points of a set
///
/// Queries, keys and values are linear maps of `log0(x)`. Per head, softmax
/// weights aggregate the value slices in the tangent space at the origin (an
/// approximate Fréchet mean) before mapping back with `exp0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperbolicAttention {
    num_heads: usize,
    head_dim: usize,
    query: Array2<f64>,
    key: Array2<f64>,
    value: Array2<f64>,
    score: AttentionScore,
    learning_rate: f64,
    #[serde(skip)]
    trace: AttentionTrace,
    #[serde(skip)]
    grads: Option<AttentionGrads>,
}

impl HyperbolicAttention {
    pub fn new<R: Rng + ?Sized>(config: &LayerConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let dim = config.input_dim;
        let num_heads = config.num_heads.unwrap_or(1);

        if config.output_dim != dim {
            return Err(Error::Configuration(format!(
                "attention output dimension {} must equal input dimension {}",
                config.output_dim, dim
            )));
        }
        if dim % num_heads != 0 {
            return Err(Error::Configuration(format!(
                "embedding dimension {} is not divisible by {} heads",
                dim, num_heads
            )));
        }

        Ok(HyperbolicAttention {
            num_heads,
            head_dim: dim / num_heads,
            query: xavier(dim, dim, rng)?,
            key: xavier(dim, dim, rng)?,
            value: xavier(dim, dim, rng)?,
            score: AttentionScore::default(),
            learning_rate: config.learning_rate,
            trace: AttentionTrace::default(),
            grads: None,
        })
    }

    pub fn with_score(mut self, score: AttentionScore) -> Self {
        self.score = score;
        self
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn dim(&self) -> usize {
        self.num_heads * self.head_dim
    }

    pub fn value(&self) -> &Array2<f64> {
        &self.value
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    /// Attend over all inputs; `record` keeps what `backward` needs
    pub fn forward(&mut self, inputs: &[Vector], record: bool) -> Result<Vec<Vector>> {
        let points = ball_inputs(inputs, self.dim())?;
        let tangents: Vec<Array1<f64>> = points.iter().map(|x| log0(x)).collect();

        let queries: Vec<Array1<f64>> = tangents.iter().map(|t| self.query.dot(t)).collect();
        let keys: Vec<Array1<f64>> = tangents.iter().map(|t| self.key.dot(t)).collect();
        let values: Vec<Array1<f64>> = tangents.iter().map(|t| self.value.dot(t)).collect();

        let mut aggregated = vec![Array1::<f64>::zeros(self.dim()); points.len()];
        let mut head_weights = Vec::with_capacity(self.num_heads);
        for h in 0..self.num_heads {
            let (start, end) = self.head_range(h);
            let q_heads: Vec<Array1<f64>> =
                queries.iter().map(|q| q.slice(s![start..end]).to_owned()).collect();
            let k_heads: Vec<Array1<f64>> =
                keys.iter().map(|k| k.slice(s![start..end]).to_owned()).collect();

            let mut rows = Vec::with_capacity(points.len());
            for (i, q) in q_heads.iter().enumerate() {
                let scores = k_heads
                    .iter()
                    .map(|k| self.pair_score(q, k))
                    .collect::<Result<Vec<f64>>>()?;
                let weights = softmax(&scores)?;

                let mut out = aggregated[i].slice_mut(s![start..end]);
                for (w, v) in weights.iter().zip(&values) {
                    out.scaled_add(*w, &v.slice(s![start..end]));
                }
                rows.push(weights);
            }
            head_weights.push(rows);
        }

        let outputs = aggregated
            .iter()
            .map(|t| finite_output(project(&exp0(t)), "hyperbolic attention"))
            .collect::<Result<Vec<Vector>>>()?;

        self.trace = if record {
            AttentionTrace {
                inputs: points.into_iter().cloned().collect(),
                tangents,
                queries,
                keys,
                values,
                weights: head_weights,
                aggregated,
            }
        } else {
            AttentionTrace::default()
        };
        Ok(outputs)
    }

    /// Accumulate Q/K/V gradients and return gradients w.r.t. the input points
    ///
    /// Gradients flow through the value aggregation and through the softmax
    /// into the scores. The projection clamp is treated as identity.
    pub fn backward(&mut self, grad_outputs: &[Array1<f64>]) -> Result<Vec<Array1<f64>>> {
        let n = self.trace.inputs.len();
        if grad_outputs.len() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                got: grad_outputs.len(),
            });
        }

        let dim = self.dim();
        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let trace = &self.trace;

        let grad_aggregated: Vec<Array1<f64>> = trace
            .aggregated
            .iter()
            .zip(grad_outputs)
            .map(|(a, g)| exp0_vjp(a, g))
            .collect();

        let mut grad_q = vec![Array1::<f64>::zeros(dim); n];
        let mut grad_k = vec![Array1::<f64>::zeros(dim); n];
        let mut grad_v = vec![Array1::<f64>::zeros(dim); n];

        for h in 0..self.num_heads {
            let (start, end) = self.head_range(h);
            for i in 0..n {
                let upstream = grad_aggregated[i].slice(s![start..end]);
                let weights = &trace.weights[h][i];

                // dL/dw_ij and its softmax-weighted mean
                let grad_w: Vec<f64> = trace
                    .values
                    .iter()
                    .map(|v| upstream.dot(&v.slice(s![start..end])))
                    .collect();
                let mean: f64 = weights.iter().zip(&grad_w).map(|(w, g)| w * g).sum();

                let q = trace.queries[i].slice(s![start..end]).to_owned();
                for j in 0..n {
                    let w = weights[j];
                    grad_v[j]
                        .slice_mut(s![start..end])
                        .scaled_add(w, &upstream);

                    let grad_score = w * (grad_w[j] - mean) * scale;
                    if grad_score == 0.0 {
                        continue;
                    }
                    let k = trace.keys[j].slice(s![start..end]).to_owned();
                    let (dq, dk) = self.score_gradients(&q, &k);
                    grad_q[i].slice_mut(s![start..end]).scaled_add(grad_score, &dq);
                    grad_k[j].slice_mut(s![start..end]).scaled_add(grad_score, &dk);
                }
            }
        }

        let acc = self.grads.get_or_insert_with(|| AttentionGrads {
            query: Array2::zeros((dim, dim)),
            key: Array2::zeros((dim, dim)),
            value: Array2::zeros((dim, dim)),
        });
        let mut grad_inputs = Vec::with_capacity(n);
        for i in 0..n {
            let t = &trace.tangents[i];
            acc.query += &outer(&grad_q[i], t);
            acc.key += &outer(&grad_k[i], t);
            acc.value += &outer(&grad_v[i], t);

            let grad_t = self.query.t().dot(&grad_q[i])
                + self.key.t().dot(&grad_k[i])
                + self.value.t().dot(&grad_v[i]);
            grad_inputs.push(log0_vjp(&trace.inputs[i], &grad_t));
        }
        Ok(grad_inputs)
    }

    /// Apply accumulated gradients (averaged over `count` examples) and reset them
    ///
    /// Returns the largest pre-clip gradient norm of the three projections.
    pub fn apply_gradients(&mut self, count: usize, max_grad_norm: f64) -> Result<f64> {
        let Some(grads) = self.grads.take() else {
            return Ok(0.0);
        };
        let scale = 1.0 / count.max(1) as f64;
        let lr = self.learning_rate;

        let q = sgd_step(&mut self.query, &(grads.query * scale), lr, max_grad_norm)?;
        let k = sgd_step(&mut self.key, &(grads.key * scale), lr, max_grad_norm)?;
        let v = sgd_step(&mut self.value, &(grads.value * scale), lr, max_grad_norm)?;
        Ok(q.max(k).max(v))
    }

    fn head_range(&self, head: usize) -> (usize, usize) {
        (head * self.head_dim, (head + 1) * self.head_dim)
    }

    fn pair_score(&self, q: &Array1<f64>, k: &Array1<f64>) -> Result<f64> {
        let scale = 1.0 / (self.head_dim as f64).sqrt();
        match self.score {
            AttentionScore::Distance => {
                let qp = project(&exp0(q));
                let kp = project(&exp0(k));
                Ok(-distance(&qp, &kp)? * scale)
            }
            AttentionScore::TangentDot => Ok(q.dot(k) * scale),
        }
    }

    /// Gradients of the unscaled score with respect to the query and key slices
    fn score_gradients(&self, q: &Array1<f64>, k: &Array1<f64>) -> (Array1<f64>, Array1<f64>) {
        match self.score {
            AttentionScore::Distance => {
                let qp = project(&exp0(q));
                let kp = project(&exp0(k));
                (
                    -exp0_vjp(q, &distance_gradient(&qp, &kp)),
                    -exp0_vjp(k, &distance_gradient(&kp, &qp)),
                )
            }
            AttentionScore::TangentDot => (k.clone(), q.clone()),
        }
    }

    pub fn load(&mut self, other: &HyperbolicAttention) -> Result<()> {
        if self.num_heads != other.num_heads || self.query.dim() != other.query.dim() {
            return Err(Error::Configuration(format!(
                "attention with {} heads of width {} cannot replace {} heads of width {}",
                other.num_heads, other.head_dim, self.num_heads, self.head_dim
            )));
        }
        self.query.assign(&other.query);
        self.key.assign(&other.key);
        self.value.assign(&other.value);
        self.score = other.score;
        Ok(())
    }
}

/// Numerically stable softmax
fn softmax(scores: &[f64]) -> Result<Vec<f64>> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return Err(Error::NumericalInstability(
            "non-finite attention score".to_string(),
        ));
    }
    let exp: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum = exp.iter().sum::<f64>().max(1e-12);
    Ok(exp.into_iter().map(|e| e / sum).collect())
}
