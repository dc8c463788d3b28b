use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::core::{Manifold, Result, TrainingData, Vector};
use crate::manifolds::poincare::{
    defect_from_sides, distance, distance_gradient, heron_area, triangle_sides,
};
use crate::manifolds::Euclidean;

/// Weight of the geometric terms in the composite loss
pub const GEOMETRIC_WEIGHT: f64 = 0.1;

/// Norm above which embeddings are penalised
pub const BOUNDARY_NORM: f64 = 0.99;

/// Excess below this is rounding noise, not a violation
const NORM_TOLERANCE: f64 = 1e-9;

/// Individual loss terms of one example
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossBreakdown {
    pub task: f64,
    pub boundary: f64,
    pub geodesic: f64,
    pub curvature: f64,
}

impl LossBreakdown {
    pub fn geometric(&self) -> f64 {
        self.boundary + self.geodesic + self.curvature
    }

    pub fn total(&self) -> f64 {
        self.task + GEOMETRIC_WEIGHT * self.geometric()
    }

    pub fn is_finite(&self) -> bool {
        self.total().is_finite()
    }
}

/// Side lengths, defect and area of one embedding triangle
#[derive(Debug, Clone, Copy)]
pub struct TriangleSample {
    pub defect: f64,
    pub area: f64,
}

/// Composite loss for a configured curvature:
/// `task + GEOMETRIC_WEIGHT * (boundary + geodesic + curvature)`
///
/// Gradients are closed-form Euclidean gradients with respect to the output
/// embeddings. The curvature term is reported but contributes no gradient.
#[derive(Debug, Clone, Copy)]
pub struct CompositeLoss {
    curvature: f64,
}

impl CompositeLoss {
    pub fn new(curvature: f64) -> Self {
        CompositeLoss { curvature }
    }

    pub fn evaluate(&self, embeddings: &[Vector], data: &TrainingData) -> Result<LossBreakdown> {
        Ok(self.evaluate_with_triangles(embeddings, data)?.0)
    }

    /// Loss terms together with the triangle samples behind the curvature term
    pub fn evaluate_with_triangles(
        &self,
        embeddings: &[Vector],
        data: &TrainingData,
    ) -> Result<(LossBreakdown, Vec<TriangleSample>)> {
        let triangles = triangle_samples(embeddings)?;
        let breakdown = LossBreakdown {
            task: task_loss(embeddings, data.labels.as_deref()),
            boundary: boundary_loss(embeddings),
            geodesic: geodesic_loss(embeddings, &data.edges)?,
            curvature: curvature_loss(&triangles, self.curvature),
        };
        Ok((breakdown, triangles))
    }

    /// Euclidean gradient of the total loss at every embedding
    pub fn gradients(
        &self,
        embeddings: &[Vector],
        data: &TrainingData,
    ) -> Result<Vec<Array1<f64>>> {
        let n = embeddings.len();
        let mut grads: Vec<Array1<f64>> = embeddings
            .iter()
            .map(|e| Array1::zeros(e.dim()))
            .collect();

        if let Some(labels) = data.labels.as_deref() {
            for ((grad, e), label) in grads.iter_mut().zip(embeddings).zip(labels) {
                let norm = e.norm();
                if norm > 0.0 {
                    let coeff = 2.0 * (norm - label) / (n as f64 * norm);
                    grad.scaled_add(coeff, e.data());
                }
            }
        }

        for (grad, e) in grads.iter_mut().zip(embeddings) {
            let norm = e.norm();
            if norm - BOUNDARY_NORM > NORM_TOLERANCE {
                grad.scaled_add(GEOMETRIC_WEIGHT / (n as f64 * norm), e.data());
            }
        }

        if !data.edges.is_empty() {
            let euclidean = Euclidean::new(embeddings[0].dim());
            let weight = GEOMETRIC_WEIGHT / data.edges.len() as f64;
            for &(a, b) in &data.edges {
                if a == b {
                    continue;
                }
                let (u, v) = (embeddings[a].data(), embeddings[b].data());
                let d_e = euclidean.distance(u, v)?;
                if d_e < 1e-12 {
                    continue;
                }
                let gap = distance(u, v)? - d_e;
                let sign = gap.signum();

                let diff = u - v;
                let grad_u = (distance_gradient(u, v) - &diff / d_e) * (sign * weight);
                let grad_v = (distance_gradient(v, u) + &diff / d_e) * (sign * weight);
                grads[a] += &grad_u;
                grads[b] += &grad_v;
            }
        }

        Ok(grads)
    }
}

/// Mean squared error between embedding norms and labels; zero when unlabelled
pub fn task_loss(embeddings: &[Vector], labels: Option<&[f64]>) -> f64 {
    match labels {
        Some(labels) if !embeddings.is_empty() => {
            let sum: f64 = embeddings
                .iter()
                .zip(labels)
                .map(|(e, label)| (e.norm() - label).powi(2))
                .sum();
            sum / embeddings.len() as f64
        }
        _ => 0.0,
    }
}

/// Mean excess of embedding norms over `BOUNDARY_NORM`
pub fn boundary_loss(embeddings: &[Vector]) -> f64 {
    if embeddings.is_empty() {
        return 0.0;
    }
    let sum: f64 = embeddings
        .iter()
        .map(|e| e.norm() - BOUNDARY_NORM)
        .filter(|excess| *excess > NORM_TOLERANCE)
        .sum();
    sum / embeddings.len() as f64
}

/// Mean gap between hyperbolic and Euclidean edge lengths
pub fn geodesic_loss(embeddings: &[Vector], edges: &[(usize, usize)]) -> Result<f64> {
    if edges.is_empty() || embeddings.is_empty() {
        return Ok(0.0);
    }
    let euclidean = Euclidean::new(embeddings[0].dim());
    let mut sum = 0.0;
    for &(a, b) in edges {
        let (u, v) = (embeddings[a].data(), embeddings[b].data());
        sum += (distance(u, v)? - euclidean.distance(u, v)?).abs();
    }
    Ok(sum / edges.len() as f64)
}

/// Defect and Heron area of every triangle of three embeddings
pub fn triangle_samples(embeddings: &[Vector]) -> Result<Vec<TriangleSample>> {
    let n = embeddings.len();
    let mut samples = Vec::new();
    for i in 0..n {
        for j in i + 1..n {
            for k in j + 1..n {
                let sides = triangle_sides(
                    embeddings[i].data(),
                    embeddings[j].data(),
                    embeddings[k].data(),
                )?;
                samples.push(TriangleSample {
                    defect: defect_from_sides(sides),
                    area: heron_area(sides),
                });
            }
        }
    }
    Ok(samples)
}

/// Mean deviation of triangle defects from `curvature * area`
///
/// `area` is the Heron area of the geodesic side lengths (see `heron_area`),
/// which stands in for the true hyperbolic area. For a hyperbolic triangle
/// Gauss-Bonnet gives `defect = -area_H` exactly, so this term is only zero
/// at curvature -1 in the small-triangle limit.
pub fn curvature_loss(triangles: &[TriangleSample], curvature: f64) -> f64 {
    if triangles.is_empty() {
        return 0.0;
    }
    let sum: f64 = triangles
        .iter()
        .map(|t| (t.defect - curvature * t.area).abs())
        .sum();
    sum / triangles.len() as f64
}

/// Least-squares curvature explaining the observed defects
///
/// argmin_K Σ (defect − K·area)²
pub fn fit_curvature(triangles: &[TriangleSample]) -> Option<f64> {
    let area_sq: f64 = triangles.iter().map(|t| t.area * t.area).sum();
    if area_sq <= 1e-24 {
        return None;
    }
    let cross: f64 = triangles.iter().map(|t| t.defect * t.area).sum();
    Some(cross / area_sq)
}

/// Fraction of nodes whose embedding norm lies within 0.5 of the label
pub fn accuracy(embeddings: &[Vector], labels: Option<&[f64]>) -> Option<f64> {
    let labels = labels?;
    if embeddings.is_empty() {
        return None;
    }
    let hits = embeddings
        .iter()
        .zip(labels)
        .filter(|(e, label)| (e.norm() - *label).abs() < 0.5)
        .count();
    Some(hits as f64 / embeddings.len() as f64)
}
