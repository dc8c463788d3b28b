use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::algorithms::optimization::ArrayManifold;
use crate::core::{Error, Result, Vector};
use crate::manifolds::poincare::frechet_mean;

/// One class of the persistence diagram; `death == None` never dies
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersistencePair {
    pub birth: f64,
    pub death: Option<f64>,
    pub dimension: usize,
}

/// Topology of the neighbourhood graph linking every pair closer than the
/// mean pairwise distance
///
/// Betti numbers describe that graph's 1-skeleton. The persistence diagram
/// covers dimension 0 only, from the single-linkage filtration; higher
/// dimensions are not computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologicalFeatures {
    /// (b0, b1) of the neighbourhood graph
    pub betti_numbers: (usize, usize),
    pub persistent_homology: Vec<PersistencePair>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometricInsights {
    pub curvature: f64,
    /// Largest finite pairwise distance
    pub hierarchy_depth: f64,
    pub clustering_coefficient: f64,
    pub geodesic_distances: Array2<f64>,
    pub topological_features: TopologicalFeatures,
    /// Fréchet mean of the embeddings
    pub centroid: Vector,
}

/// Summarise `embeddings` under the metric of `manifold`
pub fn compute<M: ArrayManifold>(
    manifold: &M,
    embeddings: &[Vector],
    curvature: f64,
) -> Result<GeometricInsights> {
    if embeddings.is_empty() {
        return Err(Error::EmptyData);
    }

    let distances = distance_matrix(manifold, embeddings)?;
    let n = embeddings.len();

    let hierarchy_depth = distances
        .iter()
        .copied()
        .filter(|d| d.is_finite())
        .fold(0.0, f64::max);

    let threshold = mean_off_diagonal(&distances);
    let neighbours: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            (0..n)
                .filter(|&j| j != i && distances[[i, j]] <= threshold)
                .collect()
        })
        .collect();

    let points: Vec<_> = embeddings.iter().map(|e| e.data().clone()).collect();

    Ok(GeometricInsights {
        curvature,
        hierarchy_depth,
        clustering_coefficient: clustering_coefficient(&neighbours, &distances, threshold),
        topological_features: TopologicalFeatures {
            betti_numbers: betti_numbers(&neighbours),
            persistent_homology: zero_dim_persistence(&distances),
        },
        geodesic_distances: distances,
        centroid: Vector::from(frechet_mean(&points)?),
    })
}

/// Symmetric matrix of pairwise manifold distances
pub fn distance_matrix<M: ArrayManifold>(
    manifold: &M,
    embeddings: &[Vector],
) -> Result<Array2<f64>> {
    let n = embeddings.len();
    let mut distances = Array2::zeros((n, n));
    for i in 0..n {
        for j in i + 1..n {
            let d = manifold.distance(embeddings[i].data(), embeddings[j].data())?;
            distances[[i, j]] = d;
            distances[[j, i]] = d;
        }
    }
    Ok(distances)
}

fn mean_off_diagonal(distances: &Array2<f64>) -> f64 {
    let n = distances.nrows();
    if n < 2 {
        return 0.0;
    }
    distances.sum() / (n * (n - 1)) as f64
}

fn clustering_coefficient(
    neighbours: &[Vec<usize>],
    distances: &Array2<f64>,
    threshold: f64,
) -> f64 {
    let mut total = 0.0;
    let mut counted = 0usize;

    for adj in neighbours.iter().filter(|adj| adj.len() >= 2) {
        let possible = adj.len() * (adj.len() - 1) / 2;
        let mut closed = 0usize;
        for (a, &j) in adj.iter().enumerate() {
            for &k in &adj[a + 1..] {
                if distances[[j, k]] <= threshold {
                    closed += 1;
                }
            }
        }
        total += closed as f64 / possible as f64;
        counted += 1;
    }

    if counted == 0 {
        0.0
    } else {
        total / counted as f64
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        UnionFind {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = i;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Returns false when both already share a component
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        self.parent[rb] = ra;
        true
    }
}

/// b0 = connected components, b1 = E − V + b0 (cycle rank)
fn betti_numbers(neighbours: &[Vec<usize>]) -> (usize, usize) {
    let n = neighbours.len();
    let mut components = UnionFind::new(n);
    let mut edges = 0usize;
    let mut b0 = n;

    for (i, adj) in neighbours.iter().enumerate() {
        for &j in adj.iter().filter(|&&j| j > i) {
            edges += 1;
            if components.union(i, j) {
                b0 -= 1;
            }
        }
    }

    (b0, edges + b0 - n)
}

/// Births at 0, deaths at the distance where single linkage merges components
fn zero_dim_persistence(distances: &Array2<f64>) -> Vec<PersistencePair> {
    let n = distances.nrows();
    let mut pairs: Vec<(f64, usize, usize)> = Vec::with_capacity(n * n.saturating_sub(1) / 2);
    for i in 0..n {
        for j in i + 1..n {
            pairs.push((distances[[i, j]], i, j));
        }
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut components = UnionFind::new(n);
    let mut diagram = Vec::with_capacity(n);
    for (d, i, j) in pairs {
        if components.union(i, j) {
            diagram.push(PersistencePair {
                birth: 0.0,
                death: Some(d),
                dimension: 0,
            });
        }
    }
    diagram.push(PersistencePair {
        birth: 0.0,
        death: None,
        dimension: 0,
    });
    diagram
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifolds::{Euclidean, PoincareBall};
    use approx::assert_relative_eq;

    fn square() -> Vec<Vector> {
        vec![
            Vector::new(vec![0.3, 0.3]),
            Vector::new(vec![-0.3, 0.3]),
            Vector::new(vec![-0.3, -0.3]),
            Vector::new(vec![0.3, -0.3]),
        ]
    }

    #[test]
    fn test_distance_matrix_symmetric() {
        let d = distance_matrix(&PoincareBall::new(2), &square()).unwrap();
        for i in 0..4 {
            assert_eq!(d[[i, i]], 0.0);
            for j in 0..4 {
                assert_eq!(d[[i, j]], d[[j, i]]);
            }
        }
    }

    #[test]
    fn test_square_insights() {
        let insights = compute(&PoincareBall::new(2), &square(), -1.0).unwrap();

        // diagonals are longer than the mean distance, sides shorter
        assert_eq!(insights.topological_features.betti_numbers, (1, 1));
        assert_eq!(insights.clustering_coefficient, 0.0);
        assert!(insights.hierarchy_depth > 0.0);
        assert_relative_eq!(insights.centroid.norm(), 0.0, epsilon = 1e-8);

        let diagram = &insights.topological_features.persistent_homology;
        assert_eq!(diagram.len(), 4);
        assert_eq!(diagram.iter().filter(|p| p.death.is_none()).count(), 1);
    }

    #[test]
    fn test_euclidean_metric_depth() {
        let insights = compute(&Euclidean::new(2), &square(), 0.0).unwrap();
        assert_relative_eq!(insights.hierarchy_depth, (0.72f64).sqrt(), epsilon = 1e-12);
        assert_eq!(insights.curvature, 0.0);
    }

    #[test]
    fn test_triangle_is_fully_clustered() {
        let triangle = vec![
            Vector::new(vec![0.1, 0.0]),
            Vector::new(vec![0.0, 0.1]),
            Vector::new(vec![-0.1, 0.0]),
            Vector::new(vec![0.8, 0.5]),
        ];
        let insights = compute(&PoincareBall::new(2), &triangle, -1.0).unwrap();
        assert_relative_eq!(insights.clustering_coefficient, 1.0, epsilon = 1e-12);
        assert_eq!(insights.topological_features.betti_numbers, (2, 1));
    }

    #[test]
    fn test_empty_embeddings() {
        assert_eq!(
            compute(&PoincareBall::new(2), &[], -1.0),
            Err(Error::EmptyData)
        );
    }
}
