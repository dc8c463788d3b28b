use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};
use crate::core::vector::Vector;

/// Graph-structured training input supplied by a collaborator
///
/// Node vectors are expected to lie inside or near the Poincaré ball; they are
/// projected before use rather than rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingData {
    pub nodes: Vec<Vector>,
    pub edges: Vec<(usize, usize)>,
    pub labels: Option<Vec<f64>>,
    pub hyperedges: Option<Vec<Vec<usize>>>,
}

impl TrainingData {
    pub fn new(nodes: Vec<Vector>, edges: Vec<(usize, usize)>) -> Self {
        TrainingData {
            nodes,
            edges,
            labels: None,
            hyperedges: None,
        }
    }

    pub fn with_labels(mut self, labels: Vec<f64>) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn with_hyperedges(mut self, hyperedges: Vec<Vec<usize>>) -> Self {
        self.hyperedges = Some(hyperedges);
        self
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check index, label and dimension invariants
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::EmptyData);
        }
        let len = self.nodes.len();

        let dim = self.nodes[0].dim();
        for node in &self.nodes {
            if node.dim() != dim {
                return Err(Error::DimensionMismatch {
                    expected: dim,
                    got: node.dim(),
                });
            }
        }

        for &(a, b) in &self.edges {
            for index in [a, b] {
                if index >= len {
                    return Err(Error::Index { index, len });
                }
            }
        }

        if let Some(hyperedges) = &self.hyperedges {
            for &index in hyperedges.iter().flatten() {
                if index >= len {
                    return Err(Error::Index { index, len });
                }
            }
        }

        if let Some(labels) = &self.labels {
            if labels.len() != len {
                return Err(Error::LabelMismatch {
                    labels: labels.len(),
                    nodes: len,
                });
            }
        }

        Ok(())
    }

    /// Undirected neighbour lists; hyperedges are expanded into cliques
    ///
    /// Self-loops and duplicate pairs are dropped. Assumes `validate` passed.
    pub fn adjacency(&self) -> Vec<Vec<usize>> {
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        let mut link = |a: usize, b: usize| {
            if a != b && !adjacency[a].contains(&b) {
                adjacency[a].push(b);
                adjacency[b].push(a);
            }
        };

        for &(a, b) in &self.edges {
            link(a, b);
        }
        if let Some(hyperedges) = &self.hyperedges {
            for members in hyperedges {
                for (i, &a) in members.iter().enumerate() {
                    for &b in &members[i + 1..] {
                        link(a, b);
                    }
                }
            }
        }

        adjacency
    }
}

/// Capability of an external collaborator to supply training graphs
pub trait DataSource {
    fn training_data(&self) -> Result<Vec<TrainingData>>;
}
