pub mod algorithms;
pub mod core;
pub mod layers;
pub mod manifolds;
pub mod network;

// Flat re-exports for convenience
pub use core::{DataSource, Error, Manifold, Result, TrainingData, Vector};

// Re-export manifold types
pub use manifolds::{Euclidean, PoincareBall};

// Re-export optimization types
pub use algorithms::optimization::{
    Convergence, LineSearch, ObjectiveFunction, OptimizationResult, RetractionMethod,
    RiemannianGradientDescent,
};

pub use algorithms::{GeometricInsights, TopologicalFeatures};
pub use layers::{
    HyperbolicAttention, HyperbolicBatchNorm, HyperbolicDropout, HyperbolicLinear,
    HyperbolicMessagePassing, LayerConfig,
};
pub use network::{
    GeometryMode, HyperbolicNetwork, ModelState, NetworkConfig, Prediction, TrainOverrides,
    TrainingHistoryEntry,
};

/// Convenience re-exports for common use cases
pub mod prelude {
    pub use crate::core::{DataSource, Error, Manifold, Result, TrainingData, Vector};
    pub use crate::manifolds::poincare::{distance, exp0, log0, mobius_add, project};
    pub use crate::manifolds::{Euclidean, PoincareBall};
    pub use crate::network::{GeometryMode, HyperbolicNetwork, NetworkConfig, Prediction};
}
