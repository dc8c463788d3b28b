pub mod insights;
pub mod loss;
pub mod optimization;

pub use insights::{GeometricInsights, TopologicalFeatures};
pub use loss::{CompositeLoss, LossBreakdown};
pub use optimization::{
    ObjectiveFunction, OptimizationResult, RetractionMethod, RiemannianGradientDescent,
};
