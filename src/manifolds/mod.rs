pub mod euclidean;
pub mod poincare;

pub use euclidean::Euclidean;
pub use poincare::PoincareBall;
