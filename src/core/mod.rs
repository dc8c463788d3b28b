pub mod data;
pub mod error;
pub mod traits;
pub mod vector;

pub use data::{DataSource, TrainingData};
pub use error::{Error, Result};
pub use traits::Manifold;
pub use vector::Vector;
