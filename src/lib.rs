pub mod data;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod io;
pub mod model;
pub mod opt;
pub mod pretrain;
pub mod progress;
pub mod spectrum;
pub mod utils;

pub use engine::{HmmEngine, InferenceEngine};
pub use error::EstimateError;
pub use estimator::{Estimator, EstimatorConfig, RunConfig};
pub use model::DemographicModel;
