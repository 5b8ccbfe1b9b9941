pub mod math;
pub mod activation;
pub mod layers;
pub mod network;
pub mod loss;
pub mod optim;
pub mod model;
pub mod schedule;
pub mod data;
pub mod eval;
pub mod config;
pub mod train;
pub mod error;
pub mod logging;

// Convenience re-exports
pub use math::matrix::Matrix;
pub use activation::activation::ActivationFunction;
pub use config::{DataDescriptor, HyperParams, ImageSizes, RunConfig};
pub use error::{Error, Result};
pub use eval::{EvalOutput, EvalRequest, Evaluator, FitnessVector, HoldoutEvaluator};
pub use loss::{DetectionLoss, LossItems, LossOutput, SingleBoxLoss};
pub use model::{Detector, ModelEma, Precision};
pub use network::{ArchitectureSpec, DenseDetector};
pub use optim::Sgd;
pub use train::{Checkpoint, TrainOutcome, TrainReport, Trainer};
