pub mod accumulate;
pub mod burn_in;
pub mod cosine;

pub use accumulate::Accumulator;
pub use burn_in::{interp, BurnIn, BurnInStep};
pub use cosine::{CosineSchedule, LambdaLr, LrLambda};
