pub mod detector;
pub mod spec;

pub use detector::DenseDetector;
pub use spec::{ArchitectureSpec, LayerSpec};
