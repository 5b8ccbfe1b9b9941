pub mod attributes;
pub mod detector;
pub mod ema;
pub mod param_groups;
pub mod precision;

pub use attributes::ModelAttributes;
pub use detector::{Detector, LoadReport, Parameter, StateDict};
pub use ema::ModelEma;
pub use param_groups::{GroupKind, ParamGroups};
pub use precision::Precision;
