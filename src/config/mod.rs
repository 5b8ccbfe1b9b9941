pub mod data_cfg;
pub mod hyp;
pub mod image_sizes;
pub mod run_config;

pub use data_cfg::DataDescriptor;
pub use hyp::HyperParams;
pub use image_sizes::{ImageSizes, GRID_SIZE};
pub use run_config::RunConfig;
