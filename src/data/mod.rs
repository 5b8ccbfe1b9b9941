pub mod batch;
pub mod dataset;
pub mod diagnostics;
pub mod image_folder;
pub mod loader;
pub mod synthetic;

pub use batch::{Batch, Label, Sample, Target};
pub use dataset::{labels_to_class_weights, DetectionDataset};
pub use diagnostics::plot_batch;
pub use image_folder::{FolderOptions, ImageFolder};
pub use loader::{worker_count, DataLoader, LoaderOptions};
pub use synthetic::SyntheticShapes;
