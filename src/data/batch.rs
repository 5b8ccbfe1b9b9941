use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::math::matrix::Matrix;

/// One ground-truth box of a single image: class id and normalized
/// `[x_center, y_center, width, height]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub class: usize,
    pub bbox: [f64; 4],
}

/// A label after collation, tagged with the row of its image in the batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub image: usize,
    pub class: usize,
    pub bbox: [f64; 4],
}

/// One materialized dataset item.
#[derive(Debug, Clone)]
pub struct Sample {
    /// `img_size × img_size` grayscale plane, row-major, values in [0, 1].
    pub image: Vec<f64>,
    pub labels: Vec<Label>,
    pub path: PathBuf,
    /// Original `(width, height)` before resizing.
    pub shape: (u32, u32),
}

/// A collated mini-batch: one image per row of `images`.
#[derive(Debug, Clone)]
pub struct Batch {
    pub images: Matrix,
    pub targets: Vec<Target>,
    pub paths: Vec<PathBuf>,
    pub shapes: Vec<(u32, u32)>,
    pub img_size: u32,
}

impl Batch {
    /// Stacks samples in order and flattens their labels into targets.
    pub fn collate(samples: Vec<Sample>, img_size: u32) -> Result<Batch> {
        let plane = (img_size * img_size) as usize;
        let mut images = Matrix::zeros(samples.len(), plane);
        let mut targets = Vec::new();
        let mut paths = Vec::with_capacity(samples.len());
        let mut shapes = Vec::with_capacity(samples.len());

        for (i, sample) in samples.into_iter().enumerate() {
            if sample.image.len() != plane {
                return Err(Error::Dataset(format!(
                    "{}: expected {plane} pixels at {img_size}px, got {}",
                    sample.path.display(),
                    sample.image.len()
                )));
            }
            images.row_mut(i).copy_from_slice(&sample.image);
            targets.extend(sample.labels.iter().map(|l| Target { image: i, class: l.class, bbox: l.bbox }));
            paths.push(sample.path);
            shapes.push(sample.shape);
        }

        Ok(Batch { images, targets, paths, shapes, img_size })
    }

    pub fn len(&self) -> usize {
        self.images.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn targets_for(&self, image: usize) -> impl Iterator<Item = &Target> {
        self.targets.iter().filter(move |t| t.image == image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(fill: f64, labels: Vec<Label>) -> Sample {
        Sample { image: vec![fill; 4], labels, path: PathBuf::from("x.png"), shape: (2, 2) }
    }

    #[test]
    fn collate_tags_targets_with_image_row() {
        let box_a = Label { class: 1, bbox: [0.5, 0.5, 0.2, 0.2] };
        let box_b = Label { class: 0, bbox: [0.3, 0.3, 0.1, 0.1] };
        let batch = Batch::collate(vec![sample(0.0, vec![box_a]), sample(1.0, vec![box_b, box_a])], 2).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.targets.len(), 3);
        assert_eq!(batch.targets[0].image, 0);
        assert_eq!(batch.targets_for(1).count(), 2);
        assert_eq!(batch.images.row(1), &[1.0; 4]);
    }

    #[test]
    fn wrong_plane_size_is_a_dataset_error() {
        let err = Batch::collate(vec![sample(0.0, vec![])], 4).unwrap_err();
        assert!(matches!(err, Error::Dataset(_)));
    }
}
