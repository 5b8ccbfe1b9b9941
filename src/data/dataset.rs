use crate::data::batch::Sample;
use crate::error::Result;

/// Source of training or validation samples.
///
/// `load` takes `&self` so a loader can materialize the samples of one
/// batch on several worker threads.
pub trait DetectionDataset {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Class ids of every label, per image.
    fn labels(&self) -> Vec<Vec<usize>>;

    /// Materializes item `index` as a square `img_size` grayscale plane.
    fn load(&self, index: usize, img_size: u32, augment: bool) -> Result<Sample>;
}

/// Inverse label frequency per class, normalized to sum to 1.
/// Classes that never occur count as one occurrence.
pub fn labels_to_class_weights(labels: &[Vec<usize>], nc: usize) -> Vec<f64> {
    if nc == 0 {
        return Vec::new();
    }
    let mut counts = vec![0usize; nc];
    for class in labels.iter().flatten() {
        if let Some(c) = counts.get_mut(*class) {
            *c += 1;
        }
    }
    let inverse: Vec<f64> = counts.iter().map(|&c| 1.0 / c.max(1) as f64).collect();
    let total: f64 = inverse.iter().sum();
    inverse.into_iter().map(|w| w / total).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rare_classes_weigh_more() {
        let labels = vec![vec![0, 0, 0], vec![1], vec![]];
        let w = labels_to_class_weights(&labels, 3);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(w[1] > w[0]);
        // class 2 never appears and is treated like a single occurrence
        assert_eq!(w[1], w[2]);
    }
}
