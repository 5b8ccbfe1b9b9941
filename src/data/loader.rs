use std::thread;

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use tracing::debug;

use crate::data::batch::{Batch, Sample};
use crate::data::dataset::DetectionDataset;
use crate::error::{Error, Result};

/// Worker threads for a batch size: `min(cpus, batch_size if > 1 else 0, 8)`.
pub fn worker_count(batch_size: usize) -> usize {
    let cpus = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    let per_batch = if batch_size > 1 { batch_size } else { 0 };
    cpus.min(per_batch).min(8)
}

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub batch_size: usize,
    pub shuffle: bool,
    pub augment: bool,
    pub seed: u64,
}

/// Finite, restartable sequence of collated batches over a dataset.
///
/// Samples of one batch are loaded on scoped worker threads and collated
/// in dataset order, so callers only ever see complete batches.
pub struct DataLoader<S> {
    dataset: S,
    batch_size: usize,
    workers: usize,
    shuffle: bool,
    augment: bool,
    order: Vec<usize>,
    rng: StdRng,
}

impl<S: DetectionDataset + Sync> DataLoader<S> {
    /// The batch size is clamped to the dataset length.
    pub fn new(dataset: S, options: LoaderOptions) -> Result<DataLoader<S>> {
        if dataset.is_empty() {
            return Err(Error::Dataset("dataset has no samples".into()));
        }
        let batch_size = options.batch_size.clamp(1, dataset.len());
        let order = (0..dataset.len()).collect();
        let mut loader = DataLoader {
            batch_size,
            workers: worker_count(batch_size),
            shuffle: options.shuffle,
            augment: options.augment,
            order,
            rng: StdRng::seed_from_u64(options.seed),
            dataset,
        };
        loader.start_epoch();
        Ok(loader)
    }

    pub fn dataset(&self) -> &S {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Number of batches per epoch.
    pub fn len(&self) -> usize {
        self.order.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Reshuffles the sample order when shuffling is enabled.
    pub fn start_epoch(&mut self) {
        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }

    /// Materializes batch `index` of the current epoch at `img_size`.
    pub fn batch(&self, index: usize, img_size: u32) -> Result<Batch> {
        let start = index * self.batch_size;
        if start >= self.order.len() {
            return Err(Error::Dataset(format!("batch {index} out of range ({} batches)", self.len())));
        }
        let end = (start + self.batch_size).min(self.order.len());
        let indices = &self.order[start..end];

        let samples = if self.workers <= 1 {
            indices
                .iter()
                .map(|&i| self.dataset.load(i, img_size, self.augment))
                .collect::<Result<Vec<Sample>>>()?
        } else {
            self.load_parallel(indices, img_size)?
        };
        debug!("loaded batch {index} ({} samples at {img_size}px)", samples.len());
        Batch::collate(samples, img_size)
    }

    fn load_parallel(&self, indices: &[usize], img_size: u32) -> Result<Vec<Sample>> {
        let chunk = indices.len().div_ceil(self.workers);
        let dataset = &self.dataset;
        let augment = self.augment;

        thread::scope(|scope| -> Result<Vec<Sample>> {
            let handles: Vec<_> = indices
                .chunks(chunk)
                .map(|part| {
                    scope.spawn(move || {
                        part.iter()
                            .map(|&i| dataset.load(i, img_size, augment))
                            .collect::<Result<Vec<Sample>>>()
                    })
                })
                .collect();

            let mut samples = Vec::with_capacity(indices.len());
            for handle in handles {
                let part = handle
                    .join()
                    .map_err(|_| Error::Dataset("loader worker panicked".into()))??;
                samples.extend(part);
            }
            Ok(samples)
        })
    }
}
