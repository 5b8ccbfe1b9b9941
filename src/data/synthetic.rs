use std::path::PathBuf;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::data::batch::{Label, Sample};
use crate::data::dataset::DetectionDataset;
use crate::error::{Error, Result};

/// Procedural dataset: one bright rectangle on a noisy dark background,
/// its brightness encoding the class. Every item is a pure function of
/// `(seed, index)`, so two instances with the same seed agree exactly.
/// Every fifth image is background only.
#[derive(Debug, Clone)]
pub struct SyntheticShapes {
    len: usize,
    nc: usize,
    seed: u64,
}

impl SyntheticShapes {
    pub fn new(len: usize, nc: usize, seed: u64) -> SyntheticShapes {
        SyntheticShapes { len, nc: nc.max(1), seed }
    }

    /// Parses a `synthetic:<count>` data source.
    pub fn from_source(source: &str, nc: usize, seed: u64) -> Option<SyntheticShapes> {
        let count = source.strip_prefix("synthetic:")?.trim().parse().ok()?;
        Some(SyntheticShapes::new(count, nc, seed))
    }

    fn rng(&self, index: usize, stream: u64) -> StdRng {
        let mix = (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ stream;
        StdRng::seed_from_u64(self.seed ^ mix)
    }

    fn layout(&self, index: usize) -> Option<Label> {
        if index % 5 == 4 {
            return None;
        }
        let mut rng = self.rng(index, 1);
        let class = rng.gen_range(0..self.nc);
        let w = rng.gen_range(0.2..0.5);
        let h = rng.gen_range(0.2..0.5);
        let x = rng.gen_range(w / 2.0..1.0 - w / 2.0);
        let y = rng.gen_range(h / 2.0..1.0 - h / 2.0);
        Some(Label { class, bbox: [x, y, w, h] })
    }

    fn brightness(&self, class: usize) -> f64 {
        0.5 + 0.5 * (class + 1) as f64 / self.nc as f64
    }
}

impl DetectionDataset for SyntheticShapes {
    fn len(&self) -> usize {
        self.len
    }

    fn labels(&self) -> Vec<Vec<usize>> {
        (0..self.len)
            .map(|i| self.layout(i).map(|l| vec![l.class]).unwrap_or_default())
            .collect()
    }

    fn load(&self, index: usize, img_size: u32, _augment: bool) -> Result<Sample> {
        if index >= self.len {
            return Err(Error::Dataset(format!("synthetic index {index} out of range {}", self.len)));
        }
        let side = img_size as usize;
        let mut noise = self.rng(index, 2);
        let mut image: Vec<f64> = (0..side * side).map(|_| noise.gen::<f64>() * 0.1).collect();

        let label = self.layout(index);
        if let Some(l) = label {
            let [x, y, w, h] = l.bbox;
            let to_px = |v: f64| ((v * side as f64).round() as usize).min(side);
            let (x0, x1) = (to_px(x - w / 2.0), to_px(x + w / 2.0));
            let (y0, y1) = (to_px(y - h / 2.0), to_px(y + h / 2.0));
            let value = self.brightness(l.class);
            for row in y0..y1 {
                for px in &mut image[row * side + x0..row * side + x1] {
                    *px = value;
                }
            }
        }

        Ok(Sample {
            image,
            labels: label.into_iter().collect(),
            path: PathBuf::from(format!("synthetic/{index:06}.png")),
            shape: (img_size, img_size),
        })
    }
}
