use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Spatial downsampling factor of the detector; every training resolution
/// must be a multiple of it.
pub const GRID_SIZE: u32 = 32;

/// Resolved training/test resolutions for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSizes {
    pub min: u32,
    pub max: u32,
    pub test: u32,
    pub multi_scale: bool,
}

impl ImageSizes {
    /// Resolves the `--img-size` values (1 to 3 entries: min, max, test).
    ///
    /// Missing entries repeat the last one. Multi-scale is switched on
    /// whenever `min != max`; a multi-scale run with a single size trains
    /// over roughly 67%-150% of it. Both bounds are floored to the grid.
    pub fn resolve(sizes: &[u32], multi_scale: bool) -> Result<ImageSizes> {
        let last = *sizes
            .last()
            .ok_or_else(|| Error::Config("img_size needs at least one value".into()))?;
        if sizes.len() > 3 {
            return Err(Error::Config(format!(
                "img_size takes at most 3 values (min, max, test), got {}",
                sizes.len()
            )));
        }
        let at = |i: usize| sizes.get(i).copied().unwrap_or(last);
        let (mut min, mut max, test) = (at(0), at(1), at(2));

        if min % GRID_SIZE != 0 {
            return Err(Error::Resolution { size: min, grid: GRID_SIZE });
        }

        let multi_scale = multi_scale || min != max;
        if multi_scale {
            if min == max {
                min = (min as f64 / 1.5).floor() as u32;
                max = (max as f64 / 0.667).floor() as u32;
            }
            let grid_min = (min / GRID_SIZE).max(1);
            let grid_max = (max / GRID_SIZE).max(grid_min);
            min = grid_min * GRID_SIZE;
            max = grid_max * GRID_SIZE;
        }

        Ok(ImageSizes { min, max, test, multi_scale })
    }

    /// Training starts at the largest size.
    pub fn initial(&self) -> u32 {
        self.max
    }

    /// Grid-cell bounds `(min / 32, max / 32)`.
    pub fn grid_range(&self) -> (u32, u32) {
        (self.min / GRID_SIZE, self.max / GRID_SIZE)
    }

    /// Draws a grid-aligned size uniformly from `[min, max]`.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> u32 {
        let (lo, hi) = self.grid_range();
        rng.gen_range(lo..=hi) * GRID_SIZE
    }
}
