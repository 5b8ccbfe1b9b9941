use std::path::Path;

use image::{imageops::FilterType, GrayImage, Luma};

use crate::data::batch::Batch;
use crate::error::Result;

const MAX_TILES: usize = 16;
const MAX_TILE_SIDE: u32 = 256;

/// Writes a grayscale mosaic of (up to 16) batch images with their target
/// boxes outlined. The format follows the file extension.
pub fn plot_batch(batch: &Batch, path: &Path) -> Result<()> {
    let n = batch.len().min(MAX_TILES);
    if n == 0 {
        return Ok(());
    }
    let cols = (n as f64).sqrt().ceil() as u32;
    let rows = (n as u32).div_ceil(cols);
    let tile = batch.img_size.min(MAX_TILE_SIDE);
    let mut mosaic = GrayImage::new(cols * tile, rows * tile);

    for i in 0..n {
        let side = batch.img_size;
        let plane = GrayImage::from_fn(side, side, |x, y| {
            let v = batch.images.get(i, (y * side + x) as usize);
            Luma([(v.clamp(0.0, 1.0) * 255.0).round() as u8])
        });
        let mut tile_img = if tile == side {
            plane
        } else {
            image::imageops::resize(&plane, tile, tile, FilterType::Nearest)
        };
        for t in batch.targets_for(i) {
            draw_box(&mut tile_img, t.bbox);
        }
        let (ox, oy) = ((i as u32 % cols) * tile, (i as u32 / cols) * tile);
        image::imageops::replace(&mut mosaic, &tile_img, ox as i64, oy as i64);
    }

    mosaic.save(path)?;
    Ok(())
}

fn draw_box(img: &mut GrayImage, [x, y, w, h]: [f64; 4]) {
    let (iw, ih) = img.dimensions();
    if iw == 0 || ih == 0 {
        return;
    }
    let px = |v: f64, side: u32| ((v * side as f64).round() as i64).clamp(0, side as i64 - 1) as u32;
    let (x0, x1) = (px(x - w / 2.0, iw), px(x + w / 2.0, iw));
    let (y0, y1) = (px(y - h / 2.0, ih), px(y + h / 2.0, ih));
    for xx in x0..=x1 {
        img.put_pixel(xx, y0, Luma([255]));
        img.put_pixel(xx, y1, Luma([255]));
    }
    for yy in y0..=y1 {
        img.put_pixel(x0, yy, Luma([255]));
        img.put_pixel(x1, yy, Luma([255]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DetectionDataset, SyntheticShapes};

    #[test]
    fn writes_mosaic_file() {
        let ds = SyntheticShapes::new(5, 2, 0);
        let samples = (0..5).map(|i| ds.load(i, 32, false).unwrap()).collect();
        let batch = Batch::collate(samples, 32).unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("train_batch0.jpg");
        plot_batch(&batch, &out).unwrap();

        let img = image::open(&out).unwrap();
        assert_eq!((img.width(), img.height()), (96, 64));
    }
}
