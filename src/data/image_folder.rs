use std::fs;
use std::path::{Component, Path, PathBuf};

use image::{imageops::FilterType, GrayImage};
use rand::Rng;
use tracing::{info, warn};

use crate::data::batch::{Label, Sample};
use crate::data::dataset::DetectionDataset;
use crate::error::{Error, Result};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "gif"];

#[derive(Debug, Clone, Default)]
pub struct FolderOptions {
    pub cache_images: bool,
    pub single_cls: bool,
    /// Brightness jitter fraction used when augmenting.
    pub hsv_v: f64,
}

#[derive(Debug, Clone)]
struct Item {
    image: PathBuf,
    labels: Vec<Label>,
}

/// Images on disk with YOLO-format label files.
///
/// `source` is either a directory of images or a text file listing one image
/// path per line. Labels for `.../images/x.jpg` live in `.../labels/x.txt`,
/// one `class x_center y_center width height` row per box. Images without a
/// label file are background.
pub struct ImageFolder {
    items: Vec<Item>,
    cache: Option<Vec<GrayImage>>,
    hsv_v: f64,
}

impl ImageFolder {
    pub fn open(source: &Path, options: FolderOptions) -> Result<ImageFolder> {
        let images = list_images(source)?;
        if images.is_empty() {
            return Err(Error::Dataset(format!("no images found in {}", source.display())));
        }

        let mut items = Vec::with_capacity(images.len());
        let mut missing = 0usize;
        for image in images {
            let label_file = label_path(&image);
            let mut labels = if label_file.exists() {
                read_labels(&label_file)?
            } else {
                missing += 1;
                Vec::new()
            };
            if options.single_cls {
                labels.iter_mut().for_each(|l| l.class = 0);
            }
            items.push(Item { image, labels });
        }
        if missing > 0 {
            warn!("{missing} of {} images in {} have no labels", items.len(), source.display());
        }

        let cache = if options.cache_images {
            let decoded = items
                .iter()
                .map(|it| -> Result<GrayImage> { Ok(image::open(&it.image)?.to_luma8()) })
                .collect::<Result<Vec<_>>>()?;
            info!("Cached {} images from {}", decoded.len(), source.display());
            Some(decoded)
        } else {
            None
        };

        Ok(ImageFolder { items, cache, hsv_v: options.hsv_v })
    }
}

impl DetectionDataset for ImageFolder {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn labels(&self) -> Vec<Vec<usize>> {
        self.items
            .iter()
            .map(|it| it.labels.iter().map(|l| l.class).collect())
            .collect()
    }

    fn load(&self, index: usize, img_size: u32, augment: bool) -> Result<Sample> {
        let item = self
            .items
            .get(index)
            .ok_or_else(|| Error::Dataset(format!("image index {index} out of range")))?;

        let gray = match &self.cache {
            Some(cache) => cache[index].clone(),
            None => image::open(&item.image)?.to_luma8(),
        };
        let shape = gray.dimensions();
        let mut resized = image::imageops::resize(&gray, img_size, img_size, FilterType::Triangle);
        let mut labels = item.labels.clone();

        let mut gain = 1.0;
        if augment {
            let mut rng = rand::thread_rng();
            if rng.gen_bool(0.5) {
                image::imageops::flip_horizontal_in_place(&mut resized);
                labels.iter_mut().for_each(|l| l.bbox[0] = 1.0 - l.bbox[0]);
            }
            if self.hsv_v > 0.0 {
                gain = 1.0 + rng.gen_range(-self.hsv_v..self.hsv_v);
            }
        }

        let image = resized
            .pixels()
            .map(|p| (p.0[0] as f64 / 255.0 * gain).clamp(0.0, 1.0))
            .collect();

        Ok(Sample { image, labels, path: item.image.clone(), shape })
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn list_images(source: &Path) -> Result<Vec<PathBuf>> {
    let mut images = if source.is_dir() {
        fs::read_dir(source)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?
    } else {
        let base = source.parent().unwrap_or_else(|| Path::new("."));
        fs::read_to_string(source)?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| {
                let p = PathBuf::from(l);
                if p.is_relative() && !p.exists() { base.join(p) } else { p }
            })
            .collect()
    };
    images.retain(|p| is_image(p));
    images.sort();
    Ok(images)
}

/// `.../images/name.jpg` → `.../labels/name.txt` (last `images` component).
pub fn label_path(image: &Path) -> PathBuf {
    let components: Vec<Component> = image.components().collect();
    let swap_at = components.iter().rposition(|c| c.as_os_str() == "images");
    let mut out = PathBuf::new();
    for (i, c) in components.iter().enumerate() {
        if Some(i) == swap_at {
            out.push("labels");
        } else {
            out.push(c.as_os_str());
        }
    }
    out.set_extension("txt");
    out
}

fn read_labels(path: &Path) -> Result<Vec<Label>> {
    let text = fs::read_to_string(path)?;
    let mut labels = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        let bad = || Error::Dataset(format!("{}:{}: expected `class x y w h`", path.display(), n + 1));
        if fields.len() != 5 {
            return Err(bad());
        }
        let class = fields[0].parse::<f64>().map_err(|_| bad())? as usize;
        let mut bbox = [0.0; 4];
        for (dst, src) in bbox.iter_mut().zip(&fields[1..]) {
            *dst = src.parse::<f64>().map_err(|_| bad())?;
        }
        if bbox.iter().any(|v| !(0.0..=1.0).contains(v)) {
            return Err(Error::Dataset(format!(
                "{}:{}: box coordinates must be normalized",
                path.display(),
                n + 1
            )));
        }
        labels.push(Label { class, bbox });
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_path_swaps_last_images_dir() {
        let p = label_path(Path::new("data/images/train/images/0001.jpg"));
        assert_eq!(p, PathBuf::from("data/images/train/labels/0001.txt"));
    }

    #[test]
    fn reads_images_and_labels_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let images = tmp.path().join("images");
        let labels = tmp.path().join("labels");
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&labels).unwrap();

        let img = GrayImage::from_fn(8, 8, |x, _| image::Luma([if x < 4 { 0 } else { 255 }]));
        img.save(images.join("a.png")).unwrap();
        img.save(images.join("b.png")).unwrap();
        fs::write(labels.join("a.txt"), "2 0.75 0.5 0.5 1.0\n").unwrap();

        let ds = ImageFolder::open(&images, FolderOptions { single_cls: true, ..Default::default() }).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.labels(), vec![vec![0], vec![]]);

        let s = ds.load(0, 4, false).unwrap();
        assert_eq!(s.image.len(), 16);
        assert_eq!(s.shape, (8, 8));
        assert!(s.image[3] > s.image[0]);
    }

    #[test]
    fn malformed_label_rows_fail() {
        let tmp = tempfile::tempdir().unwrap();
        let f = tmp.path().join("x.txt");
        fs::write(&f, "0 0.5 0.5\n").unwrap();
        assert!(matches!(read_labels(&f), Err(Error::Dataset(_))));
    }
}
