use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Loss gains, optimizer settings and augmentation magnitudes for one run.
///
/// The defaults are COCO-tuned. `cls` is rescaled once per run by
/// `rescale_for_classes`; every other field stays fixed for the whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperParams {
    /// Box regression loss gain.
    pub giou: f64,
    /// Classification loss gain.
    pub cls: f64,
    /// Classification BCE positive weight.
    pub cls_pw: f64,
    /// Objectness loss gain.
    pub obj: f64,
    /// Objectness BCE positive weight.
    pub obj_pw: f64,
    /// IoU training threshold.
    pub iou_t: f64,
    /// Initial learning rate.
    pub lr0: f64,
    /// Final learning rate (cosine schedule floor).
    pub lrf: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    /// Focal loss gamma; 0 disables focal weighting.
    pub fl_gamma: f64,
    pub hsv_h: f64,
    pub hsv_s: f64,
    pub hsv_v: f64,
    pub degrees: f64,
    pub translate: f64,
    pub scale: f64,
    pub shear: f64,
}

impl Default for HyperParams {
    fn default() -> Self {
        HyperParams {
            giou: 3.54,
            cls: 37.4,
            cls_pw: 1.0,
            obj: 64.3,
            obj_pw: 1.0,
            iou_t: 0.20,
            lr0: 0.01,
            lrf: 0.0005,
            momentum: 0.937,
            weight_decay: 0.0005,
            fl_gamma: 0.0,
            hsv_h: 0.0138,
            hsv_s: 0.678,
            hsv_v: 0.36,
            degrees: 0.0,
            translate: 0.0,
            scale: 0.0,
            shear: 0.0,
        }
    }
}

impl HyperParams {
    /// Class count the default `cls` gain was tuned for.
    pub const REFERENCE_CLASSES: usize = 80;

    /// Scales the classification gain from the 80-class reference to `nc`.
    pub fn rescale_for_classes(&mut self, nc: usize) {
        self.cls *= nc as f64 / Self::REFERENCE_CLASSES as f64;
    }

    /// Loads a hyperparameter file; missing keys keep their defaults.
    pub fn load_json(path: &Path) -> Result<HyperParams> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cls_gain_follows_class_count() {
        let mut hyp = HyperParams::default();
        hyp.rescale_for_classes(20);
        assert!((hyp.cls - 37.4 * 0.25).abs() < 1e-12);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let hyp: HyperParams = serde_json::from_str(r#"{"lr0": 0.02}"#).unwrap();
        assert_eq!(hyp.lr0, 0.02);
        assert_eq!(hyp.momentum, 0.937);
    }
}
