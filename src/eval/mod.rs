pub mod ap;
pub mod holdout;

pub use ap::compute_ap;
pub use holdout::HoldoutEvaluator;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::Detector;

/// Validation results of one epoch:
/// `(P, R, mAP, F1, val GIoU, val objectness, val classification)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FitnessVector {
    pub precision: f64,
    pub recall: f64,
    pub map: f64,
    pub f1: f64,
    pub val_giou: f64,
    pub val_obj: f64,
    pub val_cls: f64,
}

impl FitnessVector {
    pub fn as_array(&self) -> [f64; 7] {
        [self.precision, self.recall, self.map, self.f1, self.val_giou, self.val_obj, self.val_cls]
    }

    pub fn from_array(v: [f64; 7]) -> FitnessVector {
        FitnessVector {
            precision: v[0],
            recall: v[1],
            map: v[2],
            f1: v[3],
            val_giou: v[4],
            val_obj: v[5],
            val_cls: v[6],
        }
    }
}

/// Per-epoch evaluation settings handed to the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalRequest {
    pub batch_size: usize,
    pub img_size: u32,
    pub single_cls: bool,
    /// Write COCO-style detections (final epoch on an 80-class COCO dataset).
    pub save_json: bool,
    /// Allow several labels per box; set once burn-in has finished.
    pub multi_label: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvalOutput {
    pub results: FitnessVector,
    /// mAP per class, `nc` entries.
    pub maps: Vec<f64>,
}

/// Contract for the held-out evaluation run at epoch boundaries. It is
/// handed the EMA shadow, never the live model.
pub trait Evaluator<D: Detector> {
    fn evaluate(&mut self, model: &D, request: &EvalRequest) -> Result<EvalOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_order_is_stable() {
        let v = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7];
        let f = FitnessVector::from_array(v);
        assert_eq!(f.map, 0.3);
        assert_eq!(f.val_cls, 0.7);
        assert_eq!(f.as_array(), v);
    }
}
