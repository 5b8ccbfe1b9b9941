pub mod bce;
pub mod mse;
pub mod single_box;

pub use bce::BceWithLogits;
pub use mse::MseLoss;
pub use single_box::{box_iou, SingleBoxLoss};

use serde::{Deserialize, Serialize};

use crate::data::Target;
use crate::model::Detector;

/// Loss breakdown: `[box, objectness, classification, total]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossItems(pub [f64; 4]);

impl LossItems {
    pub fn new(lbox: f64, lobj: f64, lcls: f64) -> LossItems {
        LossItems([lbox, lobj, lcls, lbox + lobj + lcls])
    }

    pub fn total(&self) -> f64 {
        self.0[3]
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// Running mean after folding in batch `i` (0-based).
    pub fn running_mean(&self, next: &LossItems, i: usize) -> LossItems {
        let mut out = [0.0; 4];
        for (k, o) in out.iter_mut().enumerate() {
            *o = (self.0[k] * i as f64 + next.0[k]) / (i + 1) as f64;
        }
        LossItems(out)
    }
}

/// Scalar loss, its breakdown, and ∂loss/∂prediction.
#[derive(Debug, Clone)]
pub struct LossOutput<P> {
    pub total: f64,
    pub items: LossItems,
    pub grad: P,
}

/// Contract for the detection loss. Reads the model's attached
/// hyperparameters, class weights and `gr` blend ratio.
pub trait DetectionLoss<D: Detector> {
    fn compute(&self, pred: &D::Prediction, targets: &[Target], model: &D) -> LossOutput<D::Prediction>;
}
