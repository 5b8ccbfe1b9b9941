use serde::{Deserialize, Serialize};

use crate::config::HyperParams;

/// Non-trainable values attached to a detector. They are not produced by the
/// weight average, so `ModelEma::update_attr` copies them onto the shadow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelAttributes {
    /// Number of classes.
    pub nc: usize,
    pub hyp: HyperParams,
    /// Objectness target blend: 0 uses a hard 1.0, 1 uses the predicted IoU.
    pub gr: f64,
    /// Inverse-frequency class weights from the training labels.
    pub class_weights: Vec<f64>,
    pub names: Vec<String>,
    /// Output strides of the detection heads.
    pub stride: Vec<u32>,
}

impl Default for ModelAttributes {
    fn default() -> Self {
        ModelAttributes {
            nc: 80,
            hyp: HyperParams::default(),
            gr: 1.0,
            class_weights: Vec::new(),
            names: Vec::new(),
            stride: Vec::new(),
        }
    }
}
