use std::collections::BTreeMap;

use crate::math::matrix::Matrix;
use crate::model::attributes::ModelAttributes;
use crate::model::precision::Precision;

/// Serialized model weights keyed by parameter name.
pub type StateDict = BTreeMap<String, Matrix>;

/// A trainable value and the gradient accumulated into it since the last
/// `zero_grad`.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub value: Matrix,
    pub grad: Matrix,
}

impl Parameter {
    pub fn new(value: Matrix) -> Parameter {
        let grad = value.zeros_like();
        Parameter { value, grad }
    }
}

/// Outcome of a non-strict `load_state_dict`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    /// Present in both, but with a different element count.
    pub dropped: Vec<String>,
    /// Live parameters the stored weights did not mention.
    pub missing: Vec<String>,
    /// Stored entries with no live parameter.
    pub unexpected: Vec<String>,
}

/// Contract between the trainer and a detection network.
///
/// Implementors own their parameters and gradient buffers. `forward` may
/// cache activations for the next `backward`; `infer` must not.
pub trait Detector {
    /// Raw network output; the loss collaborator returns its gradient in the same type.
    type Prediction;

    /// Trainable values in a stable order.
    fn parameters(&self) -> Vec<(String, &Parameter)>;

    fn parameters_mut(&mut self) -> Vec<(String, &mut Parameter)>;

    /// Training-mode forward pass over `images` (one flattened
    /// `img_size × img_size` plane per row).
    fn forward(&mut self, images: &Matrix, img_size: u32, precision: Precision) -> Self::Prediction;

    /// Inference-mode forward pass; leaves the model untouched.
    fn infer(&self, images: &Matrix, img_size: u32) -> Self::Prediction;

    /// Back-propagates `grad * scale` from the last `forward` and adds the
    /// result to every parameter's `grad`.
    fn backward(&mut self, grad: &Self::Prediction, scale: f64, precision: Precision);

    fn attributes(&self) -> &ModelAttributes;

    fn attributes_mut(&mut self) -> &mut ModelAttributes;

    /// Approximate bytes held by the model on its device.
    fn memory_reserved(&self) -> u64 {
        // value + grad, f64 each
        (self.num_parameters() * 2 * std::mem::size_of::<f64>()) as u64
    }

    /// Frees cached device memory at the end of a run.
    fn release_resources(&mut self) {}

    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|(_, p)| p.value.numel()).sum()
    }

    fn zero_grad(&mut self) {
        for (_, p) in self.parameters_mut() {
            p.grad.fill(0.0);
        }
    }

    fn state_dict(&self) -> StateDict {
        self.parameters()
            .into_iter()
            .map(|(name, p)| (name, p.value.clone()))
            .collect()
    }

    /// Applies stored weights non-strictly. Entries whose element count
    /// differs from the live parameter are dropped; the others are copied
    /// into the live shape. Unknown or absent keys are reported, never fatal.
    fn load_state_dict(&mut self, mut state: StateDict) -> LoadReport {
        let mut report = LoadReport::default();
        for (name, param) in self.parameters_mut() {
            match state.remove(&name) {
                Some(stored) if stored.numel() == param.value.numel() => {
                    param.value.data = stored.data;
                    report.loaded.push(name);
                }
                Some(_) => report.dropped.push(name),
                None => report.missing.push(name),
            }
        }
        report.unexpected = state.into_keys().collect();
        report
    }
}
