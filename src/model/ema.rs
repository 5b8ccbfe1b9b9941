use crate::model::detector::Detector;

/// Exponential moving average of a detector's weights.
///
/// The shadow starts as a copy of the live model and is refreshed only on
/// iterations where the optimizer stepped. Its decay ramps up with the
/// number of updates, `d = decay · (1 − exp(−updates / 2000))`, so early
/// updates follow the live weights closely. The shadow is only read:
/// evaluation and checkpoints use it, gradients never flow through it.
#[derive(Debug, Clone)]
pub struct ModelEma<D> {
    pub ema: D,
    updates: u64,
    decay: f64,
}

impl<D: Detector + Clone> ModelEma<D> {
    pub const DEFAULT_DECAY: f64 = 0.9999;
    const RAMP: f64 = 2000.0;

    pub fn new(model: &D) -> ModelEma<D> {
        Self::with_decay(model, Self::DEFAULT_DECAY)
    }

    pub fn with_decay(model: &D, decay: f64) -> ModelEma<D> {
        let mut ema = model.clone();
        ema.zero_grad();
        ModelEma { ema, updates: 0, decay }
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Decay factor used for the `updates`-th update.
    pub fn decay_at(&self, updates: u64) -> f64 {
        self.decay * (1.0 - (-(updates as f64) / Self::RAMP).exp())
    }

    pub fn update(&mut self, model: &D) {
        self.updates += 1;
        let d = self.decay_at(self.updates);
        let live = model.parameters();
        for ((shadow_name, shadow), (live_name, param)) in
            self.ema.parameters_mut().into_iter().zip(live)
        {
            debug_assert_eq!(shadow_name, live_name, "shadow/live parameter order diverged");
            shadow.value.lerp_towards(&param.value, d);
        }
    }

    /// Copies the non-trainable attributes (class count, class weights,
    /// hyperparameters, strides) from the live model.
    pub fn update_attr(&mut self, model: &D) {
        *self.ema.attributes_mut() = model.attributes().clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{ArchitectureSpec, DenseDetector};

    fn detector(seed: u64) -> DenseDetector {
        DenseDetector::new(ArchitectureSpec::tiny(), 2, seed).unwrap()
    }

    #[test]
    fn decay_ramps_towards_constant() {
        let ema = ModelEma::new(&detector(0));
        assert_eq!(ema.decay_at(0), 0.0);
        assert!(ema.decay_at(1) < 0.001);
        assert!(ema.decay_at(2000) < ema.decay_at(10_000));
        assert!((ema.decay_at(1_000_000) - 0.9999).abs() < 1e-9);
    }

    #[test]
    fn update_blends_shadow_with_live_weights() {
        let live = detector(1);
        let mut ema = ModelEma::new(&detector(2));
        let start = ema.ema.state_dict();
        ema.update(&live);
        assert_eq!(ema.updates(), 1);
        let d = ema.decay_at(1);
        let name = "module_list.0.Conv2d.weight";
        let expected = start[name].data[0] * d + live.state_dict()[name].data[0] * (1.0 - d);
        assert!((ema.ema.state_dict()[name].data[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn attributes_are_copied_not_averaged() {
        let mut live = detector(1);
        let mut ema = ModelEma::new(&live);
        live.attributes_mut().class_weights = vec![0.25, 0.75];
        live.attributes_mut().gr = 0.3;
        ema.update(&live);
        assert!(ema.ema.attributes().class_weights.is_empty());
        ema.update_attr(&live);
        assert_eq!(ema.ema.attributes(), live.attributes());
    }
}
