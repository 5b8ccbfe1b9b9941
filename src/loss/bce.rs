/// Binary cross-entropy on logits with a positive-class weight.
pub struct BceWithLogits {
    pub pos_weight: f64,
}

/// log(1 + e^x) without overflow.
fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

impl BceWithLogits {
    pub fn new(pos_weight: f64) -> BceWithLogits {
        BceWithLogits { pos_weight }
    }

    /// `pw·y·softplus(−x) + (1−y)·softplus(x)` for one logit.
    pub fn loss_one(&self, logit: f64, target: f64) -> f64 {
        self.pos_weight * target * softplus(-logit) + (1.0 - target) * softplus(logit)
    }

    /// ∂loss_one/∂logit.
    pub fn derivative_one(&self, logit: f64, target: f64) -> f64 {
        let p = crate::activation::sigmoid(logit);
        self.pos_weight * target * (p - 1.0) + (1.0 - target) * p
    }

    /// Mean loss over a slice of logits.
    pub fn loss(&self, logits: &[f64], targets: &[f64]) -> f64 {
        let n = logits.len().max(1) as f64;
        logits.iter().zip(targets)
            .map(|(&x, &y)| self.loss_one(x, y))
            .sum::<f64>() / n
    }

    /// Per-logit gradient of `loss`.
    pub fn derivative(&self, logits: &[f64], targets: &[f64]) -> Vec<f64> {
        let n = logits.len().max(1) as f64;
        logits.iter().zip(targets)
            .map(|(&x, &y)| self.derivative_one(x, y) / n)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_plain_bce_when_unweighted() {
        let bce = BceWithLogits::new(1.0);
        let p = crate::activation::sigmoid(0.3);
        let expected = -(0.8 * p.ln() + 0.2 * (1.0 - p).ln());
        assert!((bce.loss_one(0.3, 0.8) - expected).abs() < 1e-12);
    }

    #[test]
    fn stable_for_extreme_logits() {
        let bce = BceWithLogits::new(2.0);
        assert!(bce.loss_one(800.0, 0.0).is_finite());
        assert!(bce.loss_one(-800.0, 1.0).is_finite());
    }

    #[test]
    fn derivative_matches_finite_difference() {
        let bce = BceWithLogits::new(1.7);
        let h = 1e-6;
        for &(x, y) in &[(-2.0, 1.0), (0.5, 0.0), (1.2, 0.4)] {
            let numeric = (bce.loss_one(x + h, y) - bce.loss_one(x - h, y)) / (2.0 * h);
            assert!((numeric - bce.derivative_one(x, y)).abs() < 1e-6);
        }
    }
}
