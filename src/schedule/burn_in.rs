use crate::config::HyperParams;
use crate::model::GroupKind;
use crate::optim::Sgd;

/// Bias learning rate at iteration 0; it falls from here to its target.
pub const BIAS_LR_START: f64 = 0.1;
/// Momentum at iteration 0 for every group.
pub const MOMENTUM_START: f64 = 0.9;
/// Effective batch size the accumulation targets.
pub const NOMINAL_BATCH_SIZE: usize = 64;
pub const BURN_IN_EPOCHS: usize = 3;
pub const MIN_BURN_IN_ITERATIONS: usize = 500;

/// Linear interpolation of `x` over `[x0, x1] → [y0, y1]`, clamped at both ends.
pub fn interp(x: f64, (x0, x1): (f64, f64), (y0, y1): (f64, f64)) -> f64 {
    if x <= x0 {
        y0
    } else if x >= x1 {
        y1
    } else {
        y0 + (y1 - y0) * (x - x0) / (x1 - x0)
    }
}

/// Values set by one burn-in iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BurnInStep {
    /// Objectness/IoU blend ratio for the loss.
    pub gr: f64,
    pub accumulate: usize,
}

/// Iteration-level warm-up over the first `n_burn` iterations of a run.
///
/// Every quantity is linear in the global iteration `ni` over `[0, n_burn]`
/// and holds its endpoint afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BurnIn {
    n_burn: usize,
    batch_size: usize,
}

impl BurnIn {
    /// `n_burn = max(3 epochs, 500 iterations)`.
    pub fn new(batches_per_epoch: usize, batch_size: usize) -> BurnIn {
        BurnIn {
            n_burn: (BURN_IN_EPOCHS * batches_per_epoch).max(MIN_BURN_IN_ITERATIONS),
            batch_size: batch_size.max(1),
        }
    }

    pub fn n_burn(&self) -> usize {
        self.n_burn
    }

    pub fn is_active(&self, ni: usize) -> bool {
        ni <= self.n_burn
    }

    fn ramp(&self, ni: usize, from: f64, to: f64) -> f64 {
        interp(ni as f64, (0.0, self.n_burn as f64), (from, to))
    }

    pub fn giou_ratio(&self, ni: usize) -> f64 {
        self.ramp(ni, 0.0, 1.0)
    }

    /// Accumulation steps, from 1 up to `round(64 / batch_size)`.
    pub fn accumulate(&self, ni: usize) -> usize {
        let target = NOMINAL_BATCH_SIZE as f64 / self.batch_size as f64;
        (self.ramp(ni, 1.0, target).round_ties_even() as usize).max(1)
    }

    pub fn start_lr(kind: GroupKind) -> f64 {
        match kind {
            GroupKind::Bias => BIAS_LR_START,
            _ => 0.0,
        }
    }

    pub fn lr(&self, ni: usize, kind: GroupKind, target: f64) -> f64 {
        self.ramp(ni, Self::start_lr(kind), target)
    }

    /// Only convolution kernels are decayed; the other groups stay at 0.
    pub fn weight_decay(&self, ni: usize, kind: GroupKind, configured: f64) -> f64 {
        let target = if kind == GroupKind::ConvWeight { configured } else { 0.0 };
        self.ramp(ni, 0.0, target)
    }

    pub fn momentum(&self, ni: usize, configured: f64) -> f64 {
        self.ramp(ni, MOMENTUM_START, configured)
    }

    /// Rewrites the optimizer groups for iteration `ni`. `multiplier` is
    /// the epoch schedule's value for the current epoch. Returns `None` once
    /// burn-in is over, leaving the groups untouched.
    pub fn apply(&self, ni: usize, multiplier: f64, optimizer: &mut Sgd, hyp: &HyperParams) -> Option<BurnInStep> {
        if !self.is_active(ni) {
            return None;
        }
        for group in &mut optimizer.param_groups {
            group.lr = self.lr(ni, group.kind, group.initial_lr * multiplier);
            group.weight_decay = self.weight_decay(ni, group.kind, hyp.weight_decay);
            group.momentum = self.momentum(ni, hyp.momentum);
        }
        Some(BurnInStep { gr: self.giou_ratio(ni), accumulate: self.accumulate(ni) })
    }
}
