use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::optim::Sgd;

/// Pure epoch → learning-rate multiplier.
pub trait LrLambda {
    fn multiplier(&self, epoch: usize) -> f64;
}

/// Cosine decay from 1.0 at epoch 0 to 0.05 at `total_epochs`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CosineSchedule {
    pub total_epochs: usize,
}

impl CosineSchedule {
    pub const FLOOR: f64 = 0.05;

    pub fn new(total_epochs: usize) -> CosineSchedule {
        CosineSchedule { total_epochs }
    }
}

impl LrLambda for CosineSchedule {
    fn multiplier(&self, epoch: usize) -> f64 {
        let x = epoch as f64 * PI / self.total_epochs.max(1) as f64;
        ((1.0 + x.cos()) / 2.0) * (1.0 - Self::FLOOR) + Self::FLOOR
    }
}

/// Sets every group's learning rate to `initial_lr · λ(epoch)` once per epoch.
///
/// `last_epoch` is the last fully completed epoch (−1 before the first).
/// Because λ is a pure function of the epoch index, a scheduler pinned at
/// `start_epoch − 1` produces exactly the rates a fresh run would.
#[derive(Debug, Clone)]
pub struct LambdaLr<F: LrLambda> {
    lambda: F,
    last_epoch: i64,
}

impl<F: LrLambda> LambdaLr<F> {
    pub fn new(lambda: F, optimizer: &mut Sgd) -> LambdaLr<F> {
        Self::resume_at(lambda, optimizer, 0)
    }

    /// Scheduler for a run whose first epoch is `start_epoch`.
    pub fn resume_at(lambda: F, optimizer: &mut Sgd, start_epoch: usize) -> LambdaLr<F> {
        let scheduler = LambdaLr { lambda, last_epoch: start_epoch as i64 - 1 };
        scheduler.apply(optimizer);
        scheduler
    }

    pub fn last_epoch(&self) -> i64 {
        self.last_epoch
    }

    /// Epoch the current learning rates belong to.
    pub fn current_epoch(&self) -> usize {
        (self.last_epoch + 1).max(0) as usize
    }

    pub fn multiplier(&self, epoch: usize) -> f64 {
        self.lambda.multiplier(epoch)
    }

    pub fn lambda(&self) -> &F {
        &self.lambda
    }

    /// Marks the current epoch complete and moves the rates to the next one.
    pub fn step(&mut self, optimizer: &mut Sgd) {
        self.last_epoch += 1;
        self.apply(optimizer);
    }

    fn apply(&self, optimizer: &mut Sgd) {
        let m = self.lambda.multiplier(self.current_epoch());
        for group in &mut optimizer.param_groups {
            group.lr = group.initial_lr * m;
        }
    }
}
