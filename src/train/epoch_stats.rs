use serde::{Serialize, Deserialize};

use crate::eval::FitnessVector;
use crate::loss::LossItems;

/// Per-epoch training statistics emitted by the trainer.
///
/// When a progress channel is attached with `Trainer::with_progress`, one
/// `EpochStats` value is sent at the end of every completed epoch.
/// Receivers use it to drive dashboards or their own logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochStats {
    /// 0-based epoch index.
    pub epoch: usize,
    /// Total epochs requested for this run.
    pub total_epochs: usize,
    /// Mean training loss components over this epoch.
    pub mloss: LossItems,
    /// Validation results; those of the previous evaluation when this
    /// epoch was not evaluated.
    pub results: FitnessVector,
    pub fitness: f64,
    pub best_fitness: f64,
    /// Learning rate of every optimizer group after the epoch's schedule step.
    pub learning_rates: Vec<f64>,
    pub img_size: u32,
    /// Wall-clock duration of this single epoch in milliseconds.
    pub elapsed_ms: u64,
}
