pub mod checkpoint;
pub mod epoch_stats;
pub mod fitness;
pub mod results_log;
pub mod run_state;
pub mod trainer;

pub use checkpoint::{strip_optimizer, Checkpoint, CheckpointManager, OptimizerSlot, Restored, CHECKPOINT_FORMAT};
pub use epoch_stats::EpochStats;
pub use fitness::{fitness, FITNESS_WEIGHTS};
pub use results_log::{fmt_g, ResultsLog};
pub use run_state::RunState;
pub use trainer::{Phase, TrainOutcome, TrainReport, Trainer};
