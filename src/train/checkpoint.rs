use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::model::{Detector, LoadReport, StateDict};
use crate::optim::SgdState;

/// Version written into every checkpoint; other values are rejected.
pub const CHECKPOINT_FORMAT: u32 = 1;

/// Optimizer part of a checkpoint. `Terminal` marks weights that are not
/// meant to resume training (the final epoch, or a stripped file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OptimizerSlot {
    Resumable { optimizer: SgdState },
    Terminal,
}

impl OptimizerSlot {
    pub fn is_resumable(&self) -> bool {
        matches!(self, OptimizerSlot::Resumable { .. })
    }
}

/// Everything persisted at an epoch boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format: u32,
    /// Last fully completed epoch.
    pub epoch: usize,
    pub best_fitness: f64,
    /// Results log up to and including `epoch`.
    pub training_results: String,
    pub model: StateDict,
    pub optimizer: OptimizerSlot,
}

/// What a loaded checkpoint hands back to the trainer.
#[derive(Debug, Clone)]
pub struct Restored {
    /// `epoch + 1`: the first epoch still to run.
    pub start_epoch: usize,
    pub best_fitness: f64,
    pub optimizer: Option<SgdState>,
    pub training_results: String,
    pub report: LoadReport,
}

impl Checkpoint {
    pub fn new(
        epoch: usize,
        best_fitness: f64,
        training_results: String,
        model: StateDict,
        optimizer: Option<SgdState>,
    ) -> Checkpoint {
        let optimizer = match optimizer {
            Some(optimizer) => OptimizerSlot::Resumable { optimizer },
            None => OptimizerSlot::Terminal,
        };
        Checkpoint { format: CHECKPOINT_FORMAT, epoch, best_fitness, training_results, model, optimizer }
    }

    /// Writes to a sibling temporary file and renames it over `path`, so a
    /// crash mid-write never leaves a half-written checkpoint behind.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = tmp_path(path);
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Checkpoint> {
        if !path.exists() {
            return Err(Error::MissingCheckpoint(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        let corrupt = |reason: String| Error::CorruptCheckpoint { path: path.to_path_buf(), reason };
        let ckpt: Checkpoint = serde_json::from_str(&text).map_err(|e| corrupt(e.to_string()))?;
        if ckpt.format != CHECKPOINT_FORMAT {
            return Err(corrupt(format!(
                "format version {} (expected {CHECKPOINT_FORMAT})",
                ckpt.format
            )));
        }
        Ok(ckpt)
    }

    /// Applies the stored weights to `model` non-strictly and returns the
    /// run state to continue from.
    pub fn restore_into<D: Detector>(self, model: &mut D) -> Restored {
        let report = model.load_state_dict(self.model);
        for name in &report.dropped {
            warn!("dropped {name}: stored shape does not match the model");
        }
        if !report.missing.is_empty() || !report.unexpected.is_empty() {
            warn!(
                "partial weight load: {} missing, {} unexpected",
                report.missing.len(),
                report.unexpected.len()
            );
        }
        info!("Transferred {} parameter tensors", report.loaded.len());

        let optimizer = match self.optimizer {
            OptimizerSlot::Resumable { optimizer } => Some(optimizer),
            OptimizerSlot::Terminal => None,
        };
        Restored {
            start_epoch: self.epoch + 1,
            best_fitness: self.best_fitness,
            optimizer,
            training_results: self.training_results,
            report,
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Drops the optimizer state from the checkpoint at `path`, in place.
pub fn strip_optimizer(path: &Path) -> Result<()> {
    let mut ckpt = Checkpoint::load(path)?;
    if ckpt.optimizer.is_resumable() {
        ckpt.optimizer = OptimizerSlot::Terminal;
        ckpt.save(path)?;
    }
    Ok(())
}

/// The "last" and "best" checkpoint slots of a run.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    last: PathBuf,
    best: PathBuf,
}

impl CheckpointManager {
    pub fn new(last: PathBuf, best: PathBuf) -> CheckpointManager {
        CheckpointManager { last, best }
    }

    pub fn for_run(config: &RunConfig) -> CheckpointManager {
        CheckpointManager::new(config.last_checkpoint(), config.best_checkpoint())
    }

    pub fn last(&self) -> &Path {
        &self.last
    }

    pub fn best(&self) -> &Path {
        &self.best
    }

    /// Always rewrites "last". Rewrites "best" with the same payload when
    /// `fitness` ties or beats the checkpoint's best and the run goes on.
    /// Returns whether "best" was written.
    pub fn save_epoch(&self, ckpt: &Checkpoint, fitness: f64, final_epoch: bool) -> Result<bool> {
        ckpt.save(&self.last)?;
        let write_best = ckpt.best_fitness == fitness && !final_epoch;
        if write_best {
            ckpt.save(&self.best)?;
        }
        Ok(write_best)
    }
}
