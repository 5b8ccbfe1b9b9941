use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use rand::{rngs::StdRng, SeedableRng};
use tracing::{debug, info, warn};

use crate::config::{HyperParams, ImageSizes, RunConfig};
use crate::data::{labels_to_class_weights, plot_batch, DataLoader, DetectionDataset};
use crate::error::{Error, Result};
use crate::eval::{EvalRequest, Evaluator, FitnessVector};
use crate::loss::{DetectionLoss, LossItems};
use crate::model::{Detector, ModelEma, ParamGroups, Precision};
use crate::optim::Sgd;
use crate::schedule::{Accumulator, BurnIn, CosineSchedule, LambdaLr};
use crate::train::checkpoint::{strip_optimizer, Checkpoint, CheckpointManager};
use crate::train::epoch_stats::EpochStats;
use crate::train::fitness::fitness;
use crate::train::results_log::{self, ResultsLog};
use crate::train::run_state::RunState;

/// Where the orchestrator is in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    RunningEpoch,
    EvaluatingEpoch,
    Checkpointing,
    Finalizing,
    Terminated,
    /// A non-finite loss ended the run.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainOutcome {
    Completed,
    /// Stopped on a non-finite loss; the last saved checkpoint is untouched.
    Diverged { epoch: usize, iteration: usize },
}

#[derive(Debug, Clone)]
pub struct TrainReport {
    pub outcome: TrainOutcome,
    pub phase: Phase,
    /// Last computed validation results.
    pub results: FitnessVector,
    pub maps: Vec<f64>,
    pub best_fitness: f64,
    pub start_epoch: usize,
    /// Whether epoch, best fitness and optimizer state came from a checkpoint.
    pub resumed: bool,
    pub total_epochs: usize,
    /// Iterations run since epoch 0, including those of earlier processes.
    pub global_iteration: usize,
    pub last_checkpoint: PathBuf,
    pub best_checkpoint: PathBuf,
    pub results_file: PathBuf,
}

/// Mutable state of one run, created by `initialize`.
struct Session<D> {
    state: RunState,
    start_epoch: usize,
    optimizer: Sgd,
    scheduler: LambdaLr<CosineSchedule>,
    ema: ModelEma<D>,
    burn_in: BurnIn,
    accumulator: Accumulator,
    sizes: ImageSizes,
    img_size: u32,
    precision: Precision,
    rng: StdRng,
    results: FitnessVector,
    maps: Vec<f64>,
    log: ResultsLog,
    manager: CheckpointManager,
    started: Instant,
}

/// Drives a detector through `RunConfig::epochs` epochs.
///
/// The model, dataset, loss and evaluator are collaborators; the trainer
/// owns the schedule, accumulation, EMA, checkpoints and the results log.
pub struct Trainer<D, S, L, E> {
    config: RunConfig,
    hyp: HyperParams,
    model: D,
    loader: DataLoader<S>,
    loss: L,
    evaluator: E,
    coco: bool,
    progress_tx: Option<mpsc::Sender<EpochStats>>,
    phase: Phase,
}

impl<D, S, L, E> Trainer<D, S, L, E>
where
    D: Detector + Clone,
    S: DetectionDataset + Sync,
    L: DetectionLoss<D>,
    E: Evaluator<D>,
{
    /// `model` must already be built for the run's class count.
    pub fn new(config: RunConfig, hyp: HyperParams, model: D, loader: DataLoader<S>, loss: L, evaluator: E) -> Self {
        Trainer {
            config,
            hyp,
            model,
            loader,
            loss,
            evaluator,
            coco: false,
            progress_tx: None,
            phase: Phase::Initializing,
        }
    }

    /// Sends one `EpochStats` per completed epoch.
    pub fn with_progress(mut self, tx: mpsc::Sender<EpochStats>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// Marks the dataset as COCO, which asks the evaluator for JSON
    /// detections on the final epoch.
    pub fn with_coco_eval(mut self, coco: bool) -> Self {
        self.coco = coco;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn model(&self) -> &D {
        &self.model
    }

    pub fn run(mut self) -> Result<TrainReport> {
        let mut s = self.initialize()?;

        for epoch in s.start_epoch..s.state.total_epochs {
            s.state.current_epoch = epoch;
            let started = Instant::now();

            self.enter(Phase::RunningEpoch);
            let Some((mloss, progress)) = self.run_epoch(&mut s)? else {
                self.enter(Phase::Aborted);
                let outcome = TrainOutcome::Diverged { epoch, iteration: s.state.global_iteration };
                return Ok(self.report(s, outcome));
            };

            self.enter(Phase::EvaluatingEpoch);
            self.evaluate_epoch(&mut s)?;

            self.enter(Phase::Checkpointing);
            self.checkpoint(&mut s, &mloss, &progress, started.elapsed())?;
        }

        self.enter(Phase::Finalizing);
        self.finalize(&mut s)?;
        self.enter(Phase::Terminated);
        Ok(self.report(s, TrainOutcome::Completed))
    }

    fn enter(&mut self, phase: Phase) {
        debug!("{:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    // ── Initializing ──────────────────────────────────────────────────────

    fn initialize(&mut self) -> Result<Session<D>> {
        self.config.validate()?;
        let sizes = ImageSizes::resolve(&self.config.img_size, self.config.multi_scale)?;
        if sizes.multi_scale {
            info!("Image sizes {} - {} train, {} test", sizes.min, sizes.max, sizes.test);
        }

        // Stale artifacts are only removed once every fallible read has passed.
        let stored = match self.config.initial_weights() {
            Some(path) if path.exists() => {
                let ckpt = Checkpoint::load(&path)?;
                info!("Loaded weights from {}", path.display());
                Some(ckpt)
            }
            Some(path) if self.config.resume => return Err(Error::MissingCheckpoint(path)),
            Some(path) => {
                warn!("{} not found, training from scratch", path.display());
                None
            }
            None => {
                info!("Training from scratch");
                None
            }
        };

        let nc = self.model.attributes().nc;
        self.hyp.rescale_for_classes(nc);

        let groups = ParamGroups::build(&self.model);
        let mut optimizer = Sgd::for_detector(&groups, &self.hyp);

        let mut state = RunState::new(self.config.epochs);
        let mut start_epoch = 0;
        let mut training_results = String::new();
        if let Some(ckpt) = stored {
            let restored = ckpt.restore_into(&mut self.model);
            if self.config.resume {
                if let Some(opt) = restored.optimizer {
                    optimizer.load_state_dict(opt)?;
                }
                state.best_fitness = restored.best_fitness;
                training_results = restored.training_results;
                start_epoch = restored.start_epoch;
                state.is_resumed = true;
            }
        }

        fs::create_dir_all(self.config.weights_dir())?;
        let log = ResultsLog::new(self.config.results_file());
        log.clear()?;
        remove_batch_plots(&self.config.out_dir)?;
        if !training_results.is_empty() {
            log.restore(&training_results)?;
        }
        if state.is_resumed {
            info!("Resuming from epoch {start_epoch}, best fitness {:.4}", state.best_fitness);
        }

        if state.total_epochs < start_epoch {
            info!(
                "Weights have been trained for {} epochs. Fine-tuning for {} additional epochs.",
                start_epoch,
                state.total_epochs
            );
            state.total_epochs += start_epoch - 1;
        }

        let scheduler = LambdaLr::resume_at(CosineSchedule::new(state.total_epochs), &mut optimizer, start_epoch);

        let labels = self.loader.dataset().labels();
        let attrs = self.model.attributes_mut();
        attrs.hyp = self.hyp.clone();
        attrs.gr = 1.0;
        attrs.class_weights = labels_to_class_weights(&labels, nc);

        let ema = ModelEma::new(&self.model);
        let precision = Precision::resolve(self.config.mixed_precision, &self.config.device);

        let nb = self.loader.len();
        let batch_size = self.loader.batch_size();
        info!("Model has {} parameters", self.model.num_parameters());
        info!("Using {} dataloader workers", self.loader.workers());
        info!("Starting training for {} epochs...", state.total_epochs);

        state.current_epoch = start_epoch;
        state.global_iteration = start_epoch * nb;
        Ok(Session {
            state,
            start_epoch,
            optimizer,
            scheduler,
            ema,
            burn_in: BurnIn::new(nb, batch_size),
            accumulator: Accumulator::new(batch_size),
            img_size: sizes.initial(),
            sizes,
            precision,
            rng: StdRng::seed_from_u64(self.config.seed),
            results: FitnessVector::default(),
            maps: vec![0.0; nc],
            log,
            manager: CheckpointManager::for_run(&self.config),
            started: Instant::now(),
        })
    }

    // ── RunningEpoch ──────────────────────────────────────────────────────

    /// One pass over the training batches. Returns the mean losses and the
    /// progress columns, or `None` when the loss stopped being finite.
    fn run_epoch(&mut self, s: &mut Session<D>) -> Result<Option<(LossItems, String)>> {
        let nb = self.loader.len();
        let epoch = s.state.current_epoch;
        let total = s.state.total_epochs;
        let multiplier = s.scheduler.multiplier(epoch);
        let loss_scale = Accumulator::loss_scale(self.loader.batch_size());
        let mut mloss = LossItems::default();
        let mut targets = 0;

        self.loader.start_epoch();
        info!("{}", results_log::header());

        for i in 0..nb {
            let ni = i + nb * epoch;
            s.state.global_iteration = ni;

            if let Some(step) = s.burn_in.apply(ni, multiplier, &mut s.optimizer, &self.hyp) {
                self.model.attributes_mut().gr = step.gr;
                s.accumulator.set_steps(step.accumulate);
            }

            if s.sizes.multi_scale && ni % s.accumulator.steps() == 0 {
                s.img_size = s.sizes.sample(&mut s.rng);
            }

            let batch = self.loader.batch(i, s.img_size)?;
            if ni == 0 {
                let path = self.config.out_dir.join("train_batch0.jpg");
                if let Err(err) = plot_batch(&batch, &path) {
                    warn!("could not write {}: {err}", path.display());
                }
            }

            let pred = self.model.forward(&batch.images, s.img_size, s.precision);
            let out = self.loss.compute(&pred, &batch.targets, &self.model);
            if !out.total.is_finite() || !out.items.is_finite() {
                warn!("WARNING: non-finite loss, ending training {:?}", out.items.0);
                return Ok(None);
            }

            self.model.backward(&out.grad, loss_scale, s.precision);

            if s.accumulator.should_step(ni) {
                s.optimizer.step(&mut self.model);
                s.optimizer.zero_grad(&mut self.model);
                s.ema.update(&self.model);
            }

            mloss = mloss.running_mean(&out.items, i);
            targets = batch.targets.len();
            debug!(
                "{}",
                results_log::progress_line(epoch, total, self.model.memory_reserved(), &mloss, targets, s.img_size)
            );
        }

        s.state.global_iteration = nb * (epoch + 1);
        s.scheduler.step(&mut s.optimizer);

        let progress = results_log::progress_line(epoch, total, self.model.memory_reserved(), &mloss, targets, s.img_size);
        Ok(Some((mloss, progress)))
    }

    // ── EvaluatingEpoch ───────────────────────────────────────────────────

    fn evaluate_epoch(&mut self, s: &mut Session<D>) -> Result<()> {
        s.ema.update_attr(&self.model);
        let final_epoch = s.state.is_final_epoch();
        if self.config.notest && !final_epoch {
            return Ok(());
        }
        // index of the epoch's last batch
        let last_ni = s.state.global_iteration.saturating_sub(1);
        let request = EvalRequest {
            batch_size: self.loader.batch_size(),
            img_size: s.sizes.test,
            single_cls: self.config.single_cls,
            save_json: final_epoch && self.coco,
            multi_label: last_ni > s.burn_in.n_burn(),
        };
        let out = self.evaluator.evaluate(&s.ema.ema, &request)?;
        s.results = out.results;
        s.maps = out.maps;
        Ok(())
    }

    // ── Checkpointing ─────────────────────────────────────────────────────

    fn checkpoint(&mut self, s: &mut Session<D>, mloss: &LossItems, progress: &str, elapsed: Duration) -> Result<()> {
        let epoch = s.state.current_epoch;
        let final_epoch = s.state.is_final_epoch();

        let line = results_log::results_line(progress, &s.results);
        s.log.append(&line)?;
        info!("{line}");

        let fi = fitness(&s.results);
        if s.state.observe_fitness(fi) {
            info!("epoch {epoch}: new best fitness {fi:.4}");
        }

        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(EpochStats {
                epoch,
                total_epochs: s.state.total_epochs,
                mloss: *mloss,
                results: s.results,
                fitness: fi,
                best_fitness: s.state.best_fitness,
                learning_rates: s.optimizer.learning_rates(),
                img_size: s.img_size,
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }

        if !self.config.nosave || final_epoch {
            let optimizer = (!final_epoch).then(|| s.optimizer.state_dict());
            let ckpt = Checkpoint::new(epoch, s.state.best_fitness, s.log.read()?, s.ema.ema.state_dict(), optimizer);
            if s.manager.save_epoch(&ckpt, fi, final_epoch)? {
                debug!("saved {}", s.manager.best().display());
            }
        }
        Ok(())
    }

    // ── Finalizing ────────────────────────────────────────────────────────

    fn finalize(&mut self, s: &mut Session<D>) -> Result<()> {
        let mut last = s.manager.last().to_path_buf();
        let mut best = s.manager.best().to_path_buf();
        let mut results = s.log.path().to_path_buf();

        if let Some(n) = self.config.run_suffix() {
            let wdir = self.config.weights_dir();
            let renamed = [
                wdir.join(format!("last{n}.json")),
                wdir.join(format!("best{n}.json")),
                self.config.out_dir.join(format!("results{n}.txt")),
            ];
            for (from, to) in [&mut last, &mut best, &mut results].into_iter().zip(renamed) {
                if from.exists() {
                    fs::rename(&*from, &to)?;
                }
                *from = to;
            }
            s.log = ResultsLog::new(results.clone());
            s.manager = CheckpointManager::new(last.clone(), best.clone());
        }

        for ckpt in [&last, &best] {
            if ckpt.exists() {
                strip_optimizer(ckpt)?;
            }
        }

        let epochs = s.state.total_epochs.saturating_sub(s.start_epoch);
        let hours = s.started.elapsed().as_secs_f64() / 3600.0;
        info!("{epochs} epochs completed in {hours:.3} hours.");

        self.model.release_resources();
        s.ema.ema.release_resources();
        Ok(())
    }

    fn report(&self, s: Session<D>, outcome: TrainOutcome) -> TrainReport {
        TrainReport {
            outcome,
            phase: self.phase,
            results: s.results,
            maps: s.maps,
            best_fitness: s.state.best_fitness,
            start_epoch: s.start_epoch,
            resumed: s.state.is_resumed,
            total_epochs: s.state.total_epochs,
            global_iteration: s.state.global_iteration,
            last_checkpoint: s.manager.last().to_path_buf(),
            best_checkpoint: s.manager.best().to_path_buf(),
            results_file: s.log.path().to_path_buf(),
        }
    }
}

/// Deletes `*_batch*.jpg` diagnostics left by an earlier run.
fn remove_batch_plots(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let stale = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains("_batch") && n.ends_with(".jpg"));
        if stale && path.is_file() {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_plots_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("train_batch0.jpg"), b"x").unwrap();
        fs::write(dir.path().join("test_batch1.jpg"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        remove_batch_plots(dir.path()).unwrap();
        let left: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(left, vec!["notes.txt".to_string()]);
    }
}
