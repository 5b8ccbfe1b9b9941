use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Immutable run context, built once (from the CLI or a JSON file) and passed
/// by reference to every component of a training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub epochs: usize,
    /// Images per iteration; the effective batch is always 64 via accumulation.
    pub batch_size: usize,
    /// Model-architecture descriptor.
    pub cfg: PathBuf,
    /// Dataset descriptor (`*.data`).
    pub data: PathBuf,
    pub multi_scale: bool,
    /// `[min_train, max_train, test]`; shorter lists repeat the last value.
    pub img_size: Vec<u32>,
    /// Rectangular training (disables shuffling).
    pub rect: bool,
    /// Resume from `weights/last.json` unless `weights` is given.
    pub resume: bool,
    /// Only save the final checkpoint.
    pub nosave: bool,
    /// Only evaluate the final epoch.
    pub notest: bool,
    pub cache_images: bool,
    /// Initial weights.
    pub weights: Option<PathBuf>,
    /// Suffix appended to the final artifacts, e.g. `results_<name>.txt`.
    pub name: String,
    /// `cpu` or an accelerator id such as `0`.
    pub device: String,
    pub single_cls: bool,
    /// Use reduced-precision forward/backward when the device supports it.
    pub mixed_precision: bool,
    /// Optional hyperparameter JSON overriding the defaults.
    pub hyp: Option<PathBuf>,
    pub seed: u64,
    /// Root for `weights/`, `results*.txt` and diagnostic images.
    pub out_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            epochs: 5,
            batch_size: 5,
            cfg: PathBuf::from("cfg/detector-tiny.json"),
            data: PathBuf::from("data/dronedata.data"),
            multi_scale: false,
            img_size: vec![320, 640],
            rect: false,
            resume: false,
            nosave: false,
            notest: false,
            cache_images: false,
            weights: None,
            name: String::new(),
            device: String::from("cpu"),
            single_cls: false,
            mixed_precision: true,
            hyp: None,
            seed: 0,
            out_dir: PathBuf::from("."),
        }
    }
}

impl RunConfig {
    pub const LAST: &'static str = "last.json";
    pub const BEST: &'static str = "best.json";
    pub const RESULTS: &'static str = "results.txt";

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::Config("epochs must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        Ok(())
    }

    pub fn weights_dir(&self) -> PathBuf {
        self.out_dir.join("weights")
    }

    pub fn last_checkpoint(&self) -> PathBuf {
        self.weights_dir().join(Self::LAST)
    }

    pub fn best_checkpoint(&self) -> PathBuf {
        self.weights_dir().join(Self::BEST)
    }

    pub fn results_file(&self) -> PathBuf {
        self.out_dir.join(Self::RESULTS)
    }

    /// Weights to initialise from. A resumed run without explicit weights
    /// continues from the "last" slot.
    pub fn initial_weights(&self) -> Option<PathBuf> {
        match (&self.weights, self.resume) {
            (Some(w), _) => Some(w.clone()),
            (None, true) => Some(self.last_checkpoint()),
            (None, false) => None,
        }
    }

    /// Artifact suffix for the run name: `_name`, or the bare name when numeric.
    pub fn run_suffix(&self) -> Option<String> {
        let n = self.name.trim();
        if n.is_empty() {
            None
        } else if n.chars().all(|c| c.is_ascii_digit()) {
            Some(n.to_string())
        } else {
            Some(format!("_{n}"))
        }
    }

    pub fn load_json(path: &Path) -> Result<RunConfig> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}
