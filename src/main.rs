use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use ferrite_det::config::{DataDescriptor, HyperParams, RunConfig};
use ferrite_det::data::{
    DataLoader, DetectionDataset, FolderOptions, ImageFolder, LoaderOptions, Sample, SyntheticShapes,
};
use ferrite_det::error::Result;
use ferrite_det::eval::HoldoutEvaluator;
use ferrite_det::logging::init_logging;
use ferrite_det::loss::SingleBoxLoss;
use ferrite_det::network::{ArchitectureSpec, DenseDetector};
use ferrite_det::train::{TrainOutcome, Trainer};

/// Train a single-stage detector with resumable checkpoints.
#[derive(Parser, Debug)]
#[command(name = "ferrite-det", version)]
struct Args {
    /// Number of epochs.
    #[arg(long, default_value_t = 5)]
    epochs: usize,
    /// Batch size; gradients accumulate up to an effective batch of 64.
    #[arg(long, default_value_t = 5)]
    batch_size: usize,
    /// Architecture descriptor (JSON). Falls back to the built-in tiny model when absent.
    #[arg(long, default_value = "cfg/detector-tiny.json")]
    cfg: PathBuf,
    /// Dataset descriptor (`*.data`).
    #[arg(long, default_value = "data/dronedata.data")]
    data: PathBuf,
    /// Vary the training resolution between the min and max image size.
    #[arg(long)]
    multi_scale: bool,
    /// Image sizes: min, max, test. Missing values repeat the last one.
    #[arg(long, num_args = 1..=3, default_values_t = [320, 640])]
    img_size: Vec<u32>,
    /// Rectangular training.
    #[arg(long)]
    rect: bool,
    /// Resume from the last checkpoint.
    #[arg(long)]
    resume: bool,
    /// Only save the final checkpoint.
    #[arg(long)]
    nosave: bool,
    /// Only evaluate after the final epoch.
    #[arg(long)]
    notest: bool,
    /// Keep decoded images in memory.
    #[arg(long)]
    cache_images: bool,
    /// Initial weights.
    #[arg(long)]
    weights: Option<PathBuf>,
    /// Renames results.txt and the checkpoints with this suffix.
    #[arg(long, default_value = "")]
    name: String,
    /// Device id (`cpu`, `0`, ...).
    #[arg(long, default_value = "cpu")]
    device: String,
    /// Train as a single-class dataset.
    #[arg(long)]
    single_cls: bool,
    /// Disable mixed precision on accelerators.
    #[arg(long)]
    no_mixed_precision: bool,
    /// Hyperparameter overrides (JSON).
    #[arg(long)]
    hyp: Option<PathBuf>,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Directory for results, diagnostics and `weights/`.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
    /// Per-batch progress lines.
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn run_config(&self) -> RunConfig {
        RunConfig {
            epochs: self.epochs,
            batch_size: self.batch_size,
            cfg: self.cfg.clone(),
            data: self.data.clone(),
            multi_scale: self.multi_scale,
            img_size: self.img_size.clone(),
            rect: self.rect,
            resume: self.resume,
            nosave: self.nosave,
            notest: self.notest,
            cache_images: self.cache_images,
            weights: self.weights.clone(),
            name: self.name.clone(),
            device: self.device.clone(),
            single_cls: self.single_cls,
            mixed_precision: !self.no_mixed_precision,
            hyp: self.hyp.clone(),
            seed: self.seed,
            out_dir: self.out_dir.clone(),
        }
    }
}

/// Either dataset kind a descriptor can point at.
enum Source {
    Synthetic(SyntheticShapes),
    Folder(ImageFolder),
}

impl Source {
    fn open(source: &str, nc: usize, seed: u64, options: FolderOptions) -> Result<Source> {
        match SyntheticShapes::from_source(source, nc, seed) {
            Some(ds) => Ok(Source::Synthetic(ds)),
            None => Ok(Source::Folder(ImageFolder::open(Path::new(source), options)?)),
        }
    }
}

impl DetectionDataset for Source {
    fn len(&self) -> usize {
        match self {
            Source::Synthetic(ds) => ds.len(),
            Source::Folder(ds) => ds.len(),
        }
    }

    fn labels(&self) -> Vec<Vec<usize>> {
        match self {
            Source::Synthetic(ds) => ds.labels(),
            Source::Folder(ds) => ds.labels(),
        }
    }

    fn load(&self, index: usize, img_size: u32, augment: bool) -> Result<Sample> {
        match self {
            Source::Synthetic(ds) => ds.load(index, img_size, augment),
            Source::Folder(ds) => ds.load(index, img_size, augment),
        }
    }
}

fn train(config: RunConfig) -> Result<TrainOutcome> {
    std::fs::create_dir_all(&config.out_dir)?;
    config.save_json(&config.out_dir.join("opt.json"))?;

    let hyp = match &config.hyp {
        Some(path) => HyperParams::load_json(path)?,
        None => HyperParams::default(),
    };

    let descriptor = DataDescriptor::load(&config.data)?;
    let nc = descriptor.class_count(config.single_cls);

    let spec = if config.cfg.exists() {
        ArchitectureSpec::load_json(&config.cfg)?
    } else {
        warn!("{} not found, using the built-in tiny architecture", config.cfg.display());
        ArchitectureSpec::tiny()
    };
    info!("Architecture {} with {nc} classes", spec.name);
    let model = DenseDetector::new(spec, nc, config.seed)?;

    let folder = FolderOptions { cache_images: config.cache_images, single_cls: config.single_cls, hsv_v: hyp.hsv_v };
    let train_set = Source::open(&descriptor.train, nc, config.seed, folder.clone())?;
    let valid_set = Source::open(&descriptor.valid, nc, config.seed.wrapping_add(1), folder)?;

    let train_loader = DataLoader::new(
        train_set,
        LoaderOptions { batch_size: config.batch_size, shuffle: !config.rect, augment: true, seed: config.seed },
    )?;
    let valid_loader = DataLoader::new(
        valid_set,
        LoaderOptions { batch_size: config.batch_size, shuffle: false, augment: false, seed: config.seed },
    )?;
    let evaluator = HoldoutEvaluator::new(valid_loader, SingleBoxLoss)
        .with_json_output(config.out_dir.join("results.json"));

    let coco = descriptor.is_coco() && nc == 80;
    let report = Trainer::new(config, hyp, model, train_loader, SingleBoxLoss, evaluator)
        .with_coco_eval(coco)
        .run()?;

    info!(
        "best fitness {:.4}, final mAP {:.4}, weights in {}",
        report.best_fitness,
        report.results.map,
        report.last_checkpoint.display()
    );
    Ok(report.outcome)
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match train(args.run_config()) {
        Ok(TrainOutcome::Completed) => ExitCode::SUCCESS,
        Ok(TrainOutcome::Diverged { epoch, iteration }) => {
            error!("training diverged at epoch {epoch}, iteration {iteration}");
            ExitCode::from(2)
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
