use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::activation::activation::ActivationFunction;
use crate::error::{Error, Result};

/// One hidden layer of a detector architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub size: usize,
    pub activation: ActivationFunction,
}

/// Model-architecture descriptor for `DenseDetector`, stored as JSON.
///
/// Input planes are average-pooled to `pool × pool` cells before the
/// hidden layers; a linear head producing `5 + nc` values per image
/// (objectness, box, class scores) is appended automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureSpec {
    /// Human-readable name used in logs.
    pub name: String,
    pub pool: usize,
    /// Hidden layers, input → output.
    pub layers: Vec<LayerSpec>,
    /// Optional class names shown in logs and diagnostics.
    #[serde(default)]
    pub names: Vec<String>,
}

impl ArchitectureSpec {
    /// A small two-hidden-layer detector.
    pub fn tiny() -> ArchitectureSpec {
        ArchitectureSpec {
            name: "detector-tiny".into(),
            pool: 8,
            layers: vec![
                LayerSpec { size: 32, activation: ActivationFunction::LeakyReLU { alpha: 0.1 } },
                LayerSpec { size: 16, activation: ActivationFunction::LeakyReLU { alpha: 0.1 } },
            ],
            names: Vec::new(),
        }
    }

    pub fn input_size(&self) -> usize {
        self.pool * self.pool
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool == 0 {
            return Err(Error::Config(format!("{}: pool must be at least 1", self.name)));
        }
        if let Some(i) = self.layers.iter().position(|l| l.size == 0) {
            return Err(Error::Config(format!("{}: layer {i} has no units", self.name)));
        }
        Ok(())
    }

    /// Serializes the spec to a pretty-printed JSON file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes an `ArchitectureSpec` from a JSON file.
    pub fn load_json(path: &Path) -> Result<ArchitectureSpec> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let spec: ArchitectureSpec = serde_json::from_reader(reader)?;
        spec.validate()?;
        Ok(spec)
    }
}
