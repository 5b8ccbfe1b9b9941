use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Parsed `*.data` dataset descriptor.
///
/// ```text
/// classes=1
/// train=data/train.txt
/// valid=data/valid.txt
/// names=data/drone.names
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DataDescriptor {
    pub source: PathBuf,
    pub classes: usize,
    pub train: String,
    pub valid: String,
    pub names: Option<String>,
}

impl DataDescriptor {
    pub fn load(path: &Path) -> Result<DataDescriptor> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, source: &Path) -> Result<DataDescriptor> {
        let mut classes = None;
        let mut train = None;
        let mut valid = None;
        let mut names = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::Config(format!("{}: malformed line {line:?}", source.display()))
            })?;
            let value = value.trim().to_string();
            match key.trim() {
                "classes" => {
                    classes = Some(value.parse::<usize>().map_err(|e| {
                        Error::Config(format!("{}: classes={value}: {e}", source.display()))
                    })?)
                }
                "train" => train = Some(value),
                "valid" => valid = Some(value),
                "names" => names = Some(value),
                _ => {}
            }
        }

        let missing = |key: &str| Error::Config(format!("{}: missing `{key}`", source.display()));
        Ok(DataDescriptor {
            source: source.to_path_buf(),
            classes: classes.ok_or_else(|| missing("classes"))?,
            train: train.ok_or_else(|| missing("train"))?,
            valid: valid.ok_or_else(|| missing("valid"))?,
            names,
        })
    }

    /// Number of classes the run trains with.
    pub fn class_count(&self, single_cls: bool) -> usize {
        if single_cls { 1 } else { self.classes }
    }

    /// True for the COCO descriptors whose results may be exported as JSON.
    pub fn is_coco(&self) -> bool {
        let name = self.source.to_string_lossy();
        ["coco.data", "coco2014.data", "coco2017.data"]
            .iter()
            .any(|c| name.contains(c))
    }
}
