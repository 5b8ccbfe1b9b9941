use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::eval::FitnessVector;
use crate::loss::LossItems;

/// Formats like C's `%.{precision}g`: `precision` significant digits,
/// scientific notation for exponents below -4 or at/above `precision`,
/// trailing zeros removed.
pub fn fmt_g(value: f64, precision: usize) -> String {
    if value.is_nan() {
        return "nan".into();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if value == 0.0 {
        return "0".into();
    }
    let p = precision.max(1);
    let sci = format!("{:.*e}", p - 1, value);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);

    if exp < -4 || exp >= p as i32 {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_zeros(mantissa), exp.abs())
    } else {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        trim_zeros(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// `%10.3g`
fn g10(value: f64) -> String {
    format!("{:>10}", fmt_g(value, 3))
}

/// Column header printed before each epoch.
pub fn header() -> String {
    ["Epoch", "gpu_mem", "GIoU", "obj", "cls", "total", "targets", "img_size"]
        .iter()
        .map(|h| format!("{h:>10}"))
        .collect()
}

/// Progress columns: `epoch/last`, memory, the four mean losses, target
/// count and image size.
pub fn progress_line(
    epoch: usize,
    total_epochs: usize,
    memory_bytes: u64,
    mloss: &LossItems,
    targets: usize,
    img_size: u32,
) -> String {
    let mut s = format!("{:>10}", format!("{epoch}/{}", total_epochs.saturating_sub(1)));
    s.push_str(&format!("{:>10}", format!("{}G", fmt_g(memory_bytes as f64 / 1e9, 3))));
    for v in mloss.0 {
        s.push_str(&g10(v));
    }
    s.push_str(&g10(targets as f64));
    s.push_str(&g10(img_size as f64));
    s
}

/// A results row: the progress columns followed by the seven validation values.
pub fn results_line(progress: &str, results: &FitnessVector) -> String {
    let mut s = progress.to_string();
    for v in results.as_array() {
        s.push_str(&g10(v));
    }
    s
}

/// Append-only per-epoch results file.
#[derive(Debug, Clone)]
pub struct ResultsLog {
    path: PathBuf,
}

impl ResultsLog {
    pub fn new(path: impl Into<PathBuf>) -> ResultsLog {
        ResultsLog { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the file if present.
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    pub fn append(&self, line: &str) -> Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Whole log, or an empty string before the first epoch.
    pub fn read(&self) -> Result<String> {
        if !self.path.exists() {
            return Ok(String::new());
        }
        Ok(fs::read_to_string(&self.path)?)
    }

    /// Replaces the log with text carried in a checkpoint.
    pub fn restore(&self, text: &str) -> Result<()> {
        fs::write(&self.path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn g_format_matches_printf() {
        assert_eq!(fmt_g(0.0, 3), "0");
        assert_eq!(fmt_g(1.0, 3), "1");
        assert_eq!(fmt_g(3.14159, 3), "3.14");
        assert_eq!(fmt_g(0.000123456, 3), "0.000123");
        assert_eq!(fmt_g(0.0000123456, 3), "1.23e-05");
        assert_eq!(fmt_g(640.0, 3), "640");
        assert_eq!(fmt_g(1234.0, 3), "1.23e+03");
        assert_eq!(fmt_g(-0.5, 3), "-0.5");
        assert_eq!(fmt_g(999.9, 3), "1e+03");
    }

    #[test]
    fn lines_are_fixed_width() {
        let progress = progress_line(3, 10, 1_500_000_000, &LossItems::new(1.0, 2.0, 0.5), 17, 320);
        assert_eq!(progress.len(), 80);
        assert!(progress.starts_with("       3/9"));
        let line = results_line(&progress, &FitnessVector::default());
        assert_eq!(line.len(), 150);
        assert_eq!(header().len(), 80);
    }

    #[test]
    fn log_appends_and_restores() {
        let dir = tempfile::tempdir().unwrap();
        let log = ResultsLog::new(dir.path().join("results.txt"));
        assert_eq!(log.read().unwrap(), "");
        log.append("a").unwrap();
        log.append("b").unwrap();
        assert_eq!(log.read().unwrap(), "a\nb\n");
        log.clear().unwrap();
        assert!(!log.path().exists());
        log.restore("x\n").unwrap();
        log.append("y").unwrap();
        assert_eq!(log.read().unwrap(), "x\ny\n");
    }
}
