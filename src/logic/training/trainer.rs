//! Trainer seam
//!
//! Training itself is opaque: given a dataset file it writes a model
//! artifact and reports quality metrics. The default trainer shells out to
//! an external program.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::logic::registry::Metrics;

use super::TrainingError;

/// One training run's inputs
#[derive(Debug, Clone)]
pub struct TrainingJob {
    /// CSV dataset (layout keys + `label`)
    pub dataset: PathBuf,
    /// Where the artifact must be written
    pub output: PathBuf,
    pub rows: usize,
}

/// Blocking trainer, run on the blocking pool
pub trait Trainer: Send + Sync {
    fn train(&self, job: &TrainingJob) -> Result<Metrics, TrainingError>;
}

/// Runs `<program> [args..] <dataset> <output>`; the last stdout line must
/// be a JSON object `{accuracy, precision, recall, f1}` in [0, 1].
#[derive(Debug, Clone)]
pub struct CommandTrainer {
    program: String,
    args: Vec<String>,
}

impl CommandTrainer {
    /// From a whitespace-split command line; `None` if empty
    pub fn from_parts(parts: &[String]) -> Option<Self> {
        let (program, args) = parts.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Trainer for CommandTrainer {
    fn train(&self, job: &TrainingJob) -> Result<Metrics, TrainingError> {
        log::info!("Running trainer: {} ({} rows)", self.program, job.rows);

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&job.dataset)
            .arg(&job.output)
            .output()
            .map_err(|e| TrainingError::Trainer(format!("spawn {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TrainingError::Trainer(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let metrics = parse_metrics_line(&stdout)?;
        ensure_artifact(&job.output)?;
        Ok(metrics)
    }
}

/// Metrics from the last non-empty line of trainer output
pub fn parse_metrics_line(stdout: &str) -> Result<Metrics, TrainingError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .ok_or_else(|| TrainingError::InvalidMetrics("trainer printed nothing".to_string()))?;

    let metrics: Metrics =
        serde_json::from_str(line).map_err(|e| TrainingError::InvalidMetrics(format!("{}: {}", e, line)))?;
    validate_metrics(&metrics)?;
    Ok(metrics)
}

pub fn validate_metrics(metrics: &Metrics) -> Result<(), TrainingError> {
    let values = [metrics.accuracy, metrics.precision, metrics.recall, metrics.f1];
    if values.iter().all(|v| v.is_finite() && (0.0..=1.0).contains(v)) {
        Ok(())
    } else {
        Err(TrainingError::InvalidMetrics(format!("out of range: {:?}", metrics)))
    }
}

pub fn ensure_artifact(path: &Path) -> Result<(), TrainingError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(TrainingError::MissingArtifact(path.to_path_buf()))
    }
}
