//! Dataset Module - Training data for the anomaly model
//!
//! Turns the control plane's labelled request log into anomaly-mode feature
//! rows and writes them as CSV for the trainer.

pub mod writer;

#[cfg(test)]
mod tests;

pub use writer::{DatasetFile, DatasetWriter, LABEL_COLUMN};

use crate::logic::control_plane::LabelledRequest;
use crate::logic::features::{FeatureExtractor, FeatureVector};

/// Normal rows kept per anomalous row when balancing a fresh log
pub const NORMAL_PER_ANOMALY: usize = 2;

/// Labelled anomaly-mode rows
pub fn build_rows(extractor: &FeatureExtractor, requests: &[LabelledRequest]) -> Vec<FeatureVector> {
    requests
        .iter()
        .map(|r| extractor.extract_labelled(&r.descriptor(), r.label()))
        .collect()
}

/// Keep every anomalous row and at most `ratio` normal rows per anomaly
///
/// Normal rows are sampled at an even stride so the pick is deterministic
/// and spread across the log.
pub fn balance_rows(rows: Vec<FeatureVector>, ratio: usize) -> Vec<FeatureVector> {
    let (anomalous, normal): (Vec<_>, Vec<_>) = rows.into_iter().partition(|r| r.label() == Some(1));
    let keep = normal.len().min(anomalous.len().saturating_mul(ratio));
    if keep == normal.len() {
        return normal.into_iter().chain(anomalous).collect();
    }

    let total = normal.len();
    let mut picked = Vec::with_capacity(keep + anomalous.len());
    picked.extend(
        normal
            .into_iter()
            .enumerate()
            .filter(|(i, _)| keep > 0 && (i * keep) % total < keep)
            .map(|(_, r)| r),
    );
    picked.extend(anomalous);
    picked
}
