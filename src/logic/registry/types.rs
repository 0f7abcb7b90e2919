//! Registry Types
//!
//! `ModelRecord` + the control plane's wire shape for model rows.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::MODEL_FILE_EXTENSION;

// ============================================================================
// METRICS
// ============================================================================

/// Observed quality metrics, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl Metrics {
    pub fn new(accuracy: f64, precision: f64, recall: f64, f1: f64) -> Self {
        Self { accuracy, precision, recall, f1 }
    }

    /// Same metrics on the percent scale
    pub fn as_percent(&self) -> [f64; 4] {
        [self.accuracy * 100.0, self.precision * 100.0, self.recall * 100.0, self.f1 * 100.0]
    }
}

/// Minimum expected metrics, percent scale (0 - 100)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Thresholds {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl Thresholds {
    pub fn new(accuracy: f64, precision: f64, recall: f64, f1: f64) -> Self {
        Self { accuracy, precision, recall, f1 }
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.accuracy, self.precision, self.recall, self.f1]
    }
}

// ============================================================================
// MODEL RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRecord {
    pub id: String,
    pub predecessor_id: Option<String>,
    /// Unique, doubles as the artifact file stem
    pub name: String,
    /// Labelled samples used for training
    pub requests_used: u64,
    pub metrics: Option<Metrics>,
    pub expected: Option<Thresholds>,
    pub selected: bool,
    pub updated_at: DateTime<Utc>,
    pub last_trained_at: Option<DateTime<Utc>>,
    /// Retraining interval in minutes; `None` = never auto-retrain
    pub train_every: Option<f64>,
    pub artifact_sha256: Option<String>,
}

impl ModelRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            predecessor_id: None,
            name: name.into(),
            requests_used: 0,
            metrics: None,
            expected: None,
            selected: false,
            updated_at: Utc::now(),
            last_trained_at: None,
            train_every: None,
            artifact_sha256: None,
        }
    }

    /// Fresh unselected candidate chained to `predecessor`
    ///
    /// Thresholds and schedule carry over so the chain keeps training.
    pub fn candidate(name: impl Into<String>, predecessor: Option<&ModelRecord>) -> Self {
        let mut record = Self::new(uuid::Uuid::new_v4().to_string(), name);
        if let Some(prev) = predecessor {
            record.predecessor_id = Some(prev.id.clone());
            record.expected = prev.expected;
            record.train_every = prev.train_every;
        }
        record
    }

    /// Artifact file name (`<name>.<ext>`)
    pub fn artifact_file_name(&self) -> String {
        artifact_file_name(&self.name)
    }

    /// Retraining interval as a duration
    pub fn train_interval(&self) -> Option<chrono::Duration> {
        self.train_every
            .filter(|m| m.is_finite() && *m >= 0.0)
            .map(|minutes| chrono::Duration::milliseconds((minutes * 60_000.0) as i64))
    }
}

pub fn artifact_file_name(name: &str) -> String {
    format!("{}.{}", name, MODEL_FILE_EXTENSION)
}

// ============================================================================
// CONTROL PLANE ROWS
// ============================================================================

/// Model row as served by `GET /models` / `GET /models/selected`
///
/// Metrics arrive on the percent scale (the same scale `/model/results`
/// reports), thresholds too.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteModel {
    #[serde(deserialize_with = "id_text")]
    pub id: String,
    #[serde(alias = "models_name", alias = "model_type")]
    pub name: String,
    #[serde(default, alias = "number_requests_used")]
    pub requests_used: Option<u64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub precision: Option<f64>,
    #[serde(default)]
    pub recall: Option<f64>,
    #[serde(default)]
    pub f1: Option<f64>,
    #[serde(default)]
    pub expected_accuracy: Option<f64>,
    #[serde(default)]
    pub expected_precision: Option<f64>,
    #[serde(default)]
    pub expected_recall: Option<f64>,
    #[serde(default)]
    pub expected_f1: Option<f64>,
    #[serde(default)]
    pub selected: Option<bool>,
    #[serde(default)]
    pub train_every: Option<f64>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub last_trained_at: Option<DateTime<Utc>>,
}

impl RemoteModel {
    /// Local record (unselected; selection is applied separately)
    pub fn into_record(self) -> ModelRecord {
        let metrics = any_present([self.accuracy, self.precision, self.recall, self.f1]).map(|m| {
            Metrics::new(m[0] / 100.0, m[1] / 100.0, m[2] / 100.0, m[3] / 100.0)
        });
        let expected = any_present([
            self.expected_accuracy,
            self.expected_precision,
            self.expected_recall,
            self.expected_f1,
        ])
        .map(|t| Thresholds::new(t[0], t[1], t[2], t[3]));

        let mut record = ModelRecord::new(self.id, self.name);
        record.requests_used = self.requests_used.unwrap_or(0);
        record.metrics = metrics;
        record.expected = expected;
        record.train_every = self.train_every;
        record.last_trained_at = self.last_trained_at;
        record
    }
}

/// `Some` if any component is set; missing components count as 0
pub(crate) fn any_present(values: [Option<f64>; 4]) -> Option<[f64; 4]> {
    if values.iter().all(Option::is_none) {
        return None;
    }
    Some(values.map(|v| v.unwrap_or(0.0)))
}

/// Accept string or numeric ids
fn id_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid model id: {}", other))),
    }
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.as_deref().and_then(parse_timestamp))
}

/// RFC 3339, or a naive timestamp taken as UTC
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}
