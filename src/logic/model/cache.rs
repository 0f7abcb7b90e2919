//! Model Cache - process-local handle to the selected model
//!
//! The only object shared between the serving path (read) and the training
//! path (swap). Readers clone an `Arc` under a short read lock; a swap
//! replaces the whole `Arc`, so an in-flight prediction keeps using the
//! model it started with.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::inference::{InferenceError, Predictor};
use super::types::PredictionResult;

// ============================================================================
// LOADED MODEL
// ============================================================================

/// In-memory predictor bound to a registry record
pub struct LoadedModel {
    pub record_id: String,
    pub name: String,
    pub loaded_at: DateTime<Utc>,
    predictor: Box<dyn Predictor>,
}

impl LoadedModel {
    pub fn new(record_id: impl Into<String>, name: impl Into<String>, predictor: Box<dyn Predictor>) -> Self {
        Self {
            record_id: record_id.into(),
            name: name.into(),
            loaded_at: Utc::now(),
            predictor,
        }
    }

    pub fn predict_proba(&self, features: &[f32]) -> Result<Vec<f32>, InferenceError> {
        self.predictor.predict_proba(features)
    }
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("record_id", &self.record_id)
            .field("name", &self.name)
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

// ============================================================================
// CACHE
// ============================================================================

/// Cache status for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub model_loaded: bool,
    pub model_id: Option<String>,
    pub model_name: Option<String>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub avg_latency_ms: f32,
    pub inference_count: u64,
}

#[derive(Default)]
pub struct ModelCache {
    current: RwLock<Option<Arc<LoadedModel>>>,
    latency_sum_us: AtomicU64,
    inference_count: AtomicU64,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current model
    pub fn current(&self) -> Option<Arc<LoadedModel>> {
        self.current.read().clone()
    }

    /// Record id of the current model
    pub fn current_id(&self) -> Option<String> {
        self.current.read().as_ref().map(|m| m.record_id.clone())
    }

    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }

    /// Install a fully loaded model, returning the previous one
    ///
    /// The previous model is dropped by the caller after the lock is released.
    pub fn install(&self, model: LoadedModel) -> Option<Arc<LoadedModel>> {
        let model = Arc::new(model);
        log::info!("Model cache → {} ({})", model.name, model.record_id);
        self.current.write().replace(model)
    }

    /// Install only if `still_selected(record_id)` holds under the write lock
    ///
    /// The check and the swap happen under one lock, so a slow load of a
    /// stale selection never overwrites a newer model.
    pub fn install_if(&self, model: LoadedModel, still_selected: impl FnOnce(&str) -> bool) -> bool {
        let previous = {
            let mut current = self.current.write();
            if !still_selected(&model.record_id) {
                log::info!("Model {} no longer selected, not installed", model.record_id);
                return false;
            }
            log::info!("Model cache → {} ({})", model.name, model.record_id);
            current.replace(Arc::new(model))
        };
        drop(previous);
        true
    }

    /// Clear only if `should_clear()` holds under the write lock
    pub fn clear_if(&self, should_clear: impl FnOnce() -> bool) -> bool {
        let previous = {
            let mut current = self.current.write();
            if !should_clear() {
                return false;
            }
            current.take()
        };
        if let Some(prev) = &previous {
            log::warn!("Model cache cleared (was {})", prev.name);
        }
        true
    }

    /// Fall back to "no model loaded"
    pub fn clear(&self) -> Option<Arc<LoadedModel>> {
        let previous = self.current.write().take();
        if let Some(prev) = &previous {
            log::warn!("Model cache cleared (was {})", prev.name);
        }
        previous
    }

    /// Run the primary classifier. `None` when no model is loaded.
    pub fn predict(&self, features: &[f32]) -> Option<Result<PredictionResult, InferenceError>> {
        let model = self.current()?;
        let start = Instant::now();

        let result = model.predict_proba(features).and_then(|probs| {
            let (prediction, normal, anomaly) = PredictionResult::from_probabilities(&probs)
                .ok_or_else(|| InferenceError::Run("empty probability output".to_string()))?;
            Ok(PredictionResult {
                prediction,
                normal,
                anomaly,
                model_id: model.record_id.clone(),
                model_name: model.name.clone(),
                inference_time_us: start.elapsed().as_micros() as u64,
            })
        });

        if let Ok(r) = &result {
            self.latency_sum_us.fetch_add(r.inference_time_us, Ordering::Relaxed);
            self.inference_count.fetch_add(1, Ordering::Relaxed);
        }

        Some(result)
    }

    pub fn status(&self) -> CacheStatus {
        let current = self.current();
        let sum = self.latency_sum_us.load(Ordering::Relaxed);
        let count = self.inference_count.load(Ordering::Relaxed);
        let avg = if count > 0 { (sum as f32 / count as f32) / 1000.0 } else { 0.0 };

        CacheStatus {
            model_loaded: current.is_some(),
            model_id: current.as_ref().map(|m| m.record_id.clone()),
            model_name: current.as_ref().map(|m| m.name.clone()),
            loaded_at: current.as_ref().map(|m| m.loaded_at),
            avg_latency_ms: avg,
            inference_count: count,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Predictor returning fixed probabilities
    pub struct FixedPredictor(pub Vec<f32>);

    impl Predictor for FixedPredictor {
        fn predict_proba(&self, _features: &[f32]) -> Result<Vec<f32>, InferenceError> {
            Ok(self.0.clone())
        }
    }

    pub fn fixed_model(id: &str, probs: Vec<f32>) -> LoadedModel {
        LoadedModel::new(id, format!("{}-name", id), Box::new(FixedPredictor(probs)))
    }

    /// Loads any existing file as a fixed predictor
    pub struct StubLoader(pub Vec<f32>);

    impl crate::logic::model::ModelLoader for StubLoader {
        fn load(&self, path: &std::path::Path) -> Result<Box<dyn Predictor>, InferenceError> {
            if path.is_file() {
                Ok(Box::new(FixedPredictor(self.0.clone())))
            } else {
                Err(InferenceError::NotFound(path.display().to_string()))
            }
        }
    }
}
