//! Threat Type Predictor - secondary classification
//!
//! Runs only after a primary `Anomaly` verdict. The model is optional:
//! without it, anomalies are still flagged but never typed.

use std::path::Path;

use super::inference::{ModelLoader, Predictor};
use super::types::{ThreatPrediction, ThreatType};

pub struct TypePredictor {
    model: Option<Box<dyn Predictor>>,
}

impl TypePredictor {
    /// Load from an artifact path; load failure disables typing
    pub fn load(loader: &dyn ModelLoader, path: Option<&Path>) -> Self {
        let model = match path {
            Some(p) => match loader.load(p) {
                Ok(m) => {
                    log::info!("Threat type model loaded from {}", p.display());
                    Some(m)
                }
                Err(e) => {
                    log::warn!("Threat type model unavailable: {}", e);
                    None
                }
            },
            None => {
                log::info!("No threat type model configured");
                None
            }
        };
        Self { model }
    }

    pub fn with_predictor(predictor: Box<dyn Predictor>) -> Self {
        Self { model: Some(predictor) }
    }

    pub fn disabled() -> Self {
        Self { model: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.model.is_some()
    }

    /// Most likely threat type; `None` when disabled, failed or unmapped
    pub fn predict(&self, features: &[f32]) -> Option<ThreatPrediction> {
        let model = self.model.as_ref()?;

        let probs = match model.predict_proba(features) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("Threat type prediction failed: {}", e);
                return None;
            }
        };

        let (index, confidence) = probs
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, p)| p.is_finite())
            .max_by(|a, b| a.1.total_cmp(&b.1))?;

        // Class ids are 1-based
        let threat_type = ThreatType::from_class_id(index as u32 + 1)?;
        Some(ThreatPrediction { threat_type, confidence })
    }
}
