//! Model Module - AI/ML Inference Engine
//!
//! Tách logic inference khỏi lifecycle/training.
//! Dễ dàng swap model qua `ModelCache`.

pub mod types;
pub mod inference;
pub mod cache;
pub mod type_predictor;

// Re-export common types
pub use cache::{CacheStatus, LoadedModel, ModelCache};
pub use inference::{InferenceError, ModelLoader, OnnxLoader, Predictor};
pub use type_predictor::TypePredictor;
pub use types::{PredictionResult, ThreatPrediction, ThreatType, Verdict};
