//! Inference Engine - ONNX Runtime Integration
//!
//! Load và chạy ONNX classifier artifacts.
//! `Predictor`/`ModelLoader` là seam để dễ swap model (và stub trong tests).

use std::path::Path;

use ndarray::Array2;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use parking_lot::Mutex;

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Model not found: {0}")]
    NotFound(String),
    #[error("Failed to load model: {0}")]
    Load(String),
    #[error("Inference failed: {0}")]
    Run(String),
    #[error("Checksum mismatch for {name}: expected {expected}, got {actual}")]
    Checksum {
        name: String,
        expected: String,
        actual: String,
    },
}

// ============================================================================
// TRAITS
// ============================================================================

/// A loaded classifier
pub trait Predictor: Send + Sync {
    /// Class probabilities for one feature row
    fn predict_proba(&self, features: &[f32]) -> Result<Vec<f32>, InferenceError>;
}

/// Turns an artifact on disk into a predictor
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn Predictor>, InferenceError>;
}

// ============================================================================
// ONNX IMPLEMENTATION
// ============================================================================

/// Preferred output of sklearn-onnx classifiers exported with `zipmap=False`
const PROBABILITY_OUTPUT: &str = "probabilities";

/// ONNX-backed predictor
pub struct OnnxPredictor {
    session: Mutex<Session>,
    output_name: String,
}

impl OnnxPredictor {
    /// Load an ONNX model from file
    pub fn from_file(model_path: &Path) -> Result<Self, InferenceError> {
        log::info!("Loading ONNX model from: {}", model_path.display());

        if !model_path.exists() {
            return Err(InferenceError::NotFound(model_path.display().to_string()));
        }

        let session = Session::builder()
            .map_err(|e| InferenceError::Load(format!("session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| InferenceError::Load(format!("optimization: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| InferenceError::Load(e.to_string()))?;

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name == PROBABILITY_OUTPUT)
            .or_else(|| session.outputs.last())
            .map(|o| o.name.clone())
            .ok_or_else(|| InferenceError::Load("No output defined".to_string()))?;

        log::info!("ONNX model loaded successfully (output: {})", output_name);

        Ok(Self {
            session: Mutex::new(session),
            output_name,
        })
    }
}

impl Predictor for OnnxPredictor {
    fn predict_proba(&self, features: &[f32]) -> Result<Vec<f32>, InferenceError> {
        let input_array = Array2::<f32>::from_shape_vec((1, features.len()), features.to_vec())
            .map_err(|e| InferenceError::Run(format!("Array error: {}", e)))?;

        let input_tensor = Value::from_array(input_array)
            .map_err(|e| InferenceError::Run(format!("Tensor error: {}", e)))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| InferenceError::Run(e.to_string()))?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| InferenceError::Run("No output".to_string()))?;

        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Run(format!("Extract error: {}", e)))?;

        Ok(data.to_vec())
    }
}

/// Default loader: ONNX files
#[derive(Debug, Default, Clone, Copy)]
pub struct OnnxLoader;

impl ModelLoader for OnnxLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn Predictor>, InferenceError> {
        Ok(Box::new(OnnxPredictor::from_file(path)?))
    }
}

// ============================================================================
// ARTIFACT CHECKSUM
// ============================================================================

/// SHA-256 of an artifact, hex encoded
pub fn artifact_sha256(path: &Path) -> std::io::Result<String> {
    use sha2::{Digest, Sha256};

    let bytes = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Verify an artifact against a recorded digest
pub fn verify_checksum(path: &Path, name: &str, expected: &str) -> Result<(), InferenceError> {
    let actual = artifact_sha256(path).map_err(|e| InferenceError::Load(e.to_string()))?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(InferenceError::Checksum {
            name: name.to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}
