//! Control Plane Client
//!
//! HTTP client for the backend that owns model settings, the labelled
//! request log and threat analysis results. Every request carries the
//! service identification header.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::constants::SERVICE_HEADER;
use crate::logic::features::extractor::value_to_text;
use crate::logic::features::RequestDescriptor;
use crate::logic::notify::{NotificationSink, QueuedNotification};
use crate::logic::registry::RemoteModel;

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Server error: {0}")]
    Server(u16),
    #[error("Parse error: {0}")]
    Parse(String),
}

// ============================================================================
// WIRE TYPES
// ============================================================================

/// `GET /changes`
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ChangeSignal {
    #[serde(default)]
    pub model_setting_updated: bool,
}

/// `POST /model/results` (metrics in percent, 2 decimals)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelResults {
    pub id: String,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub model_type: String,
}

/// `GET /models/selected`
#[derive(Debug, Default, Deserialize)]
struct SelectedResponse {
    #[serde(default)]
    model: Option<RemoteModel>,
}

/// `GET /requests`
#[derive(Debug, Default, Deserialize)]
struct RequestsResponse {
    #[serde(default)]
    requests: Vec<LabelledRequest>,
}

/// One entry of the labelled request log
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LabelledRequest {
    #[serde(default)]
    pub url: serde_json::Value,
    #[serde(default)]
    pub headers: serde_json::Value,
    #[serde(default)]
    pub body: serde_json::Value,
    #[serde(default)]
    pub label: serde_json::Value,
}

impl LabelledRequest {
    pub fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor::new(value_to_text(&self.url), value_to_text(&self.headers), value_to_text(&self.body))
    }

    /// 1 = malicious, anything else benign
    pub fn label(&self) -> u8 {
        match &self.label {
            serde_json::Value::Bool(true) => 1,
            serde_json::Value::Number(n) if n.as_f64() == Some(1.0) => 1,
            serde_json::Value::String(s) if s.trim() == "1" => 1,
            _ => 0,
        }
    }
}

// ============================================================================
// TRAIT
// ============================================================================

#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn list_models(&self) -> Result<Vec<RemoteModel>, ControlPlaneError>;
    async fn selected_model(&self) -> Result<Option<RemoteModel>, ControlPlaneError>;
    async fn changes(&self) -> Result<ChangeSignal, ControlPlaneError>;
    async fn post_results(&self, results: &ModelResults) -> Result<(), ControlPlaneError>;
    async fn submit_analysis(&self, batch: &[QueuedNotification]) -> Result<(), ControlPlaneError>;
    async fn fetch_requests(&self) -> Result<Vec<LabelledRequest>, ControlPlaneError>;
    async fn download_artifact(&self, id: &str) -> Result<Vec<u8>, ControlPlaneError>;
}

// ============================================================================
// HTTP IMPLEMENTATION
// ============================================================================

pub struct HttpControlPlane {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpControlPlane {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ControlPlaneError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ControlPlaneError::Network(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, ControlPlaneError> {
        let response = self.http_client
            .get(self.url(path))
            .header(SERVICE_HEADER.0, SERVICE_HEADER.1)
            .send()
            .await
            .map_err(|e| ControlPlaneError::Network(e.to_string()))?;
        check_status(response)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ControlPlaneError> {
        self.get(path).await?
            .json()
            .await
            .map_err(|e| ControlPlaneError::Parse(e.to_string()))
    }

    async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<(), ControlPlaneError> {
        let response = self.http_client
            .post(self.url(path))
            .header(SERVICE_HEADER.0, SERVICE_HEADER.1)
            .json(body)
            .send()
            .await
            .map_err(|e| ControlPlaneError::Network(e.to_string()))?;
        check_status(response).map(|_| ())
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ControlPlaneError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(ControlPlaneError::Server(response.status().as_u16()))
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn list_models(&self) -> Result<Vec<RemoteModel>, ControlPlaneError> {
        self.get_json("/models").await
    }

    async fn selected_model(&self) -> Result<Option<RemoteModel>, ControlPlaneError> {
        let response: SelectedResponse = self.get_json("/models/selected").await?;
        Ok(response.model)
    }

    async fn changes(&self) -> Result<ChangeSignal, ControlPlaneError> {
        self.get_json("/changes").await
    }

    async fn post_results(&self, results: &ModelResults) -> Result<(), ControlPlaneError> {
        self.post_json("/model/results", results).await
    }

    async fn submit_analysis(&self, batch: &[QueuedNotification]) -> Result<(), ControlPlaneError> {
        self.post_json("/submit-analysis", batch).await
    }

    async fn fetch_requests(&self) -> Result<Vec<LabelledRequest>, ControlPlaneError> {
        let response: RequestsResponse = self.get_json("/requests").await?;
        Ok(response.requests)
    }

    async fn download_artifact(&self, id: &str) -> Result<Vec<u8>, ControlPlaneError> {
        let path = format!("/models/{}/file", urlencoding::encode(id));
        let bytes = self.get(&path).await?
            .bytes()
            .await
            .map_err(|e| ControlPlaneError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

// ============================================================================
// NOTIFICATION SINK ADAPTER
// ============================================================================

/// Routes batcher flushes to `POST /submit-analysis`
pub struct AnalysisSink(pub std::sync::Arc<dyn ControlPlane>);

#[async_trait]
impl NotificationSink for AnalysisSink {
    async fn deliver(&self, batch: &[QueuedNotification]) -> Result<(), ControlPlaneError> {
        self.0.submit_analysis(batch).await
    }
}
