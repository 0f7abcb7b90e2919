//! Request handlers

use axum::{body::Bytes, extract::State, Json};
use serde::Serialize;
use serde_json::Value;

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::constants;
use crate::logic::features::extractor::value_to_text;
use crate::logic::features::RequestDescriptor;
use crate::logic::model::Verdict;
use crate::logic::service::ServiceStatus;

// ============================================================================
// ANALYZE
// ============================================================================

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub prediction: Verdict,
    #[serde(rename = "Normal")]
    pub normal: f32,
    #[serde(rename = "Anomaly")]
    pub anomaly: f32,
}

/// Parse `{url, headers, body[, request_id]}`
///
/// Returns the request id (caller-supplied or generated) and the descriptor.
pub fn parse_analyze_body(body: &[u8]) -> ApiResult<(String, RequestDescriptor)> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;

    if !value.is_object() {
        return Err(ApiError::BadRequest("Expected a JSON object".to_string()));
    }

    let request_id = value
        .get("request_id")
        .or_else(|| value.get("id"))
        .map(value_to_text)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let descriptor: RequestDescriptor =
        serde_json::from_value(value).map_err(|e| ApiError::BadRequest(format!("Invalid request: {}", e)))?;

    Ok((request_id, descriptor))
}

/// POST /analyze
pub async fn analyze(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<AnalyzeResponse>> {
    let (request_id, descriptor) = parse_analyze_body(&body)?;

    let service = state.service.clone();
    let result = tokio::task::spawn_blocking(move || service.analyze(request_id, descriptor)).await??;

    Ok(Json(AnalyzeResponse {
        success: true,
        prediction: result.prediction,
        normal: result.normal,
        anomaly: result.anomaly,
    }))
}

// ============================================================================
// HEALTH / STATUS
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    model_loaded: bool,
    timestamp: i64,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let model_loaded = state.service.cache().is_loaded();
    Json(HealthResponse {
        status: if model_loaded { "healthy" } else { "degraded" },
        version: constants::APP_VERSION,
        model_loaded,
        timestamp: chrono::Utc::now().timestamp(),
    })
}

/// GET /status
pub async fn status(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(state.service.status())
}
