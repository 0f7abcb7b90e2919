//! API Module - HTTP serving shell
//!
//! Thin axum layer over `MlService`:
//! - `POST /analyze` - primary classification (200 / 400 / 503)
//! - `GET /health` - liveness + model presence
//! - `GET /status` - loaded model, training session, notification queue

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::logic::service::MlService;

pub use error::{ApiError, ApiResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MlService>,
}

/// Create the router with all routes
pub fn create_router(service: Arc<MlService>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/analyze", post(handlers::analyze))
        .with_state(AppState { service })
}
