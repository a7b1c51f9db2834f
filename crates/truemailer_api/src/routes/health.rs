//! Health check and status routes

use crate::AppState;
use axum::{extract::State, response::Json};
use serde::Serialize;
use std::sync::Arc;
use truemailer_core::ServiceStatus;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint - GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub version: String,
    #[serde(flatten)]
    pub status: ServiceStatus,
    pub timestamp: String,
}

/// Status introspection - GET /status
///
/// Loaded blocklist size and generation, provisioned client ids and the number of
/// trusted providers.
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: state.service.status(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
