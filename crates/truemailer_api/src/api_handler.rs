//! Shared API types and utilities
//!
//! Request/response bodies and the mapping from engine errors to HTTP responses.

use crate::middleware::{current_request_id, REQUEST_ID_HEADER};
use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use truemailer_core::{ServiceError, VerificationVerdict};
use uuid::Uuid;

/// Request body for POST /v1/verify
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub email: String,
    /// Alternative to the `x-api-key` header
    pub api_key: Option<String>,
}

/// API response for a verification
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub request_id: String,
    #[serde(flatten)]
    pub verdict: VerificationVerdict,
    /// Timestamp when verification was performed (ISO 8601)
    pub checked_at: String,
}

impl VerifyResponse {
    pub fn new(request_id: String, verdict: VerificationVerdict) -> Self {
        Self {
            request_id,
            verdict,
            checked_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Request body for POST /admin/clients
#[derive(Debug, Deserialize)]
pub struct CreateClientRequest {
    pub name: String,
    #[serde(alias = "limit_per_day")]
    pub daily_limit: u32,
}

/// Request body for POST /admin/blocklist
#[derive(Debug, Deserialize)]
pub struct AddDomainsRequest {
    pub domains: Vec<String>,
}

/// Error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    pub request_id: String,
    pub timestamp: String,
}

/// Result type for API handlers
pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    InvalidApiKey,
    DailyLimitExceeded { limit: u32 },
    Unauthorized,
    InvalidRequest(String),
    RefreshFailed(String),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidApiKey => ApiError::InvalidApiKey,
            ServiceError::DailyLimitExceeded { limit } => ApiError::DailyLimitExceeded { limit },
            ServiceError::Unauthorized => ApiError::Unauthorized,
            ServiceError::InvalidRequest(msg) => ApiError::InvalidRequest(msg),
            ServiceError::Refresh(e) => ApiError::RefreshFailed(e.to_string()),
        }
    }
}

impl ApiError {
    fn parts(self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::InvalidApiKey => (
                StatusCode::UNAUTHORIZED,
                "invalid_api_key",
                "Invalid API key".to_string(),
            ),
            ApiError::DailyLimitExceeded { limit } => (
                StatusCode::TOO_MANY_REQUESTS,
                "daily_limit_exceeded",
                format!("Daily limit of {} requests exceeded", limit),
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Unauthorized".to_string(),
            ),
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg),
            ApiError::RefreshFailed(msg) => (StatusCode::BAD_GATEWAY, "refresh_failed", msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = self.parts();

        if status.is_server_error() {
            warn!("Request failed: {} ({})", message, error_code);
        }

        let request_id = current_request_id().unwrap_or_else(|| Uuid::new_v4().to_string());
        let header = HeaderValue::from_str(&request_id).ok();

        let error_response = ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            request_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        let mut response = (status, Json(error_response)).into_response();
        if let Some(value) = header {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
}
