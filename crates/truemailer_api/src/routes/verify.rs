//! Email verification route handler

use crate::{
    api_handler::{ApiResult, VerifyRequest, VerifyResponse},
    auth::ApiKey,
    middleware::{current_request_id, extract_or_generate_request_id},
    AppState,
};
use axum::{extract::State, http::HeaderMap, response::Json};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument};

/// POST /v1/verify
///
/// Consumes one unit of the caller's daily quota and runs the verification pipeline.
/// The API key is read from `x-api-key`, falling back to the `api_key` body field.
/// The MX lookup is bounded by the server's request timeout.
#[instrument(skip_all, fields(request_id))]
pub async fn verify_handler(
    State(state): State<Arc<AppState>>,
    ApiKey(header_key): ApiKey,
    headers: HeaderMap,
    Json(request): Json<VerifyRequest>,
) -> ApiResult<VerifyResponse> {
    let request_id =
        current_request_id().unwrap_or_else(|| extract_or_generate_request_id(&headers));
    tracing::Span::current().record("request_id", request_id.as_str());

    let deadline =
        Instant::now() + Duration::from_secs(state.config.server.request_timeout_secs);
    let api_key = header_key.or(request.api_key).unwrap_or_default();

    let verdict = state
        .service
        .verify_before(&request.email, &api_key, Some(deadline))
        .await?;

    info!(
        "Verification completed: reason={}, disposable={}, mx={}",
        verdict.reason, verdict.disposable, verdict.mail_routing_ok
    );

    Ok(Json(VerifyResponse::new(request_id, verdict)))
}
