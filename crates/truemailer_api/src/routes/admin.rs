//! Administrative routes: client provisioning, usage listing and blocklist maintenance

use crate::{
    api_handler::{AddDomainsRequest, ApiError, ApiResult, CreateClientRequest},
    auth::{AdminCredential, ApiKey},
    AppState,
};
use axum::{extract::State, http::StatusCode, response::Json};
use std::sync::Arc;
use tracing::info;
use truemailer_core::quota::{ClientSummary, ClientUsage};
use truemailer_core::RefreshReport;

/// POST /admin/clients
///
/// Provisions a client and returns its freshly generated API key. The key is only
/// ever shown in this response.
pub async fn create_client_handler(
    State(state): State<Arc<AppState>>,
    AdminCredential(secret): AdminCredential,
    Json(request): Json<CreateClientRequest>,
) -> Result<(StatusCode, Json<ClientSummary>), ApiError> {
    let summary = state
        .service
        .create_client(&request.name, request.daily_limit, &secret)?;
    info!("Provisioned client {}", summary.id);
    Ok((StatusCode::CREATED, Json(summary)))
}

/// GET /admin/clients
pub async fn list_clients_handler(
    State(state): State<Arc<AppState>>,
    AdminCredential(secret): AdminCredential,
) -> ApiResult<Vec<ClientUsage>> {
    Ok(Json(state.service.list_clients(&secret)?))
}

/// POST /admin/refresh
///
/// Runs a refresh cycle immediately. An `x-api-key`, when present, must belong to a
/// provisioned client.
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    ApiKey(key): ApiKey,
) -> ApiResult<RefreshReport> {
    let report = state.service.refresh_now(key.as_deref()).await?;
    info!(
        "Manual refresh installed {} domains (generation {})",
        report.domain_count, report.generation
    );
    Ok(Json(report))
}

/// POST /admin/blocklist
pub async fn add_domains_handler(
    State(state): State<Arc<AppState>>,
    AdminCredential(secret): AdminCredential,
    Json(request): Json<AddDomainsRequest>,
) -> ApiResult<RefreshReport> {
    Ok(Json(
        state.service.add_domains(&request.domains, &secret).await?,
    ))
}
