//! truemailer API server
//!
//! Email verification API built with axum and tokio: quota-gated verification per API
//! key, administrative client provisioning and a daily refresh of the disposable-domain
//! blocklist.

use anyhow::{Context, Result};
use axum::{extract::DefaultBodyLimit, middleware::from_fn, Router};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use truemailer_core::{sources::spawn_refresh_task, ReputationService};

mod api_handler;
mod auth;
mod config;
mod middleware;
mod routes;

use config::*;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ReputationService>,
    pub config: Arc<AppConfig>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config().context("Failed to load configuration")?;

    init_tracing(&config);

    info!("Starting truemailer API v{}", env!("CARGO_PKG_VERSION"));

    let service = ReputationService::from_config(config.reputation_config())
        .await
        .context("Failed to initialize reputation service")?;

    let status = service.status();
    info!(
        "Service initialized - {} disposable domains, {} clients, {} trusted providers",
        status.loaded_domain_count,
        status.client_ids.len(),
        status.trusted_provider_count
    );

    let service = Arc::new(service);

    let refresh_task = spawn_refresh_task(
        service.aggregator().clone(),
        Duration::from_secs(config.sources.refresh_interval_secs),
        config.sources.refresh_on_startup,
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.server.host))?;

    let app = create_router(AppState {
        service,
        config: Arc::new(config),
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Server listening on {}", addr);
    info!("Health check available at http://{}/health", addr);
    info!("Verification API: http://{}/v1/verify", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    refresh_task.abort();
    info!("Server shut down gracefully");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    let body_limit = state.config.security.max_body_size_bytes;

    routes::build_routes(Arc::new(state))
        .layer(from_fn(middleware::security_headers))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers(tower_http::cors::Any),
        )
        .layer(CompressionLayer::new())
        .layer(from_fn(middleware::request_id))
}

/// Initialize tracing and logging
fn init_tracing(config: &AppConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "{}=debug,truemailer_core={},{}",
            env!("CARGO_PKG_NAME"),
            config.observability.log_level,
            config.observability.log_level
        )
        .into()
    });

    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    fn state() -> AppState {
        use truemailer_core::{
            dns::StaticRoutingTable,
            persistence::{MemoryBlocklistRepository, MemoryClientRepository},
            quota::SystemClock,
            BlocklistStore, HeuristicClassifier, QuotaConfig, QuotaLedger, SourceAggregator,
            VerificationPipeline,
        };

        let store = Arc::new(BlocklistStore::new());
        let service = ReputationService::new(
            Arc::new(QuotaLedger::new(
                Arc::new(MemoryClientRepository::default()),
                Arc::new(SystemClock),
                QuotaConfig::default(),
            )),
            Arc::new(VerificationPipeline::new(
                store.clone(),
                HeuristicClassifier::default(),
                Arc::new(StaticRoutingTable::all_routable()),
                Duration::from_secs(1),
            )),
            Arc::new(SourceAggregator::new(
                Vec::new(),
                store.clone(),
                Arc::new(MemoryBlocklistRepository::default()),
                Duration::from_secs(1),
            )),
            store,
            None,
        );

        AppState {
            service: Arc::new(service),
            config: Arc::new(AppConfig::default()),
        }
    }

    #[tokio::test]
    async fn test_router_sets_response_headers() {
        let response = create_router(state())
            .oneshot(
                Request::get("/health")
                    .header("x-request-id", "req-789")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-request-id"], "req-789");
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    }

    #[tokio::test]
    async fn test_error_response_keeps_caller_request_id() {
        let response = create_router(state())
            .oneshot(
                Request::get("/admin/clients")
                    .header("x-request-id", "req-corr-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["x-request-id"], "req-corr-1");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["request_id"], "req-corr-1");
        assert_eq!(body["error_code"], "unauthorized");
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let mut state = state();
        let mut config = AppConfig::default();
        config.security.max_body_size_bytes = 16;
        state.config = Arc::new(config);

        let body = format!(r#"{{"email": "{}@example.com"}}"#, "a".repeat(64));
        let response = create_router(state)
            .oneshot(
                Request::post("/v1/verify")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let response = create_router(state())
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
