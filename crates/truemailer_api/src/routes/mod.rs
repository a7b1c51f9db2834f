//! API Routes Module
//!
//! - `verify`: quota-gated email verification
//! - `admin`: client provisioning, usage listing, refresh and blocklist additions
//! - `health`: liveness and status introspection

pub mod admin;
pub mod health;
pub mod verify;

use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build all API routes and return a configured Router
pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/verify", post(verify::verify_handler))
        // Administrative endpoints
        .route(
            "/admin/clients",
            post(admin::create_client_handler).get(admin::list_clients_handler),
        )
        .route("/admin/refresh", post(admin::refresh_handler))
        .route("/admin/blocklist", post(admin::add_domains_handler))
        // Health and monitoring endpoints
        .route("/health", get(health::health_handler))
        .route("/status", get(health::status_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
    };
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;
    use truemailer_core::dns::StaticRoutingTable;
    use truemailer_core::persistence::{MemoryBlocklistRepository, MemoryClientRepository};
    use truemailer_core::quota::FixedClock;
    use truemailer_core::{
        BlocklistStore, HeuristicClassifier, QuotaConfig, QuotaLedger, ReputationService,
        SourceAggregator, VerificationPipeline,
    };

    const ADMIN: &str = "s3cret";

    fn app() -> Router {
        let store = Arc::new(BlocklistStore::with_domains(vec!["mailinator.com".to_string()]));
        let ledger = QuotaLedger::new(
            Arc::new(MemoryClientRepository::default()),
            Arc::new(FixedClock::new(NaiveDate::from_ymd_opt(2026, 10, 17).unwrap())),
            QuotaConfig::default(),
        );
        let pipeline = VerificationPipeline::new(
            store.clone(),
            HeuristicClassifier::default(),
            Arc::new(StaticRoutingTable::with_routable(["example.com", "gmail.com"])),
            Duration::from_secs(2),
        );
        let aggregator = SourceAggregator::new(
            Vec::new(),
            store.clone(),
            Arc::new(MemoryBlocklistRepository::default()),
            Duration::from_secs(30),
        );
        let service = ReputationService::new(
            Arc::new(ledger),
            Arc::new(pipeline),
            Arc::new(aggregator),
            store,
            Some(ADMIN.to_string()),
        );

        build_routes(Arc::new(AppState {
            service: Arc::new(service),
            config: Arc::new(AppConfig::default()),
        }))
    }

    fn post_json(uri: &str, headers: &[(&str, &str)], body: Value) -> Request<Body> {
        let mut builder = Request::post(uri).header("content-type", "application/json");
        for &(name, value) in headers {
            builder = builder.header(name, value);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn provision(app: &Router, limit: u32) -> String {
        let response = app
            .clone()
            .oneshot(post_json(
                "/admin/clients",
                &[("x-admin-secret", ADMIN)],
                json!({"name": "Acme", "daily_limit": limit}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await["key"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_verify_flow() {
        let app = app();
        let key = provision(&app, 10).await;

        let response = app
            .clone()
            .oneshot(post_json(
                "/v1/verify",
                &[("x-api-key", key.as_str())],
                json!({"email": "a@mailinator.com"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["email"], "a@mailinator.com");
        assert_eq!(body["valid"], false);
        assert_eq!(body["disposable"], true);
        assert_eq!(body["reason"], "disposable_domain");

        // Key in the body works as well
        let response = app
            .oneshot(post_json(
                "/v1/verify",
                &[],
                json!({"email": "someone@example.com", "api_key": key}),
            ))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["valid"], true);
        assert_eq!(body["reason"], "valid");
        assert_eq!(body["mx"], true);
    }

    #[tokio::test]
    async fn test_verify_rejects_unknown_key() {
        let response = app()
            .oneshot(post_json(
                "/v1/verify",
                &[("x-api-key", "nope")],
                json!({"email": "a@example.com"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error_code"], "invalid_api_key");
    }

    #[tokio::test]
    async fn test_verify_enforces_daily_limit() {
        let app = app();
        let key = provision(&app, 1).await;

        let request = || post_json("/v1/verify", &[("x-api-key", key.as_str())], json!({"email": "x"}));

        let first = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(body_json(first).await["reason"], "invalid_syntax");

        let second = app.oneshot(request()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_json(second).await["error_code"], "daily_limit_exceeded");
    }

    #[tokio::test]
    async fn test_admin_routes_require_secret() {
        let app = app();

        let missing = app
            .clone()
            .oneshot(post_json("/admin/clients", &[], json!({"name": "A", "daily_limit": 1})))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = app
            .oneshot(
                Request::get("/admin/clients")
                    .header("x-admin-secret", "wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(wrong).await["error_code"], "unauthorized");
    }

    #[tokio::test]
    async fn test_invalid_limit_is_bad_request() {
        let response = app()
            .oneshot(post_json(
                "/admin/clients",
                &[("x-admin-secret", ADMIN)],
                json!({"name": "Acme", "daily_limit": 0}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_clients_hides_keys() {
        let app = app();
        let key = provision(&app, 3).await;

        let response = app
            .oneshot(
                Request::get("/admin/clients")
                    .header("x-admin-secret", ADMIN)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body, json!([{"id": "acme", "name": "Acme", "daily_limit": 3, "used_today": 0}]));
        assert!(!body.to_string().contains(&key));
    }

    #[tokio::test]
    async fn test_blocklist_and_status() {
        let app = app();

        let response = app
            .clone()
            .oneshot(post_json(
                "/admin/blocklist",
                &[("x-admin-secret", ADMIN)],
                json!({"domains": ["inbox-now.net", "not a domain"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["domain_count"], 2);

        let response = app
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["loaded_domain_count"], 2);
        assert_eq!(body["generation"], 2);
    }

    #[tokio::test]
    async fn test_refresh_with_unknown_key() {
        let response = app()
            .oneshot(
                Request::post("/admin/refresh")
                    .header("x-api-key", "nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_refresh_without_sources_keeps_local_set() {
        let response = app()
            .oneshot(Request::post("/admin/refresh").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["domain_count"], 1);
    }
}
