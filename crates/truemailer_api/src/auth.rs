//! Credential extraction from request headers
//!
//! Clients authenticate with `x-api-key`; administrative routes additionally require
//! `x-admin-secret`. Checking the values is left to the reputation service.

use crate::api_handler::ApiError;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use std::convert::Infallible;
use tracing::debug;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const ADMIN_SECRET_HEADER: &str = "x-admin-secret";

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Optional client API key from `x-api-key`
#[derive(Debug, Clone)]
pub struct ApiKey(pub Option<String>);

impl<S> FromRequestParts<S> for ApiKey
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ApiKey(header_value(&parts.headers, API_KEY_HEADER)))
    }
}

/// Administrator secret from `x-admin-secret`; rejects the request when absent
#[derive(Debug, Clone)]
pub struct AdminCredential(pub String);

impl<S> FromRequestParts<S> for AdminCredential
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_value(&parts.headers, ADMIN_SECRET_HEADER)
            .map(AdminCredential)
            .ok_or_else(|| {
                debug!("Missing {} header", ADMIN_SECRET_HEADER);
                ApiError::Unauthorized
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Request};
    use pretty_assertions::assert_eq;

    fn parts(headers: &[(&'static str, &'static str)]) -> Parts {
        let mut builder = Request::builder().uri("/");
        for &(name, value) in headers {
            builder = builder.header(name, HeaderValue::from_static(value));
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_api_key_extraction() {
        let mut with_key = parts(&[(API_KEY_HEADER, " tm_abc ")]);
        let ApiKey(key) = ApiKey::from_request_parts(&mut with_key, &()).await.unwrap();
        assert_eq!(key.as_deref(), Some("tm_abc"));

        let mut without = parts(&[]);
        let ApiKey(key) = ApiKey::from_request_parts(&mut without, &()).await.unwrap();
        assert_eq!(key, None);
    }

    #[tokio::test]
    async fn test_admin_credential_required() {
        let mut with_secret = parts(&[(ADMIN_SECRET_HEADER, "s3cret")]);
        let credential = AdminCredential::from_request_parts(&mut with_secret, &())
            .await
            .unwrap();
        assert_eq!(credential.0, "s3cret");

        let mut blank = parts(&[(ADMIN_SECRET_HEADER, "  ")]);
        assert!(matches!(
            AdminCredential::from_request_parts(&mut blank, &()).await,
            Err(ApiError::Unauthorized)
        ));
    }
}
