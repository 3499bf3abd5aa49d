//! Request extractors shared by the handlers.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Request},
    http::{header::AUTHORIZATION, request::Parts},
    Json,
};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::domain::value_objects::TenantId;
use crate::error::CommerceError;
use crate::http::AppState;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// The store a request is addressed to, from the `X-Tenant-Id` header.
#[derive(Debug, Clone)]
pub struct Tenant(pub TenantId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Tenant {
    type Rejection = CommerceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.headers.get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(TenantId::parse)
            .map(Tenant)
            .ok_or(CommerceError::MissingTenant)
    }
}

/// Proof that the request carried the admin bearer token.
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

#[async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = CommerceError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts.headers.get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);
        match token {
            Some(t) if constant_time_eq(t.as_bytes(), state.config.admin_token.as_bytes()) => Ok(AdminAuth),
            _ => Err(CommerceError::Unauthorized),
        }
    }
}

/// Compares without returning early on the first differing byte. Only the
/// length leaks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() { return false; }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// JSON body that passed its `validator` rules.
#[derive(Debug, Clone)]
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = CommerceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await
            .map_err(|e: JsonRejection| CommerceError::InvalidInput(e.body_text()))?;
        value.validate()?;
        Ok(ValidJson(value))
    }
}
