//! Request gates and the identities they attach to a request.

pub mod api_key;
pub mod gates;
pub mod rate_limit;
pub mod session;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use uuid::Uuid;

use crate::auth::SessionContext;
use crate::error::ApiError;

pub use gates::{apply_gates, CorsPolicy, Gate};
pub use rate_limit::RateLimiter;

/// How the caller proved which project it acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential {
    ApiKey(Uuid),
    Session(Uuid),
}

/// The project every resource handler is confined to.
#[derive(Debug, Clone, Copy)]
pub struct ProjectScope {
    pub project_id: Uuid,
    pub credential: Credential,
}

impl<S: Send + Sync> FromRequestParts<S> for ProjectScope {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ProjectScope>()
            .copied()
            .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))
    }
}

/// Session of a dashboard user; present behind [`Gate::SessionAuth`].
#[derive(Debug, Clone)]
pub struct CurrentSession(pub SessionContext);

impl<S: Send + Sync> FromRequestParts<S> for CurrentSession {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionContext>()
            .cloned()
            .map(CurrentSession)
            .ok_or_else(|| ApiError::Unauthorized("Sign in required".to_string()))
    }
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
