//! Ordered request gates.
//!
//! A route group declares its gates as a slice; the first gate sees the
//! request first and may answer it without consulting the rest. CORS leads
//! so preflights never reach authentication, and rate limiting precedes
//! API-key checks so throttled clients cost no key lookups.

use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn_with_state,
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    set_header::SetResponseHeaderLayer,
};
use tracing::warn;

use super::{api_key, rate_limit, session};
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsPolicy {
    /// Any origin, no credentials.
    Any,
    /// One origin, cookies allowed.
    Dashboard(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    Cors(CorsPolicy),
    SecurityHeaders,
    RateLimit,
    ApiKeyAuth,
    SessionAuth,
}

impl Gate {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cors(_) => "cors",
            Self::SecurityHeaders => "security_headers",
            Self::RateLimit => "rate_limit",
            Self::ApiKeyAuth => "api_key_auth",
            Self::SessionAuth => "session_auth",
        }
    }
}

/// Gates for the versioned public API.
pub fn public_api_gates() -> Vec<Gate> {
    vec![Gate::Cors(CorsPolicy::Any), Gate::RateLimit, Gate::ApiKeyAuth]
}

/// Gates for dashboard routes; `authenticated` adds the session check.
pub fn dashboard_gates(dashboard_url: &str, authenticated: bool) -> Vec<Gate> {
    let mut gates = vec![
        Gate::Cors(CorsPolicy::Dashboard(dashboard_url.to_string())),
        Gate::SecurityHeaders,
    ];
    if authenticated {
        gates.push(Gate::SessionAuth);
    }
    gates
}

/// Wrap `router` so requests pass through `gates` in slice order.
pub fn apply_gates(router: Router<AppState>, gates: &[Gate], state: &AppState) -> Router<AppState> {
    // Later `.layer` calls wrap earlier ones, so the list is applied backwards.
    gates.iter().rev().fold(router, |router, gate| match gate {
        Gate::Cors(policy) => router.layer(cors_layer(policy)),
        Gate::SecurityHeaders => router
            .layer(SetResponseHeaderLayer::if_not_present(
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::X_FRAME_OPTIONS,
                HeaderValue::from_static("DENY"),
            ))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::REFERRER_POLICY,
                HeaderValue::from_static("no-referrer"),
            )),
        Gate::RateLimit => router.layer(from_fn_with_state(state.clone(), rate_limit::enforce)),
        Gate::ApiKeyAuth => router.layer(from_fn_with_state(state.clone(), api_key::authenticate)),
        Gate::SessionAuth => router.layer(from_fn_with_state(state.clone(), session::authenticate)),
    })
}

fn cors_layer(policy: &CorsPolicy) -> CorsLayer {
    match policy {
        CorsPolicy::Any => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        CorsPolicy::Dashboard(origin) => {
            let allow_origin = match HeaderValue::from_str(origin) {
                Ok(value) => AllowOrigin::exact(value),
                Err(_) => {
                    warn!(origin = %origin, "Dashboard origin is not a valid header value");
                    AllowOrigin::list(Vec::<HeaderValue>::new())
                }
            };
            CorsLayer::new()
                .allow_origin(allow_origin)
                .allow_credentials(true)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        }
    }
}
