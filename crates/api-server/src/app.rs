//! Router assembly: each route group gets its own gate chain.

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::middleware::gates::{apply_gates, dashboard_gates, public_api_gates, Gate};
use crate::routes;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let dashboard_url = state.config().dashboard_url.clone();

    let public_api = apply_gates(
        Router::new().nest(
            "/v1",
            Router::new()
                .merge(routes::computers::router())
                .merge(routes::templates::router()),
        ),
        &public_api_gates(),
        &state,
    );
    let dashboard_open = apply_gates(
        routes::auth::public_router(),
        &dashboard_gates(&dashboard_url, false),
        &state,
    );
    let dashboard = apply_gates(
        Router::new()
            .merge(routes::auth::session_router())
            .merge(routes::api_keys::router())
            .merge(routes::templates::router())
            .merge(routes::users::router()),
        &dashboard_gates(&dashboard_url, true),
        &state,
    );
    let heartbeat = apply_gates(routes::computers::heartbeat_router(), &[Gate::RateLimit], &state);

    Router::new()
        .merge(routes::health::router())
        .merge(routes::webhook::router())
        .merge(heartbeat)
        .merge(dashboard_open)
        .merge(dashboard)
        .merge(public_api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
