//! Hangar control plane server
//!
//! Serves the dashboard API (session auth), the versioned public API under
//! `/v1` (API-key auth), the billing webhook and computer heartbeats.

mod app;
mod auth;
mod billing;
mod config;
mod error;
mod middleware;
mod routes;
mod state;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use hangar_core::computer::start_expiry_sweeper;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{AppConfig, LogFormat};
use crate::state::{AppState, Collaborators};

const RATE_LIMIT_IDLE: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env();
    init_tracing(&config.log_format);

    tracing::info!(data_dir = ?config.data_dir, environment = ?config.environment, "Starting hangar server");

    let collaborators = Collaborators::from_config(&config);
    let state = AppState::new(config.clone(), collaborators).await?;

    let sweeper = start_expiry_sweeper(state.computers().clone(), config.expiry_sweep_interval);
    let limiter = state.rate_limiter().clone();
    let purger = tokio::spawn(async move {
        let mut interval = tokio::time::interval(RATE_LIMIT_IDLE);
        loop {
            interval.tick().await;
            limiter.purge_idle(RATE_LIMIT_IDLE).await;
        }
    });

    let router = app::build_router(state);
    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    tracing::info!("REST API listening on {}", config.http_addr);

    let served = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error");

    sweeper.abort();
    purger.abort();
    served
}

fn init_tracing(format: &LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "hangar_server=debug,hangar_core=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
