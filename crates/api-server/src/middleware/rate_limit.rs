//! Per-client token buckets for the public API.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn full(burst: f64) -> Self {
        Self {
            tokens: burst,
            refilled_at: Instant::now(),
        }
    }

    fn take(&mut self, per_second: f64, burst: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.refilled_at).as_secs_f64();
        self.refilled_at = now;
        self.tokens = (self.tokens + elapsed * per_second).min(burst);
        if self.tokens < 1.0 {
            return false;
        }
        self.tokens -= 1.0;
        true
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<IpAddr, Bucket>>>,
    per_second: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(per_second: f64, burst: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            per_second: per_second.max(0.0),
            burst: burst.max(1.0),
        }
    }

    /// Spend one token for `client`; `false` once its bucket is empty.
    pub async fn allow(&self, client: IpAddr) -> bool {
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(client)
            .or_insert_with(|| Bucket::full(self.burst))
            .take(self.per_second, self.burst, Instant::now())
    }

    /// Drop buckets idle for longer than `max_idle`.
    pub async fn purge_idle(&self, max_idle: Duration) {
        let now = Instant::now();
        self.buckets
            .lock()
            .await
            .retain(|_, bucket| now.saturating_duration_since(bucket.refilled_at) < max_idle);
    }
}

pub async fn enforce(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, ApiError> {
    let connected = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let client = connected.or_else(|| forwarded_client(req.headers()));
    if let Some(client) = client {
        if !state.rate_limiter().allow(client).await {
            warn!(client = %client, path = %req.uri().path(), "Rate limit exceeded");
            return Err(ApiError::RateLimited);
        }
    }
    Ok(next.run(req).await)
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`.
fn forwarded_client(headers: &HeaderMap) -> Option<IpAddr> {
    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());
    header("x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .or_else(|| header("x-real-ip").and_then(|value| value.trim().parse().ok()))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[tokio::test]
    async fn burst_then_reject() {
        let limiter = RateLimiter::new(0.0, 3.0);
        let client: IpAddr = "10.0.0.1".parse().unwrap();
        for _ in 0..3 {
            assert!(limiter.allow(client).await);
        }
        assert!(!limiter.allow(client).await);
        assert!(limiter.allow("10.0.0.2".parse().unwrap()).await);
    }

    #[tokio::test]
    async fn idle_buckets_are_purged() {
        let limiter = RateLimiter::new(1.0, 1.0);
        let client: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(limiter.allow(client).await);
        limiter.purge_idle(Duration::ZERO).await;
        assert!(limiter.buckets.lock().await.is_empty());
    }

    #[test]
    fn forwarded_headers_are_read_in_order() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("192.0.2.7"));
        assert_eq!(forwarded_client(&headers), "192.0.2.7".parse().ok());

        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.1, 10.0.0.1"));
        assert_eq!(forwarded_client(&headers), "198.51.100.1".parse().ok());
    }
}
