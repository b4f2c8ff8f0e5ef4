//! Server configuration loaded from environment variables.
//!
//! Built once in `main` and handed down through `AppState`; every setting has
//! a development default so the server starts with an empty environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use hangar_core::computer::{ComputePolicy, DEFAULT_TTL_SECONDS, MAX_TTL_SECONDS, MIN_TTL_SECONDS};
use tracing::warn;

const DEV_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Env: `HANGAR_HTTP_ADDR`, default `0.0.0.0:8081`
    pub http_addr: SocketAddr,
    /// Env: `HANGAR_DATA_DIR`, default `.hangar-data`
    pub data_dir: PathBuf,
    /// Env: `HANGAR_ENV`
    pub environment: Environment,
    /// Base URL computers use to reach the heartbeat endpoint.
    pub server_url: String,
    /// Only origin allowed on dashboard routes.
    pub dashboard_url: String,
    pub compute: ComputePolicy,
    pub provider_api_url: String,
    pub provider_api_token: String,
    pub provider_org_slug: String,
    pub webhook_secret: String,
    pub session_secret: String,
    pub session_ttl_hours: i64,
    pub heartbeat_secret: String,
    /// 64 hex chars.
    pub api_key_encryption_key: String,
    pub cookie_domain: Option<String>,
    pub oauth: OAuthConfig,
    pub rate_limit_per_second: f64,
    pub rate_limit_burst: f64,
    pub expiry_sweep_interval: Duration,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8081).into(),
            data_dir: PathBuf::from(".hangar-data"),
            environment: Environment::Development,
            server_url: "http://localhost:8081".to_string(),
            dashboard_url: "http://localhost:3000".to_string(),
            compute: ComputePolicy::default(),
            provider_api_url: "https://api.machines.dev".to_string(),
            provider_api_token: String::new(),
            provider_org_slug: "personal".to_string(),
            webhook_secret: DEV_SECRET.to_string(),
            session_secret: DEV_SECRET.to_string(),
            session_ttl_hours: 24 * 7,
            heartbeat_secret: DEV_SECRET.to_string(),
            api_key_encryption_key: "00".repeat(32),
            cookie_domain: None,
            oauth: OAuthConfig {
                client_id: String::new(),
                client_secret: String::new(),
                authorize_url: "https://auth.example.com/oauth2/authorize".to_string(),
                token_url: "https://auth.example.com/oauth2/token".to_string(),
                userinfo_url: "https://auth.example.com/oauth2/userinfo".to_string(),
            },
            rate_limit_per_second: 10.0,
            rate_limit_burst: 30.0,
            expiry_sweep_interval: Duration::from_secs(15),
            log_format: LogFormat::Pretty,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).map(|value| value.trim().to_string()).filter(|value| !value.is_empty());
        let mut config = Self::default();

        if let Some(addr) = var("HANGAR_HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => warn!(value = %addr, "Invalid HANGAR_HTTP_ADDR, using default"),
            }
        }
        if let Some(dir) = var("HANGAR_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(environment) = var("HANGAR_ENV") {
            config.environment = Environment::parse(&environment);
        }
        if let Some(url) = var("HANGAR_SERVER_URL") {
            config.server_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = var("HANGAR_DASHBOARD_URL") {
            config.dashboard_url = url.trim_end_matches('/').to_string();
        }

        if let Some(regions) = var("HANGAR_ALLOWED_REGIONS") {
            config.compute.allowed_regions = regions
                .split(',')
                .map(|region| region.trim().to_string())
                .filter(|region| !region.is_empty())
                .collect();
        }
        config.compute.default_ttl_seconds = parse_or(&var, "HANGAR_DEFAULT_TTL_SECONDS", DEFAULT_TTL_SECONDS);
        config.compute.min_ttl_seconds = parse_or(&var, "HANGAR_MIN_TTL_SECONDS", MIN_TTL_SECONDS);
        config.compute.max_ttl_seconds = parse_or(&var, "HANGAR_MAX_TTL_SECONDS", MAX_TTL_SECONDS);
        enforce_ttl_bounds(&mut config.compute);

        if let Some(url) = var("HANGAR_PROVIDER_API_URL") {
            config.provider_api_url = url;
        }
        if let Some(token) = var("HANGAR_PROVIDER_API_TOKEN") {
            config.provider_api_token = token;
        }
        if let Some(slug) = var("HANGAR_PROVIDER_ORG_SLUG") {
            config.provider_org_slug = slug;
        }
        if let Some(secret) = var("HANGAR_WEBHOOK_SECRET") {
            config.webhook_secret = secret;
        }
        if let Some(secret) = var("HANGAR_SESSION_SECRET") {
            config.session_secret = secret;
        }
        config.session_ttl_hours = parse_or(&var, "HANGAR_SESSION_TTL_HOURS", config.session_ttl_hours);
        if let Some(secret) = var("HANGAR_HEARTBEAT_SECRET") {
            config.heartbeat_secret = secret;
        }
        if let Some(key) = var("HANGAR_API_KEY_ENCRYPTION_KEY") {
            config.api_key_encryption_key = key;
        }
        config.cookie_domain = var("HANGAR_COOKIE_DOMAIN");

        if let Some(value) = var("HANGAR_OAUTH_CLIENT_ID") {
            config.oauth.client_id = value;
        }
        if let Some(value) = var("HANGAR_OAUTH_CLIENT_SECRET") {
            config.oauth.client_secret = value;
        }
        if let Some(value) = var("HANGAR_OAUTH_AUTHORIZE_URL") {
            config.oauth.authorize_url = value;
        }
        if let Some(value) = var("HANGAR_OAUTH_TOKEN_URL") {
            config.oauth.token_url = value;
        }
        if let Some(value) = var("HANGAR_OAUTH_USERINFO_URL") {
            config.oauth.userinfo_url = value;
        }

        config.rate_limit_per_second = parse_or(&var, "HANGAR_RATE_LIMIT_PER_SECOND", config.rate_limit_per_second);
        config.rate_limit_burst = parse_or(&var, "HANGAR_RATE_LIMIT_BURST", config.rate_limit_burst);
        config.expiry_sweep_interval = Duration::from_secs(parse_or(&var, "HANGAR_EXPIRY_SWEEP_SECONDS", 15_u64).max(1));

        if var("HANGAR_LOG_FORMAT").is_some_and(|format| format.eq_ignore_ascii_case("json")) {
            config.log_format = LogFormat::Json;
        }

        if config.environment == Environment::Production {
            for (name, value) in [
                ("HANGAR_SESSION_SECRET", &config.session_secret),
                ("HANGAR_HEARTBEAT_SECRET", &config.heartbeat_secret),
                ("HANGAR_WEBHOOK_SECRET", &config.webhook_secret),
            ] {
                if value == DEV_SECRET {
                    warn!(variable = name, "Running in production with the development secret");
                }
            }
        }

        config
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn oauth_redirect_uri(&self) -> String {
        format!("{}/auth/oauth-callback", self.server_url)
    }
}

/// The default TTL must itself pass the TTL gate it stands in for.
fn enforce_ttl_bounds(policy: &mut ComputePolicy) {
    if policy.min_ttl_seconds < 1 || policy.min_ttl_seconds > policy.max_ttl_seconds {
        warn!(
            min = policy.min_ttl_seconds,
            max = policy.max_ttl_seconds,
            "Inconsistent TTL bounds; using built-in bounds"
        );
        policy.min_ttl_seconds = MIN_TTL_SECONDS;
        policy.max_ttl_seconds = MAX_TTL_SECONDS;
    }
    let bounds = policy.min_ttl_seconds..=policy.max_ttl_seconds;
    if !bounds.contains(&policy.default_ttl_seconds) {
        let fallback = DEFAULT_TTL_SECONDS.clamp(policy.min_ttl_seconds, policy.max_ttl_seconds);
        warn!(
            default = policy.default_ttl_seconds,
            fallback,
            "Default TTL outside TTL bounds; falling back"
        );
        policy.default_ttl_seconds = fallback;
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    match var(key) {
        None => default,
        Some(raw) => match raw.parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(variable = key, value = %raw, "Invalid value, using default");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_with_empty_environment() {
        let config = from_pairs(&[]);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8081).into());
        assert_eq!(config.compute.default_ttl_seconds, 3600);
        assert_eq!(config.compute.allowed_regions, vec!["us-east", "us-west", "eu-west"]);
        assert!(!config.is_production());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = from_pairs(&[
            ("HANGAR_ENV", "production"),
            ("HANGAR_ALLOWED_REGIONS", "ams, iad ,"),
            ("HANGAR_MAX_TTL_SECONDS", "7200"),
            ("HANGAR_SERVER_URL", "https://api.hangar.dev/"),
            ("HANGAR_LOG_FORMAT", "JSON"),
            ("HANGAR_EXPIRY_SWEEP_SECONDS", "0"),
        ]);
        assert!(config.is_production());
        assert_eq!(config.compute.allowed_regions, vec!["ams", "iad"]);
        assert_eq!(config.compute.max_ttl_seconds, 7200);
        assert_eq!(config.oauth_redirect_uri(), "https://api.hangar.dev/auth/oauth-callback");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.expiry_sweep_interval, Duration::from_secs(1));
    }

    #[test]
    fn default_ttl_is_kept_inside_the_bounds() {
        let config = from_pairs(&[("HANGAR_DEFAULT_TTL_SECONDS", "5")]);
        assert_eq!(config.compute.default_ttl_seconds, 3600);

        let config = from_pairs(&[("HANGAR_MAX_TTL_SECONDS", "600")]);
        assert_eq!(config.compute.max_ttl_seconds, 600);
        assert_eq!(config.compute.default_ttl_seconds, 600);

        let config = from_pairs(&[("HANGAR_MIN_TTL_SECONDS", "900"), ("HANGAR_MAX_TTL_SECONDS", "60")]);
        assert_eq!(config.compute.min_ttl_seconds, 30);
        assert_eq!(config.compute.max_ttl_seconds, 86_400);
        assert_eq!(config.compute.default_ttl_seconds, 3600);

        let config = from_pairs(&[("HANGAR_DEFAULT_TTL_SECONDS", "120")]);
        assert_eq!(config.compute.default_ttl_seconds, 120);
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let config = from_pairs(&[("HANGAR_MIN_TTL_SECONDS", "soon"), ("HANGAR_HTTP_ADDR", "nowhere")]);
        assert_eq!(config.compute.min_ttl_seconds, 30);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8081).into());
    }
}
