//! Application state

use std::sync::Arc;

use anyhow::Context;
use hangar_core::{
    api_key::{ApiKeyStore, KeyVault},
    billing::{BillingHandler, WebhookVerifier},
    computer::{ComputerManager, ComputerStore},
    provider::{ComputeProvider, MachinesApiProvider},
    template::{InstanceType, NewTemplate, TemplateStore},
    token::{JwtHeartbeatMinter, SystemEnvIssuer},
};

use crate::auth::{
    AuthStore, CodeSender, CookieSettings, IdentityProvider, LogCodeSender, OAuthIdentityProvider, SessionKeys,
};
use crate::billing::OrgBillingHandler;
use crate::config::AppConfig;
use crate::middleware::RateLimiter;

pub const BASE_TEMPLATE_SLUG: &str = "base";
const BASE_TEMPLATE_IMAGE: &str = "docker.io/library/ubuntu:24.04";

/// External systems the server talks to.
pub struct Collaborators {
    pub provider: Arc<dyn ComputeProvider>,
    pub identity: Arc<dyn IdentityProvider>,
    pub codes: Arc<dyn CodeSender>,
    /// `None` selects the organization-backed handler.
    pub billing: Option<Arc<dyn BillingHandler>>,
}

impl Collaborators {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            provider: Arc::new(MachinesApiProvider::new(
                config.provider_api_url.clone(),
                config.provider_api_token.clone(),
                config.provider_org_slug.clone(),
            )),
            identity: Arc::new(OAuthIdentityProvider::new(config.oauth.clone(), config.oauth_redirect_uri())),
            codes: Arc::new(LogCodeSender {
                reveal_codes: !config.is_production(),
            }),
            billing: None,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: AppConfig,
    auth: AuthStore,
    templates: TemplateStore,
    api_keys: ApiKeyStore,
    computers: ComputerManager,
    session_keys: SessionKeys,
    cookies: CookieSettings,
    identity: Arc<dyn IdentityProvider>,
    codes: Arc<dyn CodeSender>,
    billing: Arc<dyn BillingHandler>,
    webhooks: WebhookVerifier,
    rate_limiter: RateLimiter,
}

impl AppState {
    /// Open every store under `config.data_dir` and seed the `base` template.
    pub async fn new(config: AppConfig, collaborators: Collaborators) -> anyhow::Result<Self> {
        let data_dir = config.data_dir.clone();
        let auth = AuthStore::new(data_dir.clone(), config.session_ttl_hours)
            .await
            .context("failed to open auth store")?;
        let templates = TemplateStore::new(data_dir.clone())
            .await
            .context("failed to open template store")?;
        templates
            .ensure_global(base_template())
            .await
            .context("failed to seed base template")?;
        let vault = KeyVault::from_hex(&config.api_key_encryption_key).context("invalid HANGAR_API_KEY_ENCRYPTION_KEY")?;
        let api_keys = ApiKeyStore::new(data_dir.clone(), vault)
            .await
            .context("failed to open API key store")?;
        let computer_store = ComputerStore::new(data_dir)
            .await
            .context("failed to open computer store")?;

        let minter = Arc::new(JwtHeartbeatMinter::new(&config.heartbeat_secret));
        let computers = ComputerManager::new(
            computer_store,
            templates.clone(),
            collaborators.provider,
            SystemEnvIssuer::new(config.server_url.clone(), minter),
            config.compute.clone(),
        );
        let billing = collaborators
            .billing
            .unwrap_or_else(|| Arc::new(OrgBillingHandler::new(auth.clone())) as Arc<dyn BillingHandler>);

        Ok(Self {
            inner: Arc::new(AppStateInner {
                session_keys: SessionKeys::new(&config.session_secret),
                cookies: CookieSettings::from_config(&config),
                webhooks: WebhookVerifier::new(config.webhook_secret.clone()),
                rate_limiter: RateLimiter::new(config.rate_limit_per_second, config.rate_limit_burst),
                identity: collaborators.identity,
                codes: collaborators.codes,
                billing,
                auth,
                templates,
                api_keys,
                computers,
                config,
            }),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn auth(&self) -> &AuthStore {
        &self.inner.auth
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.inner.templates
    }

    pub fn api_keys(&self) -> &ApiKeyStore {
        &self.inner.api_keys
    }

    pub fn computers(&self) -> &ComputerManager {
        &self.inner.computers
    }

    pub fn session_keys(&self) -> &SessionKeys {
        &self.inner.session_keys
    }

    pub fn cookies(&self) -> &CookieSettings {
        &self.inner.cookies
    }

    pub fn identity(&self) -> &dyn IdentityProvider {
        self.inner.identity.as_ref()
    }

    pub fn codes(&self) -> &dyn CodeSender {
        self.inner.codes.as_ref()
    }

    pub fn billing(&self) -> &dyn BillingHandler {
        self.inner.billing.as_ref()
    }

    pub fn webhooks(&self) -> &WebhookVerifier {
        &self.inner.webhooks
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.rate_limiter
    }
}

fn base_template() -> NewTemplate {
    NewTemplate {
        slug: BASE_TEMPLATE_SLUG.to_string(),
        instance_type: InstanceType::SharedCpu1x,
        storage_gb: 10,
        image: BASE_TEMPLATE_IMAGE.to_string(),
        init_command: None,
        entrypoint: None,
        is_public: true,
    }
}
