//! External identity provider and login-code delivery

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::store::AuthError;
use crate::config::OAuthConfig;

/// Identity asserted by a login method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub idp_user_id: Option<String>,
    pub email: String,
    pub email_verified: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub picture: Option<String>,
}

impl VerifiedIdentity {
    pub fn from_email(email: impl Into<String>) -> Self {
        Self {
            idp_user_id: None,
            email: email.into(),
            email_verified: true,
            first_name: None,
            last_name: None,
            picture: None,
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn authorize_url(&self, state: &str) -> String;
    async fn exchange_code(&self, code: &str) -> Result<VerifiedIdentity, AuthError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct UserInfo {
    sub: String,
    email: String,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    given_name: Option<String>,
    #[serde(default)]
    family_name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

/// Standard OAuth2 authorization-code flow followed by a userinfo lookup.
pub struct OAuthIdentityProvider {
    client: Client,
    config: OAuthConfig,
    redirect_uri: String,
}

impl OAuthIdentityProvider {
    pub fn new(config: OAuthConfig, redirect_uri: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            config,
            redirect_uri: redirect_uri.into(),
        }
    }
}

#[async_trait]
impl IdentityProvider for OAuthIdentityProvider {
    fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            self.config.authorize_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode("openid email profile"),
            urlencoding::encode(state),
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<VerifiedIdentity, AuthError> {
        let form = format!(
            "grant_type=authorization_code&code={}&redirect_uri={}&client_id={}&client_secret={}",
            urlencoding::encode(code),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.client_secret),
        );
        let response = self
            .client
            .post(&self.config.token_url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await
            .map_err(|err| AuthError::Identity(format!("Token request failed: {}", err)))?;
        if !response.status().is_success() {
            return Err(AuthError::Unauthorized(format!(
                "Identity provider rejected the code ({})",
                response.status()
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| AuthError::Identity(format!("Invalid token response: {}", err)))?;

        let info: UserInfo = self
            .client
            .get(&self.config.userinfo_url)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|err| AuthError::Identity(format!("Userinfo request failed: {}", err)))?
            .error_for_status()
            .map_err(|err| AuthError::Identity(format!("Userinfo request failed: {}", err)))?
            .json()
            .await
            .map_err(|err| AuthError::Identity(format!("Invalid userinfo response: {}", err)))?;
        debug!(idp_user_id = %info.sub, "Identity provider exchange complete");

        Ok(VerifiedIdentity {
            idp_user_id: Some(info.sub),
            email: info.email,
            email_verified: info.email_verified,
            first_name: info.given_name,
            last_name: info.family_name,
            picture: info.picture,
        })
    }
}

/// Provider that accepts one fixed code and returns one fixed identity.
pub struct StaticIdentityProvider {
    pub code: String,
    pub identity: VerifiedIdentity,
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    fn authorize_url(&self, state: &str) -> String {
        format!("https://idp.invalid/authorize?state={}", urlencoding::encode(state))
    }

    async fn exchange_code(&self, code: &str) -> Result<VerifiedIdentity, AuthError> {
        if code == self.code {
            Ok(self.identity.clone())
        } else {
            Err(AuthError::Unauthorized("Unknown authorization code".to_string()))
        }
    }
}

#[async_trait]
pub trait CodeSender: Send + Sync {
    async fn send_code(&self, email: &str, code: &str) -> Result<(), AuthError>;
}

/// Development delivery: codes go to the log instead of a mailbox.
pub struct LogCodeSender {
    pub reveal_codes: bool,
}

#[async_trait]
impl CodeSender for LogCodeSender {
    async fn send_code(&self, email: &str, code: &str) -> Result<(), AuthError> {
        if self.reveal_codes {
            info!(email = %email, code = %code, "Login code issued");
        } else {
            info!(email = %email, "Login code issued");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingCodeSender {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingCodeSender {
    pub async fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .await
            .iter()
            .rev()
            .find(|(recipient, _)| recipient == email)
            .map(|(_, code)| code.clone())
    }
}

#[async_trait]
impl CodeSender for RecordingCodeSender {
    async fn send_code(&self, email: &str, code: &str) -> Result<(), AuthError> {
        self.sent.lock().await.push((email.to_string(), code.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_url_encodes_parameters() {
        let provider = OAuthIdentityProvider::new(
            OAuthConfig {
                client_id: "client id".to_string(),
                client_secret: "secret".to_string(),
                authorize_url: "https://idp.example.com/authorize".to_string(),
                token_url: "https://idp.example.com/token".to_string(),
                userinfo_url: "https://idp.example.com/userinfo".to_string(),
            },
            "https://api.hangar.dev/auth/oauth-callback",
        );
        let url = provider.authorize_url("n0nce");
        assert!(url.starts_with("https://idp.example.com/authorize?response_type=code"));
        assert!(url.contains("client_id=client%20id"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapi.hangar.dev%2Fauth%2Foauth-callback"));
        assert!(url.ends_with("state=n0nce"));
    }

    #[tokio::test]
    async fn recording_sender_returns_latest_code() {
        let sender = RecordingCodeSender::default();
        sender.send_code("a@example.com", "111111").await.unwrap();
        sender.send_code("a@example.com", "222222").await.unwrap();
        assert_eq!(sender.last_code_for("a@example.com").await.as_deref(), Some("222222"));
        assert!(sender.last_code_for("b@example.com").await.is_none());
    }
}
