//! Heartbeat credentials and the environment injected into new computers

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::Error;
use crate::Result;

pub const ENV_PROJECT_ID: &str = "HANGAR_PROJECT_ID";
pub const ENV_COMPUTER_ID: &str = "HANGAR_COMPUTER_ID";
pub const ENV_HEARTBEAT_URL: &str = "HANGAR_HEARTBEAT_URL";
pub const ENV_HEARTBEAT_TOKEN: &str = "HANGAR_HEARTBEAT_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatClaims {
    pub sub: String,
    pub project_id: String,
    pub iat: i64,
    pub jti: String,
}

/// Mints the credential a computer uses to call back into the control plane.
#[async_trait]
pub trait TokenMinter: Send + Sync {
    async fn mint(&self, project_id: Uuid, computer_id: Uuid) -> Result<String>;
}

/// HS256 heartbeat tokens. They carry no expiry; a token dies with its computer.
pub struct JwtHeartbeatMinter {
    key: EncodingKey,
}

impl JwtHeartbeatMinter {
    pub fn new(secret: &str) -> Self {
        Self {
            key: EncodingKey::from_secret(secret.as_bytes()),
        }
    }
}

#[async_trait]
impl TokenMinter for JwtHeartbeatMinter {
    async fn mint(&self, project_id: Uuid, computer_id: Uuid) -> Result<String> {
        let mut nonce = [0_u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let claims = HeartbeatClaims {
            sub: computer_id.to_string(),
            project_id: project_id.to_string(),
            iat: Utc::now().timestamp(),
            jti: URL_SAFE_NO_PAD.encode(nonce),
        };
        encode(&Header::default(), &claims, &self.key)
            .map_err(|err| Error::Token(format!("Failed to sign heartbeat token: {}", err)))
    }
}

/// SHA-256 of a heartbeat token; the only form a computer record keeps.
pub fn hash_heartbeat_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Environment for one computer, plus the token so the caller can hash it.
#[derive(Debug, Clone)]
pub struct SystemEnv {
    pub vars: BTreeMap<String, String>,
    pub heartbeat_token: String,
}

#[derive(Clone)]
pub struct SystemEnvIssuer {
    server_url: String,
    minter: Arc<dyn TokenMinter>,
}

impl SystemEnvIssuer {
    pub fn new(server_url: impl Into<String>, minter: Arc<dyn TokenMinter>) -> Self {
        Self {
            server_url: server_url.into().trim_end_matches('/').to_string(),
            minter,
        }
    }

    pub fn heartbeat_url(&self, computer_id: Uuid) -> String {
        format!("{}/heartbeat/{}", self.server_url, computer_id)
    }

    /// Build the variables injected into a computer. A minting failure is
    /// returned as-is and must abort the creation.
    pub async fn create_system_env(&self, project_id: Uuid, computer_id: Uuid) -> Result<SystemEnv> {
        let heartbeat_token = self.minter.mint(project_id, computer_id).await?;

        let mut vars = BTreeMap::new();
        vars.insert(ENV_PROJECT_ID.to_string(), project_id.to_string());
        vars.insert(ENV_COMPUTER_ID.to_string(), computer_id.to_string());
        vars.insert(ENV_HEARTBEAT_URL.to_string(), self.heartbeat_url(computer_id));
        vars.insert(ENV_HEARTBEAT_TOKEN.to_string(), heartbeat_token.clone());

        Ok(SystemEnv {
            vars,
            heartbeat_token,
        })
    }
}

/// Minter that always fails, for exercising the abort path.
#[cfg(test)]
pub(crate) struct FailingMinter;

#[cfg(test)]
#[async_trait]
impl TokenMinter for FailingMinter {
    async fn mint(&self, _project_id: Uuid, _computer_id: Uuid) -> Result<String> {
        Err(Error::Token("signing service unavailable".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{decode, DecodingKey, Validation};

    use super::*;

    fn issuer() -> SystemEnvIssuer {
        SystemEnvIssuer::new(
            "https://hangar.example.com/",
            Arc::new(JwtHeartbeatMinter::new("heartbeat-secret")),
        )
    }

    #[tokio::test]
    async fn env_carries_ids_url_and_token() {
        let project_id = Uuid::new_v4();
        let computer_id = Uuid::new_v4();
        let env = issuer().create_system_env(project_id, computer_id).await.unwrap();

        assert_eq!(env.vars[ENV_PROJECT_ID], project_id.to_string());
        assert_eq!(env.vars[ENV_COMPUTER_ID], computer_id.to_string());
        assert_eq!(
            env.vars[ENV_HEARTBEAT_URL],
            format!("https://hangar.example.com/heartbeat/{}", computer_id)
        );
        assert_eq!(env.vars[ENV_HEARTBEAT_TOKEN], env.heartbeat_token);
    }

    #[tokio::test]
    async fn token_is_computer_scoped_and_unique() {
        let issuer = issuer();
        let project_id = Uuid::new_v4();
        let computer_id = Uuid::new_v4();
        let first = issuer.create_system_env(project_id, computer_id).await.unwrap();
        let second = issuer.create_system_env(project_id, computer_id).await.unwrap();
        assert_ne!(first.heartbeat_token, second.heartbeat_token);

        let mut validation = Validation::default();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        let claims = decode::<HeartbeatClaims>(
            &first.heartbeat_token,
            &DecodingKey::from_secret(b"heartbeat-secret"),
            &validation,
        )
        .unwrap()
        .claims;
        assert_eq!(claims.sub, computer_id.to_string());
        assert_eq!(claims.project_id, project_id.to_string());
    }

    #[tokio::test]
    async fn minting_failure_propagates() {
        let issuer = SystemEnvIssuer::new("http://localhost", Arc::new(FailingMinter));
        let err = issuer
            .create_system_env(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Token(_)));
    }

    #[test]
    fn token_hash_is_stable_hex() {
        let hash = hash_heartbeat_token("abc");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_heartbeat_token("abc"));
    }
}
