//! Session cookies
//!
//! The cookie holds an HS256 JWT naming a session id. A valid signature is
//! not enough on its own: the id must still resolve to a live session in the
//! [`AuthStore`](super::AuthStore).

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::store::{AuthError, Session};
use crate::config::AppConfig;

pub const SESSION_COOKIE: &str = "hangar_session";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub sid: String,
    pub org_id: String,
    pub exp: usize,
}

impl SessionClaims {
    pub fn user_id(&self) -> Result<Uuid, AuthError> {
        parse_claim(&self.sub)
    }

    pub fn session_id(&self) -> Result<Uuid, AuthError> {
        parse_claim(&self.sid)
    }
}

fn parse_claim(value: &str) -> Result<Uuid, AuthError> {
    Uuid::parse_str(value).map_err(|_| AuthError::Unauthorized("Malformed session token".to_string()))
}

#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SessionKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, session: &Session) -> Result<String, AuthError> {
        let claims = SessionClaims {
            sub: session.user_id.to_string(),
            sid: session.id.to_string(),
            org_id: session.org_id.to_string(),
            exp: session.expires_at.timestamp().max(0) as usize,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|err| AuthError::Storage(format!("Failed to sign session token: {}", err)))
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        decode::<SessionClaims>(token, &self.decoding, &validation)
            .map(|decoded| decoded.claims)
            .map_err(|err| AuthError::Unauthorized(format!("Invalid session token: {}", err)))
    }
}

/// Cookie attributes. Production cookies are cross-site so the dashboard can
/// live on another origin; development cookies stay host-only and lax.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub secure: bool,
    pub same_site: SameSite,
    pub domain: Option<String>,
}

impl CookieSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        if config.is_production() {
            Self {
                secure: true,
                same_site: SameSite::None,
                domain: config.cookie_domain.clone(),
            }
        } else {
            Self {
                secure: false,
                same_site: SameSite::Lax,
                domain: None,
            }
        }
    }

    fn cookie(&self, value: String) -> Cookie<'static> {
        let mut builder = Cookie::build((SESSION_COOKIE, value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(self.same_site);
        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }
        builder.build()
    }

    pub fn set(&self, jar: CookieJar, token: String) -> CookieJar {
        jar.add(self.cookie(token))
    }

    pub fn clear(&self, jar: CookieJar) -> CookieJar {
        jar.remove(self.cookie(String::new()))
    }
}
