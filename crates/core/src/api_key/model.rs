use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::{explicit_null, trim_to_none, Cursor, ValidationError, Validator};

use super::cipher::SealedSecret;

pub const API_KEY_PREFIX: &str = "hk_";
pub const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: Option<String>,
    /// Display form of the key, e.g. `hk_…x9Qa`.
    pub hint: String,
    /// SHA-256 of the raw key, used for lookup.
    pub lookup_hash: String,
    #[serde(flatten)]
    pub sealed: SealedSecret,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl Cursor for ApiKey {
    fn cursor(&self) -> String {
        self.id.to_string()
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: Option<String>,
}

impl CreateApiKeyRequest {
    pub fn validate(self) -> Result<Option<String>, ValidationError> {
        validate_name(self.name)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateApiKeyRequest {
    #[serde(default, deserialize_with = "explicit_null")]
    pub name: Option<Option<String>>,
}

impl UpdateApiKeyRequest {
    /// `None` leaves the name alone, `Some(None)` clears it.
    pub fn validate(self) -> Result<Option<Option<String>>, ValidationError> {
        match self.name {
            None => Ok(None),
            Some(name) => validate_name(name).map(Some),
        }
    }
}

fn validate_name(name: Option<String>) -> Result<Option<String>, ValidationError> {
    let name = trim_to_none(name);
    let mut validator = Validator::new();
    validator.check(
        name.as_ref().map_or(true, |name| name.chars().count() <= MAX_NAME_LEN),
        "name",
        format!("must be at most {} characters", MAX_NAME_LEN),
    );
    validator.finish()?;
    Ok(name)
}

/// Public representation; never carries the raw key.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyView {
    pub object: &'static str,
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: Option<String>,
    pub key_hint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ApiKey> for ApiKeyView {
    fn from(api_key: ApiKey) -> Self {
        Self {
            object: "api_key",
            id: api_key.id,
            project_id: api_key.project_id,
            name: api_key.name,
            key_hint: api_key.hint,
            created_at: api_key.created_at,
            updated_at: api_key.updated_at,
        }
    }
}

/// Returned only by the create call.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedApiKey {
    #[serde(flatten)]
    pub api_key: ApiKeyView,
    pub key: String,
}
