use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Error;
use crate::persist::{load_state, persist_state};
use crate::schema::{paginate, ListResponse, Pagination};
use crate::Result;

use super::cipher::KeyVault;
use super::model::{ApiKey, API_KEY_PREFIX};

#[derive(Clone)]
pub struct ApiKeyStore {
    keys: Arc<RwLock<HashMap<Uuid, ApiKey>>>,
    /// `lookup_hash` to key id, rebuilt on load. Entries outlive soft deletes.
    by_lookup: Arc<RwLock<HashMap<String, Uuid>>>,
    file_path: PathBuf,
    vault: KeyVault,
}

impl ApiKeyStore {
    pub async fn new(base_dir: PathBuf, vault: KeyVault) -> Result<Self> {
        let file_path = base_dir.join("api_keys.json");
        let keys: HashMap<Uuid, ApiKey> = load_state(&file_path).await?;
        let by_lookup = keys
            .values()
            .map(|api_key| (api_key.lookup_hash.clone(), api_key.id))
            .collect();
        Ok(Self {
            keys: Arc::new(RwLock::new(keys)),
            by_lookup: Arc::new(RwLock::new(by_lookup)),
            file_path,
            vault,
        })
    }

    /// Create a key and return it together with the raw secret.
    ///
    /// The raw secret is not recoverable through any other call.
    pub async fn create(&self, project_id: Uuid, name: Option<String>) -> Result<(ApiKey, String)> {
        let raw = generate_api_key();
        let sealed = self.vault.seal(&raw)?;
        let now = Utc::now();
        let api_key = ApiKey {
            id: Uuid::new_v4(),
            project_id,
            name,
            hint: key_hint(&raw),
            lookup_hash: hash_api_key(&raw),
            sealed,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let mut keys = self.keys.write().await;
        keys.insert(api_key.id, api_key.clone());
        persist_state(&self.file_path, &*keys).await?;
        self.by_lookup
            .write()
            .await
            .insert(api_key.lookup_hash.clone(), api_key.id);
        info!(api_key_id = %api_key.id, project_id = %project_id, "API key created");
        Ok((api_key, raw))
    }

    pub async fn list(&self, project_id: Uuid, pagination: &Pagination) -> ListResponse<ApiKey> {
        let keys = self.keys.read().await;
        let owned = keys
            .values()
            .filter(|api_key| api_key.project_id == project_id && !api_key.is_deleted())
            .cloned()
            .collect();
        paginate(owned, pagination)
    }

    pub async fn get(&self, project_id: Uuid, id: Uuid) -> Result<ApiKey> {
        let keys = self.keys.read().await;
        keys.get(&id)
            .filter(|api_key| api_key.project_id == project_id && !api_key.is_deleted())
            .cloned()
            .ok_or_else(|| Error::not_found(format!("API key {} not found", id)))
    }

    pub async fn rename(&self, project_id: Uuid, id: Uuid, name: Option<String>) -> Result<ApiKey> {
        let mut keys = self.keys.write().await;
        let api_key = keys
            .get_mut(&id)
            .filter(|api_key| api_key.project_id == project_id && !api_key.is_deleted())
            .ok_or_else(|| Error::not_found(format!("API key {} not found", id)))?;
        api_key.name = name;
        api_key.updated_at = Utc::now();

        let updated = api_key.clone();
        persist_state(&self.file_path, &*keys).await?;
        Ok(updated)
    }

    pub async fn soft_delete(&self, project_id: Uuid, id: Uuid) -> Result<ApiKey> {
        let mut keys = self.keys.write().await;
        let api_key = keys
            .get_mut(&id)
            .filter(|api_key| api_key.project_id == project_id && !api_key.is_deleted())
            .ok_or_else(|| Error::not_found(format!("API key {} not found", id)))?;
        let now = Utc::now();
        api_key.deleted_at = Some(now);
        api_key.updated_at = now;

        let deleted = api_key.clone();
        persist_state(&self.file_path, &*keys).await?;
        info!(api_key_id = %id, project_id = %project_id, "API key revoked");
        Ok(deleted)
    }

    /// Resolve the key presented by a client.
    ///
    /// Unknown, deleted and mismatching keys all fail with the same
    /// `Unauthorized` error.
    pub async fn authenticate(&self, raw: &str) -> Result<ApiKey> {
        let rejected = || Error::unauthorized("Invalid API key");
        let raw = raw.trim();
        if !raw.starts_with(API_KEY_PREFIX) {
            return Err(rejected());
        }

        let lookup_hash = hash_api_key(raw);
        let id = self
            .by_lookup
            .read()
            .await
            .get(&lookup_hash)
            .copied()
            .ok_or_else(rejected)?;
        let api_key = self.keys.read().await.get(&id).cloned().ok_or_else(rejected)?;
        if api_key.is_deleted() {
            return Err(rejected());
        }

        let stored = self.vault.open(&api_key.sealed).map_err(|err| {
            warn!(api_key_id = %api_key.id, error = %err, "Failed to open sealed API key");
            rejected()
        })?;
        if !bool::from(stored.as_bytes().ct_eq(raw.as_bytes())) {
            return Err(rejected());
        }
        Ok(api_key)
    }
}

fn generate_api_key() -> String {
    let mut bytes = [0_u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}{}", API_KEY_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
}

fn hash_api_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn key_hint(raw: &str) -> String {
    let tail: String = raw
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{}…{}", API_KEY_PREFIX, tail)
}

#[cfg(test)]
mod tests {
    use tempfile::{tempdir, TempDir};

    use super::*;

    async fn build_store() -> (ApiKeyStore, TempDir) {
        let dir = tempdir().unwrap();
        let store = ApiKeyStore::new(dir.path().to_path_buf(), KeyVault::new([3; 32]))
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn created_key_authenticates() {
        let (store, _dir) = build_store().await;
        let project = Uuid::new_v4();
        let (api_key, raw) = store.create(project, Some("ci".to_string())).await.unwrap();

        assert!(raw.starts_with(API_KEY_PREFIX));
        assert!(api_key.hint.ends_with(&raw[raw.len() - 4..]));
        assert!(!api_key.hint.contains(&raw[3..20]));

        let resolved = store.authenticate(&raw).await.unwrap();
        assert_eq!(resolved.id, api_key.id);
        assert_eq!(resolved.project_id, project);
    }

    #[tokio::test]
    async fn deleted_and_unknown_keys_are_rejected() {
        let (store, _dir) = build_store().await;
        let project = Uuid::new_v4();
        let (api_key, raw) = store.create(project, None).await.unwrap();
        store.soft_delete(project, api_key.id).await.unwrap();

        assert!(matches!(store.authenticate(&raw).await, Err(Error::Unauthorized(_))));
        assert!(matches!(
            store.authenticate("hk_not-a-real-key").await,
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(store.authenticate("nope").await, Err(Error::Unauthorized(_))));
    }

    #[tokio::test]
    async fn lookup_index_is_rebuilt_on_reload() {
        let dir = tempdir().unwrap();
        let vault = KeyVault::new([3; 32]);
        let project = Uuid::new_v4();
        let store = ApiKeyStore::new(dir.path().to_path_buf(), vault.clone()).await.unwrap();
        let (live, live_raw) = store.create(project, None).await.unwrap();
        let (revoked, revoked_raw) = store.create(project, None).await.unwrap();
        store.soft_delete(project, revoked.id).await.unwrap();

        let reloaded = ApiKeyStore::new(dir.path().to_path_buf(), vault).await.unwrap();
        assert_eq!(reloaded.by_lookup.read().await.len(), 2);
        assert_eq!(reloaded.authenticate(&live_raw).await.unwrap().id, live.id);
        assert!(matches!(
            reloaded.authenticate(&revoked_raw).await,
            Err(Error::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn keys_are_project_scoped() {
        let (store, _dir) = build_store().await;
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let (api_key, _raw) = store.create(owner, None).await.unwrap();

        assert!(matches!(store.get(other, api_key.id).await, Err(Error::NotFound(_))));
        assert!(matches!(
            store.rename(other, api_key.id, Some("x".into())).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.soft_delete(other, api_key.id).await,
            Err(Error::NotFound(_))
        ));
        assert!(store.list(other, &Pagination::default()).await.data.is_empty());
    }

    #[tokio::test]
    async fn rename_and_clear_name() {
        let (store, _dir) = build_store().await;
        let project = Uuid::new_v4();
        let (api_key, _raw) = store.create(project, Some("old".into())).await.unwrap();

        let renamed = store
            .rename(project, api_key.id, Some("new".into()))
            .await
            .unwrap();
        assert_eq!(renamed.name.as_deref(), Some("new"));

        let cleared = store.rename(project, api_key.id, None).await.unwrap();
        assert!(cleared.name.is_none());
    }
}
