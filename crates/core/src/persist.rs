//! JSON state file helpers shared by the file-backed stores.

use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Error;
use crate::Result;

/// Load a state file, returning the default state if it does not exist yet.
pub async fn load_state<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| Error::Storage(format!("Failed to read {}: {}", path.display(), err)))?;
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&content)
        .map_err(|err| Error::Storage(format!("Failed to parse {}: {}", path.display(), err)))
}

/// Write a state file, creating the parent directory when needed.
pub async fn persist_state<T>(path: &Path, state: &T) -> Result<()>
where
    T: Serialize,
{
    let content = serde_json::to_string_pretty(state)
        .map_err(|err| Error::Storage(format!("Failed to serialize state: {}", err)))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| Error::Storage(format!("Failed to create directory: {}", err)))?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|err| Error::Storage(format!("Failed to write {}: {}", path.display(), err)))
}
