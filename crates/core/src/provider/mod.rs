//! Compute provider boundary
//!
//! The lifecycle manager only ever talks to a [`ComputeProvider`]. Production
//! traffic goes through [`MachinesApiProvider`]; tests use [`InMemoryProvider`].

mod http;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::template::InstanceType;

pub use http::MachinesApiProvider;
pub use memory::InMemoryProvider;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("app '{0}' not found")]
    NotFound(String),

    #[error("provider request failed: {0}")]
    Request(String),

    #[error("provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Everything the provider needs to boot one computer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateAppRequest {
    pub app_name: String,
    pub region: Option<String>,
    pub image: String,
    pub instance_type: InstanceType,
    pub storage_gb: u32,
    pub init_command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub env: BTreeMap<String, String>,
}

/// What the provider hands back for a created machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineDescriptor {
    pub app_name: String,
    pub machine_id: String,
    pub region: Option<String>,
    pub state: String,
}

#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Create an app and its machine. The organization scope is supplied by the
    /// adapter, never by the caller.
    async fn create_app(&self, request: &CreateAppRequest) -> Result<MachineDescriptor, ProviderError>;

    /// Destroy an app. Reports [`ProviderError::NotFound`] when it is already gone.
    async fn destroy_app(&self, app_name: &str) -> Result<(), ProviderError>;
}
