use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ComputeProvider, CreateAppRequest, MachineDescriptor, ProviderError};

/// Deterministic in-process provider.
///
/// With `fail_creates` set, each create leaves a half-made app behind and then
/// fails, so callers have something to compensate for.
#[derive(Default)]
pub struct InMemoryProvider {
    apps: Mutex<HashMap<String, CreateAppRequest>>,
    fail_creates: AtomicBool,
    create_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    pub async fn app_count(&self) -> usize {
        self.apps.lock().await.len()
    }

    /// The request an app was created with, including its injected env.
    pub async fn app(&self, app_name: &str) -> Option<CreateAppRequest> {
        self.apps.lock().await.get(app_name).cloned()
    }
}

#[async_trait]
impl ComputeProvider for InMemoryProvider {
    async fn create_app(&self, request: &CreateAppRequest) -> Result<MachineDescriptor, ProviderError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut apps = self.apps.lock().await;
        apps.insert(request.app_name.clone(), request.clone());

        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected {
                status: 503,
                message: "machine capacity unavailable".to_string(),
            });
        }

        Ok(MachineDescriptor {
            app_name: request.app_name.clone(),
            machine_id: Uuid::new_v4().simple().to_string(),
            region: request.region.clone(),
            state: "started".to_string(),
        })
    }

    async fn destroy_app(&self, app_name: &str) -> Result<(), ProviderError> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        match self.apps.lock().await.remove(app_name) {
            Some(_) => Ok(()),
            None => Err(ProviderError::NotFound(app_name.to_string())),
        }
    }
}
