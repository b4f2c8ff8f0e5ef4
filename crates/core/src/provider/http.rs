use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::{ComputeProvider, CreateAppRequest, MachineDescriptor, ProviderError};

#[derive(Serialize)]
struct CreateApp<'a> {
    app_name: &'a str,
    org_slug: &'a str,
}

#[derive(Deserialize)]
struct CreatedMachine {
    id: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

/// Client for a machines-style REST API (apps own machines, bearer token auth).
pub struct MachinesApiProvider {
    client: Client,
    base_url: String,
    api_token: String,
    org_slug: String,
}

impl MachinesApiProvider {
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>, org_slug: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
            org_slug: org_slug.into(),
        }
    }

    fn machine_body(request: &CreateAppRequest) -> serde_json::Value {
        let mut init = serde_json::Map::new();
        if let Some(cmd) = &request.init_command {
            init.insert("cmd".to_string(), json!(cmd));
        }
        if let Some(entrypoint) = &request.entrypoint {
            init.insert("entrypoint".to_string(), json!(entrypoint));
        }

        json!({
            "name": request.app_name,
            "region": request.region,
            "config": {
                "image": request.image,
                "env": request.env,
                "guest": {
                    "cpu_kind": request.instance_type.cpu_kind(),
                    "cpus": request.instance_type.cpus(),
                    "memory_mb": request.instance_type.memory_mb(),
                },
                "init": init,
                "metadata": {
                    "storage_gb": request.storage_gb.to_string(),
                },
                "auto_destroy": true,
            }
        })
    }

    async fn rejected(response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        ProviderError::Rejected { status, message }
    }
}

#[async_trait]
impl ComputeProvider for MachinesApiProvider {
    async fn create_app(&self, request: &CreateAppRequest) -> Result<MachineDescriptor, ProviderError> {
        debug!(app_name = %request.app_name, "Creating provider app");
        let response = self
            .client
            .post(format!("{}/v1/apps", self.base_url))
            .bearer_auth(&self.api_token)
            .json(&CreateApp {
                app_name: &request.app_name,
                org_slug: &self.org_slug,
            })
            .send()
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::rejected(response).await);
        }

        let response = self
            .client
            .post(format!("{}/v1/apps/{}/machines", self.base_url, request.app_name))
            .bearer_auth(&self.api_token)
            .json(&Self::machine_body(request))
            .send()
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::rejected(response).await);
        }

        let machine: CreatedMachine = response
            .json()
            .await
            .map_err(|err| ProviderError::Request(format!("Invalid machine response: {}", err)))?;
        info!(app_name = %request.app_name, machine_id = %machine.id, "Provider machine created");

        Ok(MachineDescriptor {
            app_name: request.app_name.clone(),
            machine_id: machine.id,
            region: machine.region.or_else(|| request.region.clone()),
            state: machine.state.unwrap_or_else(|| "created".to_string()),
        })
    }

    async fn destroy_app(&self, app_name: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .delete(format!("{}/v1/apps/{}?force=true", self.base_url, app_name))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                info!(app_name = %app_name, "Provider app destroyed");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(ProviderError::NotFound(app_name.to_string())),
            _ => Err(Self::rejected(response).await),
        }
    }
}
