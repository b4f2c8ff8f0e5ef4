//! Computer lifecycle
//!
//! `Requested -> Provisioning -> Running -> (Expiring | DestroyRequested) -> Destroyed`,
//! with `Failed` reachable before a computer ever runs. Only running and later
//! states are visible through the default read paths.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Error;
use crate::provider::{ComputeProvider, CreateAppRequest, ProviderError};
use crate::schema::{ListResponse, Pagination};
use crate::template::TemplateStore;
use crate::token::{hash_heartbeat_token, SystemEnvIssuer};
use crate::Result;

use super::model::{Computer, ComputerStatus, NewComputer};
use super::policy::ComputePolicy;
use super::store::{ComputerStore, DestroyClaim};

#[derive(Clone)]
pub struct ComputerManager {
    store: ComputerStore,
    templates: TemplateStore,
    provider: Arc<dyn ComputeProvider>,
    env: SystemEnvIssuer,
    policy: ComputePolicy,
}

impl ComputerManager {
    pub fn new(
        store: ComputerStore,
        templates: TemplateStore,
        provider: Arc<dyn ComputeProvider>,
        env: SystemEnvIssuer,
        policy: ComputePolicy,
    ) -> Self {
        Self {
            store,
            templates,
            provider,
            env,
            policy,
        }
    }

    pub fn policy(&self) -> &ComputePolicy {
        &self.policy
    }

    /// Provision a computer from a template.
    ///
    /// Nothing is persisted as visible until the provider has created the
    /// machine. Provider or persistence failures trigger a best-effort destroy
    /// of whatever the provider may have created.
    pub async fn create(&self, project_id: Uuid, new: NewComputer) -> Result<Computer> {
        let region = self.policy.validate_region(new.region.as_deref())?;
        let ttl_seconds = self.policy.validate_ttl_seconds(new.ttl_seconds)?;
        let template = self.templates.get_visible(project_id, &new.template_slug).await?;

        let id = Uuid::new_v4();
        let app_name = format!("hangar-{}", id.simple());
        debug!(computer_id = %id, status = ?ComputerStatus::Requested, template = %template.slug, "Computer requested");

        let env = match self.env.create_system_env(project_id, id).await {
            Ok(env) => env,
            Err(err) => {
                warn!(computer_id = %id, error = %err, "Heartbeat token minting failed");
                self.record_failed(id, project_id, &template.slug, &app_name, region, ttl_seconds)
                    .await;
                return Err(err);
            }
        };

        debug!(computer_id = %id, status = ?ComputerStatus::Provisioning, "Creating provider app");
        let request = CreateAppRequest {
            app_name: app_name.clone(),
            region: region.clone(),
            image: template.image.clone(),
            instance_type: template.instance_type,
            storage_gb: template.storage_gb,
            init_command: template.init_command.clone(),
            entrypoint: template.entrypoint.clone(),
            env: env.vars,
        };
        let machine = match self.provider.create_app(&request).await {
            Ok(machine) => machine,
            Err(err) => {
                error!(computer_id = %id, error = %err, "Provider create failed");
                self.compensate(&app_name).await;
                self.record_failed(id, project_id, &template.slug, &app_name, region, ttl_seconds)
                    .await;
                return Err(err.into());
            }
        };

        let now = Utc::now();
        let computer = Computer {
            id,
            project_id,
            template_slug: template.slug,
            region,
            ttl_seconds,
            status: ComputerStatus::Running,
            app_name: app_name.clone(),
            machine: Some(machine),
            heartbeat_token_hash: hash_heartbeat_token(&env.heartbeat_token),
            created_at: now,
            updated_at: now,
            last_heartbeat_at: Some(now),
            destroyed_at: None,
            deleted_at: None,
        };
        match self.store.insert(computer).await {
            Ok(computer) => {
                info!(computer_id = %computer.id, project_id = %project_id, ttl_seconds = ?computer.ttl_seconds, "Computer running");
                Ok(computer)
            }
            Err(err) => {
                error!(computer_id = %id, error = %err, "Failed to persist computer");
                self.compensate(&app_name).await;
                Err(err)
            }
        }
    }

    pub async fn retrieve(&self, project_id: Uuid, id: Uuid) -> Result<Computer> {
        self.store.get(project_id, id).await
    }

    pub async fn list(&self, project_id: Uuid, pagination: &Pagination) -> ListResponse<Computer> {
        self.store.list(project_id, pagination).await
    }

    pub async fn list_including_deleted(&self, project_id: Uuid) -> Vec<Computer> {
        self.store.list_including_deleted(project_id).await
    }

    /// Change the TTL of a running computer. An omitted TTL leaves it as is.
    pub async fn update_ttl(&self, project_id: Uuid, id: Uuid, ttl_seconds: Option<Option<i64>>) -> Result<Computer> {
        let Some(requested) = ttl_seconds else {
            return self.store.get(project_id, id).await;
        };
        let ttl_seconds = self.policy.validate_ttl_seconds(Some(requested))?;
        self.store.set_ttl(project_id, id, ttl_seconds).await
    }

    /// Destroy a computer. Destroying an already destroyed computer succeeds.
    pub async fn destroy(&self, project_id: Uuid, id: Uuid) -> Result<Computer> {
        match self.store.claim_destroy(Some(project_id), id).await? {
            DestroyClaim::AlreadyDestroyed(computer) => Ok(computer),
            DestroyClaim::Proceed(computer) => self.teardown(computer).await,
        }
    }

    pub async fn heartbeat(&self, id: Uuid, token: &str) -> Result<Computer> {
        self.store
            .record_heartbeat(id, &hash_heartbeat_token(token), Utc::now())
            .await
    }

    /// Expire every running computer whose TTL elapsed without a heartbeat.
    ///
    /// Returns the ids that reached `Destroyed`. Teardown failures are logged
    /// and left in `DestroyRequested` for the next pass.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        self.store.mark_expiring_due(now).await?;
        let due = self.store.pending_teardown().await;

        let mut destroyed = Vec::new();
        for id in due {
            let outcome = match self.store.claim_destroy(None, id).await {
                Ok(DestroyClaim::AlreadyDestroyed(_)) => Ok(()),
                Ok(DestroyClaim::Proceed(computer)) => self.teardown(computer).await.map(|_| ()),
                Err(err) => Err(err),
            };
            match outcome {
                Ok(()) => destroyed.push(id),
                Err(err) => warn!(computer_id = %id, error = %err, "Failed to expire computer"),
            }
        }
        Ok(destroyed)
    }

    async fn teardown(&self, computer: Computer) -> Result<Computer> {
        match self.provider.destroy_app(&computer.app_name).await {
            Ok(()) => {}
            Err(ProviderError::NotFound(_)) => {
                debug!(computer_id = %computer.id, "Provider app already gone");
            }
            Err(err) => {
                error!(computer_id = %computer.id, error = %err, "Provider destroy failed");
                return Err(Error::Provider(err));
            }
        }
        self.store.finish_destroy(computer.id).await
    }

    async fn compensate(&self, app_name: &str) {
        match self.provider.destroy_app(app_name).await {
            Ok(()) => info!(app_name = %app_name, "Compensating destroy succeeded"),
            Err(ProviderError::NotFound(_)) => {}
            Err(err) => error!(app_name = %app_name, error = %err, "Compensating destroy failed; app may be orphaned"),
        }
    }

    /// Keep an audit trail of failed attempts, hidden from default reads.
    async fn record_failed(
        &self,
        id: Uuid,
        project_id: Uuid,
        template_slug: &str,
        app_name: &str,
        region: Option<String>,
        ttl_seconds: Option<i64>,
    ) {
        let now = Utc::now();
        let failed = Computer {
            id,
            project_id,
            template_slug: template_slug.to_string(),
            region,
            ttl_seconds,
            status: ComputerStatus::Failed,
            app_name: app_name.to_string(),
            machine: None,
            heartbeat_token_hash: String::new(),
            created_at: now,
            updated_at: now,
            last_heartbeat_at: None,
            destroyed_at: None,
            deleted_at: Some(now),
        };
        if let Err(err) = self.store.insert(failed).await {
            warn!(computer_id = %id, error = %err, "Failed to record failed computer");
        }
    }
}

/// Run [`ComputerManager::expire_due`] on a fixed interval until the task is aborted.
pub fn start_expiry_sweeper(manager: ComputerManager, every: std::time::Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match manager.expire_due(Utc::now()).await {
                Ok(expired) if !expired.is_empty() => {
                    info!(count = expired.len(), "Expired computers destroyed");
                }
                Ok(_) => {}
                Err(err) => error!(error = %err, "Expiry sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::provider::InMemoryProvider;
    use crate::template::{InstanceType, NewTemplate};
    use crate::token::{FailingMinter, JwtHeartbeatMinter, TokenMinter, ENV_COMPUTER_ID, ENV_HEARTBEAT_TOKEN};

    struct Harness {
        manager: ComputerManager,
        provider: Arc<InMemoryProvider>,
        templates: TemplateStore,
        _dir: TempDir,
    }

    async fn harness_with(minter: Arc<dyn TokenMinter>) -> Harness {
        let dir = tempdir().unwrap();
        let templates = TemplateStore::new(dir.path().to_path_buf()).await.unwrap();
        templates.ensure_global(base_template("base")).await.unwrap();
        let store = ComputerStore::new(dir.path().to_path_buf()).await.unwrap();
        let provider = Arc::new(InMemoryProvider::new());
        let manager = ComputerManager::new(
            store,
            templates.clone(),
            provider.clone(),
            SystemEnvIssuer::new("https://hangar.test", minter),
            ComputePolicy::default(),
        );
        Harness {
            manager,
            provider,
            templates,
            _dir: dir,
        }
    }

    async fn harness() -> Harness {
        harness_with(Arc::new(JwtHeartbeatMinter::new("heartbeat-secret"))).await
    }

    fn base_template(slug: &str) -> NewTemplate {
        NewTemplate {
            slug: slug.to_string(),
            instance_type: InstanceType::SharedCpu1x,
            storage_gb: 10,
            image: "registry.example.com/base:latest".to_string(),
            init_command: None,
            entrypoint: None,
            is_public: false,
        }
    }

    fn request(ttl_seconds: Option<Option<i64>>, region: Option<&str>) -> NewComputer {
        NewComputer {
            template_slug: "base".to_string(),
            ttl_seconds,
            region: region.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn null_ttl_never_expires() {
        let h = harness().await;
        let project = Uuid::new_v4();
        let computer = h
            .manager
            .create(project, request(Some(None), Some("us-east")))
            .await
            .unwrap();

        assert_eq!(computer.ttl_seconds, None);
        assert_eq!(computer.region.as_deref(), Some("us-east"));
        assert!(h
            .manager
            .expire_due(Utc::now() + Duration::days(3650))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            h.manager.retrieve(project, computer.id).await.unwrap().status,
            ComputerStatus::Running
        );
    }

    #[tokio::test]
    async fn ttl_forty_expires_after_silent_window() {
        let h = harness().await;
        let project = Uuid::new_v4();
        let computer = h
            .manager
            .create(project, request(Some(Some(40)), Some("us-east")))
            .await
            .unwrap();
        let since = computer.last_heartbeat_at.unwrap();

        assert!(h
            .manager
            .expire_due(since + Duration::seconds(39))
            .await
            .unwrap()
            .is_empty());

        let expired = h.manager.expire_due(since + Duration::seconds(41)).await.unwrap();
        assert_eq!(expired, vec![computer.id]);
        assert!(h.manager.retrieve(project, computer.id).await.is_err());
        assert_eq!(h.provider.app_count().await, 0);

        let history = h.manager.list_including_deleted(project).await;
        assert_eq!(history[0].status, ComputerStatus::Destroyed);
    }

    #[tokio::test]
    async fn omitted_ttl_uses_default() {
        let h = harness().await;
        let computer = h
            .manager
            .create(Uuid::new_v4(), request(None, None))
            .await
            .unwrap();
        assert_eq!(computer.ttl_seconds, Some(3600));
        assert_eq!(computer.region, None);
    }

    #[tokio::test]
    async fn invalid_ttl_is_rejected_before_any_side_effect() {
        let h = harness().await;
        let project = Uuid::new_v4();
        let err = h
            .manager
            .create(project, request(Some(Some(10)), Some("us-east")))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::BadRequest(_)));
        assert_eq!(h.provider.create_calls(), 0);
        assert!(h.manager.list(project, &Pagination::default()).await.data.is_empty());
        assert!(h.manager.list_including_deleted(project).await.is_empty());
    }

    #[tokio::test]
    async fn unknown_region_is_rejected() {
        let h = harness().await;
        let err = h
            .manager
            .create(Uuid::new_v4(), request(None, Some("moon-base")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(ref message) if message.contains("moon-base")));
        assert_eq!(h.provider.create_calls(), 0);
    }

    #[tokio::test]
    async fn provider_failure_leaves_nothing_visible() {
        let h = harness().await;
        let project = Uuid::new_v4();
        h.provider.set_fail_creates(true);

        let err = h.manager.create(project, request(None, None)).await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));

        assert!(h.manager.list(project, &Pagination::default()).await.data.is_empty());
        assert_eq!(h.provider.app_count().await, 0);
        assert_eq!(h.provider.destroy_calls(), 1);

        let history = h.manager.list_including_deleted(project).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ComputerStatus::Failed);
        assert!(h.manager.retrieve(project, history[0].id).await.is_err());
    }

    #[tokio::test]
    async fn minting_failure_aborts_before_provider() {
        let h = harness_with(Arc::new(FailingMinter)).await;
        let err = h
            .manager
            .create(Uuid::new_v4(), request(None, None))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Token(_)));
        assert_eq!(h.provider.create_calls(), 0);
    }

    #[tokio::test]
    async fn system_env_is_injected_and_token_only_hashed() {
        let h = harness().await;
        let computer = h
            .manager
            .create(Uuid::new_v4(), request(None, None))
            .await
            .unwrap();

        let app = h.provider.app(&computer.app_name).await.unwrap();
        assert_eq!(app.env[ENV_COMPUTER_ID], computer.id.to_string());
        let token = &app.env[ENV_HEARTBEAT_TOKEN];
        assert_ne!(&computer.heartbeat_token_hash, token);
        assert_eq!(computer.heartbeat_token_hash, hash_heartbeat_token(token));

        let refreshed = h.manager.heartbeat(computer.id, token).await.unwrap();
        assert!(refreshed.last_heartbeat_at >= computer.last_heartbeat_at);
        assert!(matches!(
            h.manager.heartbeat(computer.id, "forged").await,
            Err(Error::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn destroy_twice_succeeds_both_times() {
        let h = harness().await;
        let project = Uuid::new_v4();
        let computer = h.manager.create(project, request(None, None)).await.unwrap();

        let first = h.manager.destroy(project, computer.id).await.unwrap();
        let second = h.manager.destroy(project, computer.id).await.unwrap();

        assert_eq!(first.status, ComputerStatus::Destroyed);
        assert_eq!(second.status, ComputerStatus::Destroyed);
        assert_eq!(h.provider.destroy_calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_destroys_both_resolve() {
        let h = harness().await;
        let project = Uuid::new_v4();
        let computer = h.manager.create(project, request(None, None)).await.unwrap();

        let (a, b) = tokio::join!(
            h.manager.destroy(project, computer.id),
            h.manager.destroy(project, computer.id)
        );
        assert_eq!(a.unwrap().status, ComputerStatus::Destroyed);
        assert_eq!(b.unwrap().status, ComputerStatus::Destroyed);
    }

    #[tokio::test]
    async fn destroy_tolerates_app_already_gone() {
        let h = harness().await;
        let project = Uuid::new_v4();
        let computer = h.manager.create(project, request(None, None)).await.unwrap();
        h.provider.destroy_app(&computer.app_name).await.unwrap();

        let destroyed = h.manager.destroy(project, computer.id).await.unwrap();
        assert_eq!(destroyed.status, ComputerStatus::Destroyed);
    }

    #[tokio::test]
    async fn other_projects_cannot_touch_a_computer() {
        let h = harness().await;
        let owner = Uuid::new_v4();
        let intruder = Uuid::new_v4();
        let computer = h.manager.create(owner, request(None, None)).await.unwrap();

        assert!(matches!(
            h.manager.retrieve(intruder, computer.id).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            h.manager.update_ttl(intruder, computer.id, Some(None)).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            h.manager.destroy(intruder, computer.id).await,
            Err(Error::NotFound(_))
        ));
        assert!(h.manager.list(intruder, &Pagination::default()).await.data.is_empty());
        assert_eq!(
            h.manager.retrieve(owner, computer.id).await.unwrap().status,
            ComputerStatus::Running
        );
    }

    #[tokio::test]
    async fn template_must_be_visible_and_live() {
        let h = harness().await;
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        h.templates.create(owner, base_template("private-box")).await.unwrap();

        let mut new = request(None, None);
        new.template_slug = "private-box".to_string();
        assert!(matches!(
            h.manager.create(other, new.clone()).await,
            Err(Error::NotFound(_))
        ));
        assert!(h.manager.create(owner, new.clone()).await.is_ok());

        h.templates.soft_delete(owner, "private-box").await.unwrap();
        assert!(matches!(
            h.manager.create(owner, new).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_ttl_goes_through_policy() {
        let h = harness().await;
        let project = Uuid::new_v4();
        let computer = h.manager.create(project, request(None, None)).await.unwrap();

        assert!(matches!(
            h.manager.update_ttl(project, computer.id, Some(Some(10))).await,
            Err(Error::BadRequest(_))
        ));
        let unchanged = h.manager.update_ttl(project, computer.id, None).await.unwrap();
        assert_eq!(unchanged.ttl_seconds, Some(3600));
        let forever = h
            .manager
            .update_ttl(project, computer.id, Some(None))
            .await
            .unwrap();
        assert_eq!(forever.ttl_seconds, None);
    }
}
