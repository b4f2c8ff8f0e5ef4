//! Template persistent store
//!
//! Soft-delete only: deleted templates stay on disk (and keep their slug) but are
//! filtered from every default read.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::error::Error;
use crate::persist::{load_state, persist_state};
use crate::schema::{paginate, ListResponse, Pagination};
use crate::Result;

use super::model::{NewTemplate, Template, TemplatePatch};

#[derive(Clone)]
pub struct TemplateStore {
    templates: Arc<RwLock<HashMap<String, Template>>>,
    file_path: PathBuf,
}

impl TemplateStore {
    pub async fn new(base_dir: PathBuf) -> Result<Self> {
        let file_path = base_dir.join("templates.json");
        let templates = load_state(&file_path).await?;
        Ok(Self {
            templates: Arc::new(RwLock::new(templates)),
            file_path,
        })
    }

    /// Create a template owned by `project_id`.
    pub async fn create(&self, project_id: Uuid, new: NewTemplate) -> Result<Template> {
        self.insert(Some(project_id), new).await
    }

    /// Seed a global template if its slug has never been used.
    pub async fn ensure_global(&self, new: NewTemplate) -> Result<Template> {
        if let Some(existing) = self.templates.read().await.get(&new.slug) {
            return Ok(existing.clone());
        }
        let slug = new.slug.clone();
        let template = self
            .insert(
                None,
                NewTemplate {
                    is_public: true,
                    ..new
                },
            )
            .await?;
        info!(slug = %slug, "Seeded global template");
        Ok(template)
    }

    async fn insert(&self, project_id: Option<Uuid>, new: NewTemplate) -> Result<Template> {
        let mut templates = self.templates.write().await;
        if templates.contains_key(&new.slug) {
            return Err(Error::Conflict(format!(
                "Template slug '{}' already exists",
                new.slug
            )));
        }

        let now = Utc::now();
        let template = Template {
            slug: new.slug,
            project_id,
            instance_type: new.instance_type,
            storage_gb: new.storage_gb,
            image: new.image,
            init_command: new.init_command,
            entrypoint: new.entrypoint,
            is_public: new.is_public,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        templates.insert(template.slug.clone(), template.clone());
        persist_state(&self.file_path, &*templates).await?;
        Ok(template)
    }

    /// Resolve a template the project may read: owned by it, or public.
    ///
    /// Deleted templates and other projects' private templates are reported as
    /// not found so their existence does not leak.
    pub async fn get_visible(&self, project_id: Uuid, slug: &str) -> Result<Template> {
        let templates = self.templates.read().await;
        templates
            .get(slug)
            .filter(|template| !template.is_deleted() && template.is_visible_to(project_id))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("Template '{}' not found", slug)))
    }

    pub async fn list_visible(
        &self,
        project_id: Uuid,
        pagination: &Pagination,
    ) -> ListResponse<Template> {
        let templates = self.templates.read().await;
        let visible = templates
            .values()
            .filter(|template| !template.is_deleted() && template.is_visible_to(project_id))
            .cloned()
            .collect();
        paginate(visible, pagination)
    }

    pub async fn update(
        &self,
        project_id: Uuid,
        slug: &str,
        patch: TemplatePatch,
    ) -> Result<Template> {
        let mut templates = self.templates.write().await;
        let template = owned_mut(&mut templates, project_id, slug)?;

        if let Some(instance_type) = patch.instance_type {
            template.instance_type = instance_type;
        }
        if let Some(storage_gb) = patch.storage_gb {
            template.storage_gb = storage_gb;
        }
        if let Some(image) = patch.image {
            template.image = image;
        }
        if let Some(init_command) = patch.init_command {
            template.init_command = init_command;
        }
        if let Some(entrypoint) = patch.entrypoint {
            template.entrypoint = entrypoint;
        }
        if let Some(is_public) = patch.is_public {
            template.is_public = is_public;
        }
        template.updated_at = Utc::now();

        let updated = template.clone();
        persist_state(&self.file_path, &*templates).await?;
        Ok(updated)
    }

    pub async fn soft_delete(&self, project_id: Uuid, slug: &str) -> Result<Template> {
        let mut templates = self.templates.write().await;
        let template = owned_mut(&mut templates, project_id, slug)?;
        let now = Utc::now();
        template.deleted_at = Some(now);
        template.updated_at = now;

        let deleted = template.clone();
        persist_state(&self.file_path, &*templates).await?;
        info!(slug = %slug, project_id = %project_id, "Template soft-deleted");
        Ok(deleted)
    }

    /// Administrative lookup that also sees soft-deleted templates.
    pub async fn get_including_deleted(&self, slug: &str) -> Option<Template> {
        self.templates.read().await.get(slug).cloned()
    }
}

fn owned_mut<'a>(
    templates: &'a mut HashMap<String, Template>,
    project_id: Uuid,
    slug: &str,
) -> Result<&'a mut Template> {
    let template = templates
        .get_mut(slug)
        .filter(|template| !template.is_deleted() && template.is_visible_to(project_id))
        .ok_or_else(|| Error::not_found(format!("Template '{}' not found", slug)))?;
    if !template.is_owned_by(project_id) {
        return Err(Error::forbidden(format!(
            "Template '{}' belongs to another project",
            slug
        )));
    }
    Ok(template)
}
