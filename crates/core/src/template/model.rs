//! Template model definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::{
    explicit_null, is_slug, trim_to_none, Cursor, ValidationError, Validator,
};

pub const MIN_STORAGE_GB: u32 = 1;
pub const MAX_STORAGE_GB: u32 = 500;

/// Machine shape offered to templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceType {
    SharedCpu1x,
    SharedCpu2x,
    SharedCpu4x,
    Performance1x,
    Performance2x,
    Performance4x,
}

impl InstanceType {
    pub const ALL: [InstanceType; 6] = [
        Self::SharedCpu1x,
        Self::SharedCpu2x,
        Self::SharedCpu4x,
        Self::Performance1x,
        Self::Performance2x,
        Self::Performance4x,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SharedCpu1x => "shared-cpu-1x",
            Self::SharedCpu2x => "shared-cpu-2x",
            Self::SharedCpu4x => "shared-cpu-4x",
            Self::Performance1x => "performance-1x",
            Self::Performance2x => "performance-2x",
            Self::Performance4x => "performance-4x",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|instance_type| instance_type.as_str() == value.trim())
    }

    pub fn cpu_kind(self) -> &'static str {
        match self {
            Self::SharedCpu1x | Self::SharedCpu2x | Self::SharedCpu4x => "shared",
            Self::Performance1x | Self::Performance2x | Self::Performance4x => "performance",
        }
    }

    pub fn cpus(self) -> u32 {
        match self {
            Self::SharedCpu1x | Self::Performance1x => 1,
            Self::SharedCpu2x | Self::Performance2x => 2,
            Self::SharedCpu4x | Self::Performance4x => 4,
        }
    }

    pub fn memory_mb(self) -> u32 {
        match self.cpu_kind() {
            "performance" => self.cpus() * 2048,
            _ => self.cpus() * 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub slug: String,
    /// `None` for global templates shared with every project.
    pub project_id: Option<Uuid>,
    pub instance_type: InstanceType,
    pub storage_gb: u32,
    pub image: String,
    pub init_command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Template {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_owned_by(&self, project_id: Uuid) -> bool {
        self.project_id == Some(project_id)
    }

    /// Owned by the project, or public to everyone.
    pub fn is_visible_to(&self, project_id: Uuid) -> bool {
        self.is_public || self.is_owned_by(project_id)
    }
}

impl Cursor for Template {
    fn cursor(&self) -> String {
        self.slug.clone()
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Validated input for a new template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTemplate {
    pub slug: String,
    pub instance_type: InstanceType,
    pub storage_gb: u32,
    pub image: String,
    pub init_command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub is_public: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateTemplateRequest {
    pub slug: Option<String>,
    pub instance_type: Option<String>,
    pub storage_gb: Option<i64>,
    pub image: Option<String>,
    pub init_command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub is_public: Option<bool>,
}

impl CreateTemplateRequest {
    pub fn validate(self) -> Result<NewTemplate, ValidationError> {
        let mut validator = Validator::new();

        let slug = trim_to_none(self.slug).unwrap_or_default();
        validator.check(
            is_slug(&slug, 3, 64),
            "slug",
            "must be 3-64 characters of lowercase letters, digits or '-'",
        );
        let instance_type = validate_instance_type(&mut validator, self.instance_type.as_deref());
        let storage_gb = validate_storage(&mut validator, self.storage_gb);
        let image = trim_to_none(self.image).unwrap_or_default();
        validator.check(!image.is_empty(), "image", "is required");
        validate_command(&mut validator, "init_command", self.init_command.as_ref());
        validate_command(&mut validator, "entrypoint", self.entrypoint.as_ref());
        validator.finish()?;

        Ok(NewTemplate {
            slug,
            instance_type: instance_type.unwrap_or(InstanceType::SharedCpu1x),
            storage_gb: storage_gb.unwrap_or(MIN_STORAGE_GB),
            image,
            init_command: self.init_command,
            entrypoint: self.entrypoint,
            is_public: self.is_public.unwrap_or(false),
        })
    }
}

/// Validated partial update. `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplatePatch {
    pub instance_type: Option<InstanceType>,
    pub storage_gb: Option<u32>,
    pub image: Option<String>,
    pub init_command: Option<Option<Vec<String>>>,
    pub entrypoint: Option<Option<Vec<String>>>,
    pub is_public: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTemplateRequest {
    pub instance_type: Option<String>,
    pub storage_gb: Option<i64>,
    pub image: Option<String>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub init_command: Option<Option<Vec<String>>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub entrypoint: Option<Option<Vec<String>>>,
    pub is_public: Option<bool>,
}

impl UpdateTemplateRequest {
    pub fn validate(self) -> Result<TemplatePatch, ValidationError> {
        let mut validator = Validator::new();

        let instance_type = match self.instance_type.as_deref() {
            Some(raw) => validate_instance_type(&mut validator, Some(raw)),
            None => None,
        };
        let storage_gb = match self.storage_gb {
            Some(raw) => validate_storage(&mut validator, Some(raw)),
            None => None,
        };
        let image = match self.image {
            Some(raw) => {
                let trimmed = raw.trim().to_string();
                validator.check(!trimmed.is_empty(), "image", "cannot be empty");
                Some(trimmed)
            }
            None => None,
        };
        if let Some(command) = &self.init_command {
            validate_command(&mut validator, "init_command", command.as_ref());
        }
        if let Some(command) = &self.entrypoint {
            validate_command(&mut validator, "entrypoint", command.as_ref());
        }
        validator.finish()?;

        Ok(TemplatePatch {
            instance_type,
            storage_gb,
            image,
            init_command: self.init_command,
            entrypoint: self.entrypoint,
            is_public: self.is_public,
        })
    }
}

fn validate_instance_type(validator: &mut Validator, raw: Option<&str>) -> Option<InstanceType> {
    let parsed = raw.and_then(InstanceType::parse);
    if parsed.is_none() {
        let allowed = InstanceType::ALL
            .iter()
            .map(|instance_type| instance_type.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        validator.push("instance_type", format!("must be one of {}", allowed));
    }
    parsed
}

fn validate_storage(validator: &mut Validator, raw: Option<i64>) -> Option<u32> {
    let parsed = raw
        .and_then(|value| u32::try_from(value).ok())
        .filter(|value| (MIN_STORAGE_GB..=MAX_STORAGE_GB).contains(value));
    if parsed.is_none() {
        validator.push(
            "storage_gb",
            format!("must be between {} and {}", MIN_STORAGE_GB, MAX_STORAGE_GB),
        );
    }
    parsed
}

fn validate_command(validator: &mut Validator, field: &str, command: Option<&Vec<String>>) {
    if let Some(command) = command {
        validator.check(
            !command.is_empty() && command.iter().all(|part| !part.is_empty()),
            field,
            "must be a non-empty list of non-empty strings",
        );
    }
}

/// Public representation of a template.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateView {
    pub object: &'static str,
    pub slug: String,
    pub project_id: Option<Uuid>,
    pub instance_type: InstanceType,
    pub storage_gb: u32,
    pub image: String,
    pub init_command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Template> for TemplateView {
    fn from(template: Template) -> Self {
        Self {
            object: "template",
            slug: template.slug,
            project_id: template.project_id,
            instance_type: template.instance_type,
            storage_gb: template.storage_gb,
            image: template.image,
            init_command: template.init_command,
            entrypoint: template.entrypoint,
            is_public: template.is_public,
            created_at: template.created_at,
            updated_at: template.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn create_request_collects_all_errors() {
        let request: CreateTemplateRequest = serde_json::from_value(json!({
            "slug": "No Good",
            "instance_type": "gpu-9000",
            "storage_gb": 0
        }))
        .unwrap();

        let error = request.validate().unwrap_err();
        for field in ["slug", "instance_type", "storage_gb", "image"] {
            assert!(error.has_field(field), "missing {}", field);
        }
    }

    #[test]
    fn create_request_applies_defaults() {
        let request: CreateTemplateRequest = serde_json::from_value(json!({
            "slug": "python-dev",
            "instance_type": "shared-cpu-2x",
            "storage_gb": 20,
            "image": "registry.example.com/python:3.12"
        }))
        .unwrap();

        let template = request.validate().unwrap();
        assert_eq!(template.instance_type, InstanceType::SharedCpu2x);
        assert!(!template.is_public);
        assert!(template.init_command.is_none());
    }

    #[test]
    fn update_request_can_clear_init_command() {
        let request: UpdateTemplateRequest =
            serde_json::from_value(json!({ "init_command": null })).unwrap();
        let patch = request.validate().unwrap();
        assert_eq!(patch.init_command, Some(None));
        assert_eq!(patch.entrypoint, None);
    }

    #[test]
    fn instance_shapes() {
        assert_eq!(InstanceType::SharedCpu2x.memory_mb(), 1024);
        assert_eq!(InstanceType::Performance4x.cpus(), 4);
        assert_eq!(InstanceType::parse("performance-1x"), Some(InstanceType::Performance1x));
    }
}
