use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provider::MachineDescriptor;
use crate::schema::{explicit_null, trim_to_none, Cursor, ValidationError, Validator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputerStatus {
    Requested,
    Provisioning,
    Running,
    Expiring,
    DestroyRequested,
    Destroyed,
    Failed,
}

impl ComputerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Destroyed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Computer {
    pub id: Uuid,
    pub project_id: Uuid,
    pub template_slug: String,
    pub region: Option<String>,
    /// `None` runs until explicitly destroyed.
    pub ttl_seconds: Option<i64>,
    pub status: ComputerStatus,
    pub app_name: String,
    pub machine: Option<MachineDescriptor>,
    pub heartbeat_token_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub destroyed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Computer {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// When a running computer becomes due for expiry without another heartbeat.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = self.ttl_seconds?;
        let since = self.last_heartbeat_at.unwrap_or(self.created_at);
        Some(since + Duration::seconds(ttl))
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == ComputerStatus::Running
            && self.expires_at().is_some_and(|expires_at| expires_at <= now)
    }
}

impl Cursor for Computer {
    fn cursor(&self) -> String {
        self.id.to_string()
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Create input after shape validation. Region and TTL still go through
/// [`super::ComputePolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComputer {
    pub template_slug: String,
    pub ttl_seconds: Option<Option<i64>>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateComputerRequest {
    pub template_slug: Option<String>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub ttl_seconds: Option<Option<i64>>,
    pub region: Option<String>,
}

impl CreateComputerRequest {
    pub fn validate(self) -> Result<NewComputer, ValidationError> {
        let template_slug = trim_to_none(self.template_slug);
        let mut validator = Validator::new();
        validator.check(template_slug.is_some(), "template_slug", "is required");
        validator.finish()?;

        Ok(NewComputer {
            template_slug: template_slug.unwrap_or_default(),
            ttl_seconds: self.ttl_seconds,
            region: trim_to_none(self.region),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateComputerRequest {
    #[serde(default, deserialize_with = "explicit_null")]
    pub ttl_seconds: Option<Option<i64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComputerView {
    pub object: &'static str,
    pub id: Uuid,
    pub project_id: Uuid,
    pub template_slug: String,
    pub region: Option<String>,
    pub ttl_seconds: Option<i64>,
    pub status: ComputerStatus,
    pub machine_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub destroyed_at: Option<DateTime<Utc>>,
}

impl From<Computer> for ComputerView {
    fn from(computer: Computer) -> Self {
        let expires_at = match computer.status {
            ComputerStatus::Running => computer.expires_at(),
            _ => None,
        };
        Self {
            object: "computer",
            id: computer.id,
            project_id: computer.project_id,
            template_slug: computer.template_slug,
            region: computer.region,
            ttl_seconds: computer.ttl_seconds,
            status: computer.status,
            machine_id: computer.machine.map(|machine| machine.machine_id),
            created_at: computer.created_at,
            last_heartbeat_at: computer.last_heartbeat_at,
            expires_at,
            destroyed_at: computer.destroyed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_distinguishes_null_and_omitted_ttl() {
        let omitted: CreateComputerRequest =
            serde_json::from_str(r#"{"template_slug":"base"}"#).unwrap();
        assert_eq!(omitted.ttl_seconds, None);

        let null: CreateComputerRequest =
            serde_json::from_str(r#"{"template_slug":"base","ttl_seconds":null}"#).unwrap();
        assert_eq!(null.ttl_seconds, Some(None));

        let value: CreateComputerRequest =
            serde_json::from_str(r#"{"template_slug":"base","ttl_seconds":40}"#).unwrap();
        assert_eq!(value.ttl_seconds, Some(Some(40)));
    }

    #[test]
    fn create_request_requires_template_slug() {
        let err = CreateComputerRequest {
            template_slug: Some("   ".into()),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert!(err.has_field("template_slug"));
    }

    #[test]
    fn expiry_counts_from_last_heartbeat() {
        let created_at = Utc::now();
        let mut computer = Computer {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            template_slug: "base".into(),
            region: None,
            ttl_seconds: Some(40),
            status: ComputerStatus::Running,
            app_name: "hangar-x".into(),
            machine: None,
            heartbeat_token_hash: String::new(),
            created_at,
            updated_at: created_at,
            last_heartbeat_at: Some(created_at + Duration::seconds(30)),
            destroyed_at: None,
            deleted_at: None,
        };

        assert!(!computer.is_overdue(created_at + Duration::seconds(60)));
        assert!(computer.is_overdue(created_at + Duration::seconds(70)));

        computer.ttl_seconds = None;
        assert!(!computer.is_overdue(created_at + Duration::days(365)));
    }
}
