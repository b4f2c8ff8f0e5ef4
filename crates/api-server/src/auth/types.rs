use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::store::{BillingStatus, Invitation, InvitationPreview, OrgRole, Organization, Project, User};

#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub object: &'static str,
    pub id: Uuid,
    pub email: String,
    pub email_verified: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub picture: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            object: "user",
            id: user.id,
            email: user.email,
            email_verified: user.email_verified,
            first_name: user.first_name,
            last_name: user.last_name,
            picture: user.picture,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganizationView {
    pub object: &'static str,
    pub id: Uuid,
    pub name: String,
    pub role: OrgRole,
    pub billing_status: BillingStatus,
    pub created_at: DateTime<Utc>,
}

impl OrganizationView {
    pub fn new(org: Organization, role: OrgRole) -> Self {
        Self {
            object: "organization",
            id: org.id,
            name: org.name,
            role,
            billing_status: org.billing_status,
            created_at: org.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectView {
    pub object: &'static str,
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<Project> for ProjectView {
    fn from(project: Project) -> Self {
        Self {
            object: "project",
            id: project.id,
            organization_id: project.org_id,
            name: project.name,
            created_at: project.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvitationView {
    pub object: &'static str,
    pub id: Uuid,
    pub organization_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
    pub email: String,
    pub role: OrgRole,
    pub expires_at: DateTime<Utc>,
    /// Present only in the response that created the invitation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl InvitationView {
    pub fn created(invitation: Invitation, token: String) -> Self {
        Self {
            object: "invitation",
            id: invitation.id,
            organization_id: invitation.org_id,
            organization_name: None,
            email: invitation.email,
            role: invitation.role,
            expires_at: invitation.expires_at,
            token: Some(token),
        }
    }
}

impl From<InvitationPreview> for InvitationView {
    fn from(preview: InvitationPreview) -> Self {
        Self {
            object: "invitation",
            id: preview.invitation.id,
            organization_id: preview.invitation.org_id,
            organization_name: Some(preview.org_name),
            email: preview.invitation.email,
            role: preview.invitation.role,
            expires_at: preview.invitation.expires_at,
            token: None,
        }
    }
}

/// `GET /auth/me`
#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    pub user: UserView,
    pub organization: OrganizationView,
    pub project: ProjectView,
    pub organizations: Vec<OrganizationView>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendCodeRequest {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyCodeRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInvitationRequest {
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcceptInvitationRequest {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvitationQuery {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: String,
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwitchQuery {
    pub organization_id: Uuid,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    #[serde(default, deserialize_with = "hangar_core::schema::explicit_null")]
    pub first_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "hangar_core::schema::explicit_null")]
    pub last_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "hangar_core::schema::explicit_null")]
    pub picture: Option<Option<String>>,
}
