use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hangar_core::persist::{load_state, persist_state};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use super::identity::VerifiedIdentity;

const LOGIN_CODE_TTL_MINUTES: i64 = 10;
const LOGIN_CODE_MAX_ATTEMPTS: u32 = 5;
const INVITATION_TTL_DAYS: i64 = 7;
const OAUTH_STATE_TTL_MINUTES: i64 = 10;
const DEFAULT_PROJECT_NAME: &str = "Default";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("identity provider error: {0}")]
    Identity(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<hangar_core::Error> for AuthError {
    fn from(err: hangar_core::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgRole {
    Owner,
    Admin,
    Member,
}

impl OrgRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    pub fn can_invite(self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

impl FromStr for OrgRole {
    type Err = AuthError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            _ => Err(AuthError::InvalidInput(format!("Unsupported role '{}'", value))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    #[default]
    Trialing,
    Active,
    PastDue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub idp_user_id: Option<String>,
    pub email: String,
    pub email_verified: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub picture: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub billing_customer_id: Option<String>,
    #[serde(default)]
    pub billing_status: BillingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub role: OrgRole,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub id: Uuid,
    pub org_id: Uuid,
    pub email: String,
    pub role: OrgRole,
    pub token_hash: String,
    pub invited_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Invitation {
    fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.accepted_at.is_none() && self.expires_at > now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Session {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoginCode {
    code_hash: String,
    expires_at: DateTime<Utc>,
    attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OAuthState {
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AuthState {
    #[serde(default)]
    users: HashMap<Uuid, User>,
    #[serde(default)]
    organizations: HashMap<Uuid, Organization>,
    #[serde(default)]
    memberships: HashMap<Uuid, Membership>,
    #[serde(default)]
    projects: HashMap<Uuid, Project>,
    #[serde(default)]
    invitations: HashMap<Uuid, Invitation>,
    #[serde(default)]
    login_codes: HashMap<String, LoginCode>,
    #[serde(default)]
    oauth_states: HashMap<String, OAuthState>,
    #[serde(default)]
    sessions: HashMap<Uuid, Session>,
}

impl AuthState {
    fn membership(&self, user_id: Uuid, org_id: Uuid) -> Option<&Membership> {
        self.memberships
            .values()
            .find(|membership| membership.user_id == user_id && membership.org_id == org_id)
    }

    fn default_project(&self, org_id: Uuid) -> Option<&Project> {
        self.projects
            .values()
            .filter(|project| project.org_id == org_id && project.deleted_at.is_none())
            .min_by_key(|project| project.created_at)
    }

    fn live_user(&self, user_id: Uuid) -> Result<&User, AuthError> {
        self.users
            .get(&user_id)
            .filter(|user| user.deleted_at.is_none())
            .ok_or_else(|| AuthError::Unauthorized("User not found".to_string()))
    }
}

/// Everything a session-gated handler knows about its caller.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub user: User,
    pub org: Organization,
    pub role: OrgRole,
    pub project: Project,
}

/// Read-only view of an invitation for the accept screen.
#[derive(Debug, Clone)]
pub struct InvitationPreview {
    pub invitation: Invitation,
    pub org_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub email: Option<String>,
    pub first_name: Option<Option<String>>,
    pub last_name: Option<Option<String>>,
    pub picture: Option<Option<String>>,
}

#[derive(Clone)]
pub struct AuthStore {
    state: Arc<RwLock<AuthState>>,
    file_path: PathBuf,
    session_ttl: Duration,
}

impl AuthStore {
    pub async fn new(base_dir: PathBuf, session_ttl_hours: i64) -> Result<Self, AuthError> {
        let file_path = base_dir.join("auth.json");
        let state = load_state(&file_path).await?;
        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            file_path,
            session_ttl: Duration::hours(session_ttl_hours.max(1)),
        })
    }

    async fn persist(&self, state: &AuthState) -> Result<(), AuthError> {
        persist_state(&self.file_path, state).await?;
        Ok(())
    }

    /// Issue a one-time login code for `email` and return it for delivery.
    pub async fn issue_login_code(&self, email: &str) -> Result<String, AuthError> {
        let email = normalize_email(email)?;
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));

        let mut state = self.state.write().await;
        state.login_codes.insert(
            email,
            LoginCode {
                code_hash: hash_secret(&code),
                expires_at: Utc::now() + Duration::minutes(LOGIN_CODE_TTL_MINUTES),
                attempts: 0,
            },
        );
        self.persist(&state).await?;
        Ok(code)
    }

    /// Redeem a login code, creating the user on first sign-in.
    pub async fn verify_login_code(&self, email: &str, code: &str) -> Result<User, AuthError> {
        let email = normalize_email(email)?;
        let invalid = || AuthError::Unauthorized("Invalid or expired code".to_string());
        let now = Utc::now();

        let mut state = self.state.write().await;
        let (expired, matches) = match state.login_codes.get(&email) {
            None => return Err(invalid()),
            Some(entry) => (
                entry.expires_at <= now || entry.attempts >= LOGIN_CODE_MAX_ATTEMPTS,
                secrets_match(&entry.code_hash, &hash_secret(code.trim())),
            ),
        };
        if expired {
            state.login_codes.remove(&email);
            self.persist(&state).await?;
            return Err(invalid());
        }
        if !matches {
            if let Some(entry) = state.login_codes.get_mut(&email) {
                entry.attempts += 1;
            }
            self.persist(&state).await?;
            return Err(invalid());
        }

        state.login_codes.remove(&email);
        let user = sign_in_locked(&mut state, VerifiedIdentity::from_email(email), now)?;
        self.persist(&state).await?;
        Ok(user)
    }

    pub async fn begin_oauth(&self) -> Result<String, AuthError> {
        let nonce = random_token();
        let now = Utc::now();
        let mut state = self.state.write().await;
        state
            .oauth_states
            .retain(|_, pending| pending.created_at + Duration::minutes(OAUTH_STATE_TTL_MINUTES) > now);
        state
            .oauth_states
            .insert(nonce.clone(), OAuthState { created_at: now });
        self.persist(&state).await?;
        Ok(nonce)
    }

    /// Consume an OAuth state nonce; each nonce is accepted once.
    pub async fn consume_oauth_state(&self, nonce: &str) -> Result<(), AuthError> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let pending = state.oauth_states.remove(nonce);
        self.persist(&state).await?;
        match pending {
            Some(pending) if pending.created_at + Duration::minutes(OAUTH_STATE_TTL_MINUTES) > now => Ok(()),
            _ => Err(AuthError::Unauthorized("Invalid OAuth state".to_string())),
        }
    }

    pub async fn sign_in(&self, identity: VerifiedIdentity) -> Result<User, AuthError> {
        let mut state = self.state.write().await;
        let user = sign_in_locked(&mut state, identity, Utc::now())?;
        self.persist(&state).await?;
        Ok(user)
    }

    /// First organization the user joined.
    pub async fn default_org_for(&self, user_id: Uuid) -> Result<Uuid, AuthError> {
        let state = self.state.read().await;
        state
            .memberships
            .values()
            .filter(|membership| membership.user_id == user_id)
            .min_by_key(|membership| membership.created_at)
            .map(|membership| membership.org_id)
            .ok_or_else(|| AuthError::Forbidden("User does not belong to any organization".to_string()))
    }

    pub async fn create_session(&self, user_id: Uuid, org_id: Uuid) -> Result<Session, AuthError> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        state.live_user(user_id)?;
        if state.membership(user_id, org_id).is_none() {
            return Err(AuthError::Forbidden("No access to organization".to_string()));
        }
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            org_id,
            created_at: now,
            expires_at: now + self.session_ttl,
            revoked_at: None,
        };
        state.sessions.insert(session.id, session.clone());
        self.persist(&state).await?;
        info!(user_id = %user_id, session_id = %session.id, "Session created");
        Ok(session)
    }

    /// Resolve a session id carried by a verified token into its caller.
    pub async fn resolve_session(&self, session_id: Uuid, user_id: Uuid) -> Result<SessionContext, AuthError> {
        let state = self.state.read().await;
        let session = state
            .sessions
            .get(&session_id)
            .filter(|session| session.user_id == user_id && session.is_live(Utc::now()))
            .ok_or_else(|| AuthError::Unauthorized("Session expired or revoked".to_string()))?;
        let user = state.live_user(user_id)?.clone();
        let membership = state
            .membership(user_id, session.org_id)
            .ok_or_else(|| AuthError::Unauthorized("Membership not found".to_string()))?;
        let org = state
            .organizations
            .get(&session.org_id)
            .cloned()
            .ok_or_else(|| AuthError::Unauthorized("Organization not found".to_string()))?;
        let project = state
            .default_project(org.id)
            .cloned()
            .ok_or_else(|| AuthError::NotFound("Organization has no project".to_string()))?;

        Ok(SessionContext {
            session_id,
            user,
            org,
            role: membership.role,
            project,
        })
    }

    pub async fn switch_organization(&self, session_id: Uuid, org_id: Uuid) -> Result<Session, AuthError> {
        let mut state = self.state.write().await;
        let user_id = state
            .sessions
            .get(&session_id)
            .filter(|session| session.is_live(Utc::now()))
            .map(|session| session.user_id)
            .ok_or_else(|| AuthError::Unauthorized("Session expired or revoked".to_string()))?;
        if state.membership(user_id, org_id).is_none() {
            return Err(AuthError::Forbidden("No access to organization".to_string()));
        }
        let session = state
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| AuthError::Unauthorized("Session expired or revoked".to_string()))?;
        session.org_id = org_id;
        let switched = session.clone();
        self.persist(&state).await?;
        Ok(switched)
    }

    pub async fn revoke_session(&self, session_id: Uuid) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        if let Some(session) = state.sessions.get_mut(&session_id) {
            if session.revoked_at.is_none() {
                session.revoked_at = Some(Utc::now());
                self.persist(&state).await?;
                info!(session_id = %session_id, "Session revoked");
            }
        }
        Ok(())
    }

    pub async fn organizations_for_user(&self, user_id: Uuid) -> Vec<(Organization, OrgRole)> {
        let state = self.state.read().await;
        let mut organizations: Vec<(Organization, OrgRole)> = state
            .memberships
            .values()
            .filter(|membership| membership.user_id == user_id)
            .filter_map(|membership| {
                state
                    .organizations
                    .get(&membership.org_id)
                    .map(|org| (org.clone(), membership.role))
            })
            .collect();
        organizations.sort_by(|left, right| left.0.created_at.cmp(&right.0.created_at));
        organizations
    }

    pub async fn create_invitation(
        &self,
        actor_user_id: Uuid,
        org_id: Uuid,
        email: &str,
        role: OrgRole,
    ) -> Result<(Invitation, String), AuthError> {
        let email = normalize_email(email)?;
        if role == OrgRole::Owner {
            return Err(AuthError::InvalidInput("Invitations cannot grant the owner role".to_string()));
        }

        let mut state = self.state.write().await;
        let actor = state
            .membership(actor_user_id, org_id)
            .ok_or_else(|| AuthError::Forbidden("No access to organization".to_string()))?;
        if !actor.role.can_invite() {
            return Err(AuthError::Forbidden("Only owners and admins can invite".to_string()));
        }
        let already_member = state.users.values().any(|user| {
            user.email == email && user.deleted_at.is_none() && state.membership(user.id, org_id).is_some()
        });
        if already_member {
            return Err(AuthError::Conflict(format!("{} is already a member", email)));
        }

        let token = random_token();
        let now = Utc::now();
        let invitation = Invitation {
            id: Uuid::new_v4(),
            org_id,
            email,
            role,
            token_hash: hash_secret(&token),
            invited_by: actor_user_id,
            created_at: now,
            expires_at: now + Duration::days(INVITATION_TTL_DAYS),
            accepted_at: None,
        };
        state.invitations.insert(invitation.id, invitation.clone());
        self.persist(&state).await?;
        info!(invitation_id = %invitation.id, org_id = %org_id, "Invitation created");
        Ok((invitation, token))
    }

    pub async fn invitation_by_token(&self, token: &str) -> Result<InvitationPreview, AuthError> {
        let state = self.state.read().await;
        let invitation = find_open_invitation(&state, token)?.clone();
        let org_name = state
            .organizations
            .get(&invitation.org_id)
            .map(|org| org.name.clone())
            .ok_or_else(|| AuthError::NotFound("Organization not found".to_string()))?;
        Ok(InvitationPreview {
            invitation,
            org_name,
        })
    }

    /// Exchange an invitation for membership. The invitation email must be
    /// the signed-in user's email.
    pub async fn accept_invitation(&self, user_id: Uuid, token: &str) -> Result<Membership, AuthError> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let invitation = find_open_invitation(&state, token)?.clone();
        let user = state.live_user(user_id)?;
        if user.email != invitation.email {
            return Err(AuthError::Forbidden(
                "Invitation was issued to a different email".to_string(),
            ));
        }

        let membership = match state.membership(user_id, invitation.org_id) {
            Some(existing) => existing.clone(),
            None => {
                let membership = Membership {
                    id: Uuid::new_v4(),
                    user_id,
                    org_id: invitation.org_id,
                    role: invitation.role,
                    created_at: now,
                };
                state.memberships.insert(membership.id, membership.clone());
                membership
            }
        };
        if let Some(stored) = state.invitations.get_mut(&invitation.id) {
            stored.accepted_at = Some(now);
        }
        self.persist(&state).await?;
        info!(invitation_id = %invitation.id, user_id = %user_id, "Invitation accepted");
        Ok(membership)
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<User, AuthError> {
        let state = self.state.read().await;
        state
            .users
            .get(&user_id)
            .filter(|user| user.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| AuthError::NotFound(format!("User {} not found", user_id)))
    }

    /// Users may only edit themselves; a verified email is immutable.
    pub async fn update_user(&self, actor_user_id: Uuid, user_id: Uuid, patch: UserPatch) -> Result<User, AuthError> {
        if actor_user_id != user_id {
            return Err(AuthError::Forbidden("Users can only update themselves".to_string()));
        }
        let new_email = patch.email.as_deref().map(normalize_email).transpose()?;

        let mut state = self.state.write().await;
        let taken = new_email.as_ref().is_some_and(|email| {
            state
                .users
                .values()
                .any(|user| user.id != user_id && user.deleted_at.is_none() && &user.email == email)
        });
        let user = state
            .users
            .get_mut(&user_id)
            .filter(|user| user.deleted_at.is_none())
            .ok_or_else(|| AuthError::NotFound(format!("User {} not found", user_id)))?;

        if let Some(email) = new_email.filter(|email| *email != user.email) {
            if user.email_verified {
                return Err(AuthError::InvalidInput("Email cannot be changed once verified".to_string()));
            }
            if taken {
                return Err(AuthError::Conflict(format!("Email {} is already in use", email)));
            }
            user.email = email;
        }
        if let Some(first_name) = patch.first_name {
            user.first_name = sanitize_optional_string(first_name);
        }
        if let Some(last_name) = patch.last_name {
            user.last_name = sanitize_optional_string(last_name);
        }
        if let Some(picture) = patch.picture {
            user.picture = sanitize_optional_string(picture);
        }
        user.updated_at = Utc::now();

        let updated = user.clone();
        self.persist(&state).await?;
        Ok(updated)
    }

    /// Soft-delete the caller's account and revoke all of its sessions.
    pub async fn soft_delete_user(&self, actor_user_id: Uuid, user_id: Uuid) -> Result<User, AuthError> {
        if actor_user_id != user_id {
            return Err(AuthError::Forbidden("Users can only delete themselves".to_string()));
        }
        let now = Utc::now();
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&user_id)
            .filter(|user| user.deleted_at.is_none())
            .ok_or_else(|| AuthError::NotFound(format!("User {} not found", user_id)))?;
        user.deleted_at = Some(now);
        user.updated_at = now;
        let deleted = user.clone();

        for session in state.sessions.values_mut() {
            if session.user_id == user_id && session.revoked_at.is_none() {
                session.revoked_at = Some(now);
            }
        }
        self.persist(&state).await?;
        info!(user_id = %user_id, "User soft-deleted");
        Ok(deleted)
    }

    pub async fn link_billing_customer(&self, org_id: Uuid, customer_id: &str) -> Result<Organization, AuthError> {
        let mut state = self.state.write().await;
        let org = state
            .organizations
            .get_mut(&org_id)
            .ok_or_else(|| AuthError::NotFound("Organization not found".to_string()))?;
        org.billing_customer_id = Some(customer_id.to_string());
        org.updated_at = Utc::now();
        let linked = org.clone();
        self.persist(&state).await?;
        Ok(linked)
    }

    /// Set the billing status of the organization billed to `customer_id`.
    pub async fn apply_billing_status(
        &self,
        customer_id: &str,
        status: BillingStatus,
    ) -> Result<Option<Organization>, AuthError> {
        let mut state = self.state.write().await;
        let Some(org) = state
            .organizations
            .values_mut()
            .find(|org| org.billing_customer_id.as_deref() == Some(customer_id))
        else {
            return Ok(None);
        };
        org.billing_status = status;
        org.updated_at = Utc::now();
        let updated = org.clone();
        self.persist(&state).await?;
        Ok(Some(updated))
    }
}

fn sign_in_locked(state: &mut AuthState, identity: VerifiedIdentity, now: DateTime<Utc>) -> Result<User, AuthError> {
    let email = normalize_email(&identity.email)?;
    let by_idp = state
        .users
        .values()
        .find(|user| {
            identity
                .idp_user_id
                .as_ref()
                .is_some_and(|idp_id| user.idp_user_id.as_ref() == Some(idp_id))
        })
        .map(|user| user.id);
    let by_email = state
        .users
        .values()
        .find(|user| user.email == email)
        .map(|user| user.id);

    // An unverified address never links to, or signs in as, the account that owns it.
    if by_idp.is_none() && by_email.is_some() && !identity.email_verified {
        warn!(email = %email, "Rejected sign-in with unverified email of an existing account");
        return Err(AuthError::Unauthorized(
            "Email address is not verified by the identity provider".to_string(),
        ));
    }
    let existing_id = by_idp.or(by_email);

    let user = match existing_id.and_then(|id| state.users.get_mut(&id)) {
        Some(user) => {
            if user.deleted_at.is_some() {
                return Err(AuthError::Unauthorized("Account has been deleted".to_string()));
            }
            if user.idp_user_id.is_none() {
                user.idp_user_id = identity.idp_user_id;
            }
            if identity.email_verified && user.email == email {
                user.email_verified = true;
            }
            user.first_name = user.first_name.take().or(identity.first_name);
            user.last_name = user.last_name.take().or(identity.last_name);
            user.picture = user.picture.take().or(identity.picture);
            user.updated_at = now;
            user.clone()
        }
        None => {
            let user = User {
                id: Uuid::new_v4(),
                idp_user_id: identity.idp_user_id,
                email,
                email_verified: identity.email_verified,
                first_name: sanitize_optional_string(identity.first_name),
                last_name: sanitize_optional_string(identity.last_name),
                picture: identity.picture,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            };
            state.users.insert(user.id, user.clone());
            info!(user_id = %user.id, "User created");
            user
        }
    };

    let has_org = state
        .memberships
        .values()
        .any(|membership| membership.user_id == user.id);
    if !has_org {
        create_personal_org(state, &user, now);
    }
    Ok(user)
}

fn create_personal_org(state: &mut AuthState, owner: &User, now: DateTime<Utc>) -> Organization {
    let label = owner
        .first_name
        .clone()
        .unwrap_or_else(|| owner.email.split('@').next().unwrap_or("My").to_string());
    let org = Organization {
        id: Uuid::new_v4(),
        name: format!("{}'s organization", label),
        billing_customer_id: None,
        billing_status: BillingStatus::default(),
        created_at: now,
        updated_at: now,
    };
    let membership = Membership {
        id: Uuid::new_v4(),
        user_id: owner.id,
        org_id: org.id,
        role: OrgRole::Owner,
        created_at: now,
    };
    let project = Project {
        id: Uuid::new_v4(),
        org_id: org.id,
        name: DEFAULT_PROJECT_NAME.to_string(),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };
    state.organizations.insert(org.id, org.clone());
    state.memberships.insert(membership.id, membership);
    state.projects.insert(project.id, project);
    info!(org_id = %org.id, user_id = %owner.id, "Personal organization created");
    org
}

fn find_open_invitation<'a>(state: &'a AuthState, token: &str) -> Result<&'a Invitation, AuthError> {
    let token_hash = hash_secret(token.trim());
    let now = Utc::now();
    state
        .invitations
        .values()
        .find(|invitation| secrets_match(&invitation.token_hash, &token_hash))
        .filter(|invitation| invitation.is_open(now))
        .ok_or_else(|| AuthError::NotFound("Invitation not found or expired".to_string()))
}

fn sanitize_optional_string(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn normalize_email(email: &str) -> Result<String, AuthError> {
    let normalized = email.trim().to_lowercase();
    match normalized.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(normalized),
        _ => Err(AuthError::InvalidInput("Invalid email".to_string())),
    }
}

fn random_token() -> String {
    let mut bytes = [0_u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn secrets_match(stored: &str, presented: &str) -> bool {
    bool::from(stored.as_bytes().ct_eq(presented.as_bytes()))
}
