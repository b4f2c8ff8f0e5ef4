//! Dashboard identity: users, organizations, sessions and invitations.

mod identity;
mod session;
mod store;
mod types;

pub use identity::{
    CodeSender, IdentityProvider, LogCodeSender, OAuthIdentityProvider, RecordingCodeSender,
    StaticIdentityProvider, VerifiedIdentity,
};
pub use session::{CookieSettings, SessionClaims, SessionKeys, SESSION_COOKIE};
pub use store::{
    AuthError, AuthStore, BillingStatus, Invitation, InvitationPreview, Membership, OrgRole, Organization,
    Project, Session, SessionContext, User, UserPatch,
};
pub use types::*;
