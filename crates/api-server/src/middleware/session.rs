use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use super::{bearer_token, Credential, ProjectScope};
use crate::auth::{SessionContext, SESSION_COOKIE};
use crate::error::ApiError;
use crate::state::AppState;

/// Resolve the session cookie (or a Bearer session token) into the caller.
pub async fn authenticate(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    let token = session_token(&req);
    let context = resolve(&state, token).await?;
    req.extensions_mut().insert(ProjectScope {
        project_id: context.project.id,
        credential: Credential::Session(context.session_id),
    });
    req.extensions_mut().insert(context);
    Ok(next.run(req).await)
}

pub(crate) fn session_token(req: &Request) -> Option<String> {
    CookieJar::from_headers(req.headers())
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
        .or_else(|| bearer_token(req.headers()).map(str::to_string))
}

async fn resolve(state: &AppState, token: Option<String>) -> Result<SessionContext, ApiError> {
    let token = token.ok_or_else(|| ApiError::Unauthorized("Sign in required".to_string()))?;
    let claims = state.session_keys().verify(&token)?;
    let context = state
        .auth()
        .resolve_session(claims.session_id()?, claims.user_id()?)
        .await?;
    Ok(context)
}
