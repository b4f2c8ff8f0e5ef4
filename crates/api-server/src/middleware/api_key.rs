use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use super::{bearer_token, Credential, ProjectScope};
use crate::error::ApiError;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Resolve the presented API key into the project it belongs to.
///
/// Accepts `Authorization: Bearer <key>` or `X-API-Key: <key>`.
pub async fn authenticate(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    let raw = bearer_token(req.headers())
        .or_else(|| {
            req.headers()
                .get(API_KEY_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
        })
        .filter(|raw| !raw.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::Unauthorized("Missing API key".to_string()))?;

    let api_key = state.api_keys().authenticate(&raw).await?;
    debug!(api_key_id = %api_key.id, project_id = %api_key.project_id, "API key accepted");
    req.extensions_mut().insert(ProjectScope {
        project_id: api_key.project_id,
        credential: Credential::ApiKey(api_key.id),
    });
    Ok(next.run(req).await)
}
