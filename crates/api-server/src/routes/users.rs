use axum::{
    extract::{Path, State},
    routing::put,
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use hangar_core::schema::Deleted;

use super::parse_id;
use crate::auth::{UpdateUserRequest, UserPatch, UserView};
use crate::error::{ApiError, ApiJson};
use crate::middleware::CurrentSession;
use crate::state::AppState;

async fn update_user(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(user_id): Path<String>,
    ApiJson(body): ApiJson<UpdateUserRequest>,
) -> Result<Json<UserView>, ApiError> {
    let user_id = parse_id(&user_id, "User")?;
    let patch = UserPatch {
        email: body.email,
        first_name: body.first_name,
        last_name: body.last_name,
        picture: body.picture,
    };
    let user = state.auth().update_user(session.user.id, user_id, patch).await?;
    Ok(Json(user.into()))
}

/// Deleting yourself also ends every session, including this one.
async fn delete_user(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    jar: CookieJar,
    Path(user_id): Path<String>,
) -> Result<(CookieJar, Json<Deleted>), ApiError> {
    let user_id = parse_id(&user_id, "User")?;
    let user = state.auth().soft_delete_user(session.user.id, user_id).await?;
    Ok((state.cookies().clear(jar), Json(Deleted::by_id("user", user.id))))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/users/{user_id}", put(update_user).delete(delete_user))
}
