use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use hangar_core::api_key::{ApiKeyView, CreateApiKeyRequest, CreatedApiKey, UpdateApiKeyRequest};
use hangar_core::schema::{Deleted, ListParams, ListResponse};

use super::parse_id;
use crate::error::{ApiError, ApiJson, ApiQuery};
use crate::middleware::ProjectScope;
use crate::state::AppState;

async fn list_api_keys(
    State(state): State<AppState>,
    scope: ProjectScope,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Result<Json<ListResponse<ApiKeyView>>, ApiError> {
    let pagination = params.validate()?;
    let page = state.api_keys().list(scope.project_id, &pagination).await;
    Ok(Json(page.map(ApiKeyView::from)))
}

async fn create_api_key(
    State(state): State<AppState>,
    scope: ProjectScope,
    ApiJson(body): ApiJson<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<CreatedApiKey>), ApiError> {
    let name = body.validate()?;
    let (api_key, key) = state.api_keys().create(scope.project_id, name).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedApiKey {
            api_key: api_key.into(),
            key,
        }),
    ))
}

async fn retrieve_api_key(
    State(state): State<AppState>,
    scope: ProjectScope,
    Path(api_key_id): Path<String>,
) -> Result<Json<ApiKeyView>, ApiError> {
    let id = parse_id(&api_key_id, "API key")?;
    let api_key = state.api_keys().get(scope.project_id, id).await?;
    Ok(Json(api_key.into()))
}

async fn update_api_key(
    State(state): State<AppState>,
    scope: ProjectScope,
    Path(api_key_id): Path<String>,
    ApiJson(body): ApiJson<UpdateApiKeyRequest>,
) -> Result<Json<ApiKeyView>, ApiError> {
    let id = parse_id(&api_key_id, "API key")?;
    let api_key = match body.validate()? {
        Some(name) => state.api_keys().rename(scope.project_id, id, name).await?,
        None => state.api_keys().get(scope.project_id, id).await?,
    };
    Ok(Json(api_key.into()))
}

async fn delete_api_key(
    State(state): State<AppState>,
    scope: ProjectScope,
    Path(api_key_id): Path<String>,
) -> Result<Json<Deleted>, ApiError> {
    let id = parse_id(&api_key_id, "API key")?;
    let api_key = state.api_keys().soft_delete(scope.project_id, id).await?;
    Ok(Json(Deleted::by_id("api_key", api_key.id)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api_keys", get(list_api_keys).post(create_api_key))
        .route(
            "/api_keys/{api_key_id}",
            get(retrieve_api_key).put(update_api_key).delete(delete_api_key),
        )
}
