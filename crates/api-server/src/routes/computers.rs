//! `/v1/computers` and the heartbeat endpoint computers call back into.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use hangar_core::computer::{ComputerView, CreateComputerRequest, UpdateComputerRequest};
use hangar_core::schema::{Deleted, ListParams, ListResponse};
use serde::Serialize;
use tracing::{error, info};

use super::parse_id;
use crate::error::{ApiError, ApiJson, ApiQuery};
use crate::middleware::{bearer_token, ProjectScope};
use crate::state::AppState;

async fn list_computers(
    State(state): State<AppState>,
    scope: ProjectScope,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Result<Json<ListResponse<ComputerView>>, ApiError> {
    let pagination = params.validate()?;
    let page = state.computers().list(scope.project_id, &pagination).await;
    Ok(Json(page.map(ComputerView::from)))
}

/// Provisioning runs on its own task: a client hanging up must not strand a
/// machine that was created but never recorded or rolled back.
async fn create_computer(
    State(state): State<AppState>,
    scope: ProjectScope,
    ApiJson(body): ApiJson<CreateComputerRequest>,
) -> Result<(StatusCode, Json<ComputerView>), ApiError> {
    let new = body.validate()?;
    let manager = state.computers().clone();
    let project_id = scope.project_id;
    let computer = tokio::spawn(async move { manager.create(project_id, new).await })
        .await
        .map_err(|err| {
            error!(project_id = %project_id, error = %err, "Computer creation task aborted");
            ApiError::Internal(format!("Computer creation task aborted: {}", err))
        })??;
    info!(computer_id = %computer.id, project_id = %project_id, "Computer created");
    Ok((StatusCode::CREATED, Json(computer.into())))
}

async fn retrieve_computer(
    State(state): State<AppState>,
    scope: ProjectScope,
    Path(computer_id): Path<String>,
) -> Result<Json<ComputerView>, ApiError> {
    let id = parse_id(&computer_id, "Computer")?;
    let computer = state.computers().retrieve(scope.project_id, id).await?;
    Ok(Json(computer.into()))
}

async fn update_computer(
    State(state): State<AppState>,
    scope: ProjectScope,
    Path(computer_id): Path<String>,
    ApiJson(body): ApiJson<UpdateComputerRequest>,
) -> Result<Json<ComputerView>, ApiError> {
    let id = parse_id(&computer_id, "Computer")?;
    let computer = state
        .computers()
        .update_ttl(scope.project_id, id, body.ttl_seconds)
        .await?;
    Ok(Json(computer.into()))
}

async fn delete_computer(
    State(state): State<AppState>,
    scope: ProjectScope,
    Path(computer_id): Path<String>,
) -> Result<Json<Deleted>, ApiError> {
    let id = parse_id(&computer_id, "Computer")?;
    let computer = state.computers().destroy(scope.project_id, id).await?;
    Ok(Json(Deleted::by_id("computer", computer.id)))
}

#[derive(Serialize)]
struct HeartbeatResponse {
    object: &'static str,
    computer_id: String,
    received_at: Option<chrono::DateTime<chrono::Utc>>,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(computer_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let token = bearer_token(&headers).ok_or_else(|| ApiError::Unauthorized("Missing heartbeat token".to_string()))?;
    let id = parse_id(&computer_id, "Computer")?;
    let computer = state.computers().heartbeat(id, token).await?;
    Ok(Json(HeartbeatResponse {
        object: "heartbeat",
        computer_id: computer.id.to_string(),
        received_at: computer.last_heartbeat_at,
        expires_at: computer.expires_at(),
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/computers", get(list_computers).post(create_computer))
        .route(
            "/computers/{computer_id}",
            get(retrieve_computer).put(update_computer).delete(delete_computer),
        )
}

pub fn heartbeat_router() -> Router<AppState> {
    Router::new().route("/heartbeat/{computer_id}", post(heartbeat))
}
