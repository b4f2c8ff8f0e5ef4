//! Template CRUD, shared by the dashboard (`/templates`) and the public API
//! (`/v1/templates`). The caller's project comes from whichever gate ran.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use hangar_core::schema::{Deleted, ListParams, ListResponse};
use hangar_core::template::{CreateTemplateRequest, TemplateView, UpdateTemplateRequest};
use tracing::info;

use crate::error::{ApiError, ApiJson, ApiQuery};
use crate::middleware::ProjectScope;
use crate::state::AppState;

async fn list_templates(
    State(state): State<AppState>,
    scope: ProjectScope,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Result<Json<ListResponse<TemplateView>>, ApiError> {
    let pagination = params.validate()?;
    let page = state.templates().list_visible(scope.project_id, &pagination).await;
    Ok(Json(page.map(TemplateView::from)))
}

async fn create_template(
    State(state): State<AppState>,
    scope: ProjectScope,
    ApiJson(body): ApiJson<CreateTemplateRequest>,
) -> Result<(StatusCode, Json<TemplateView>), ApiError> {
    let new = body.validate()?;
    let template = state.templates().create(scope.project_id, new).await?;
    info!(slug = %template.slug, project_id = %scope.project_id, "Template created");
    Ok((StatusCode::CREATED, Json(template.into())))
}

async fn retrieve_template(
    State(state): State<AppState>,
    scope: ProjectScope,
    Path(template_slug): Path<String>,
) -> Result<Json<TemplateView>, ApiError> {
    let template = state.templates().get_visible(scope.project_id, &template_slug).await?;
    Ok(Json(template.into()))
}

async fn update_template(
    State(state): State<AppState>,
    scope: ProjectScope,
    Path(template_slug): Path<String>,
    ApiJson(body): ApiJson<UpdateTemplateRequest>,
) -> Result<Json<TemplateView>, ApiError> {
    let patch = body.validate()?;
    let template = state
        .templates()
        .update(scope.project_id, &template_slug, patch)
        .await?;
    Ok(Json(template.into()))
}

async fn delete_template(
    State(state): State<AppState>,
    scope: ProjectScope,
    Path(template_slug): Path<String>,
) -> Result<Json<Deleted>, ApiError> {
    let template = state.templates().soft_delete(scope.project_id, &template_slug).await?;
    Ok(Json(Deleted::by_slug("template", template.slug)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/templates", get(list_templates).post(create_template))
        .route(
            "/templates/{template_slug}",
            get(retrieve_template).put(update_template).delete(delete_template),
        )
}

#[cfg(test)]
mod tests {
    use axum::http::Method;
    use serde_json::json;

    use crate::app::build_router;
    use crate::routes::test_util::{send, TestRequest};
    use crate::state::test_support::TestApp;

    use super::*;

    fn template_body(slug: &str) -> serde_json::Value {
        json!({
            "slug": slug,
            "instance_type": "shared-cpu-1x",
            "storage_gb": 10,
            "image": "registry.example.com/dev:1",
            "init_command": ["/bin/sh", "-c", "echo ready"],
        })
    }

    #[tokio::test]
    async fn dashboard_crud_round() {
        let app = TestApp::new().await;
        let router = build_router(app.state.clone());
        let (_, cookie) = app.session_for("dev@example.com").await;

        let (status, created) = send(
            &router,
            TestRequest::new(Method::POST, "/templates")
                .cookie(&cookie)
                .json(template_body("dev-box")),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["object"], "template");
        assert_eq!(created["slug"], "dev-box");

        let (status, list) = send(&router, TestRequest::new(Method::GET, "/templates?order=asc").cookie(&cookie)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["object"], "list");
        let slugs: Vec<&str> = list["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["slug"].as_str().unwrap())
            .collect();
        assert_eq!(slugs, vec!["base", "dev-box"]);

        let (status, updated) = send(
            &router,
            TestRequest::new(Method::PUT, "/templates/dev-box")
                .cookie(&cookie)
                .json(json!({ "storage_gb": 20, "init_command": null })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["storage_gb"], 20);
        assert!(updated["init_command"].is_null());

        let (status, deleted) =
            send(&router, TestRequest::new(Method::DELETE, "/templates/dev-box").cookie(&cookie)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deleted, json!({ "object": "template", "slug": "dev-box", "deleted": true }));

        let (status, _) = send(&router, TestRequest::new(Method::GET, "/templates/dev-box").cookie(&cookie)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_slugs_conflict_and_bad_input_lists_fields() {
        let app = TestApp::new().await;
        let router = build_router(app.state.clone());
        let (_, cookie) = app.session_for("dev@example.com").await;

        let (status, body) = send(
            &router,
            TestRequest::new(Method::POST, "/templates")
                .cookie(&cookie)
                .json(template_body("base")),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["type"], "conflict");

        let (status, body) = send(
            &router,
            TestRequest::new(Method::POST, "/templates")
                .cookie(&cookie)
                .json(json!({ "slug": "X", "instance_type": "huge", "storage_gb": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let fields: Vec<&str> = body["error"]["fields"]
            .as_array()
            .unwrap()
            .iter()
            .map(|field| field["field"].as_str().unwrap())
            .collect();
        assert!(fields.contains(&"slug"));
        assert!(fields.contains(&"instance_type"));
        assert!(fields.contains(&"image"));
    }

    #[tokio::test]
    async fn foreign_templates_are_hidden_and_public_ones_read_only() {
        let app = TestApp::new().await;
        let router = build_router(app.state.clone());
        let (_, owner) = app.session_for("owner@example.com").await;
        let (_, other) = app.session_for("other@example.com").await;

        send(
            &router,
            TestRequest::new(Method::POST, "/templates")
                .cookie(&owner)
                .json(template_body("private-box")),
        )
        .await;
        let (status, _) = send(&router, TestRequest::new(Method::GET, "/templates/private-box").cookie(&other)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &router,
            TestRequest::new(Method::PUT, "/templates/base")
                .cookie(&other)
                .json(json!({ "storage_gb": 50 })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn public_api_uses_api_keys() {
        let app = TestApp::new().await;
        let router = build_router(app.state.clone());
        let (context, _) = app.session_for("dev@example.com").await;
        let key = app.api_key_for(context.project.id).await;

        let (status, body) = send(&router, TestRequest::new(Method::GET, "/v1/templates/base").bearer(&key)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["slug"], "base");
        assert_eq!(body["is_public"], true);

        let (status, body) = send(&router, TestRequest::new(Method::GET, "/v1/templates")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["type"], "unauthorized");

        let (status, _) = send(&router, TestRequest::new(Method::GET, "/templates").bearer(&key)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
