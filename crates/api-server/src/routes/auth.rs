//! Dashboard sign-in, session and invitation endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use hangar_core::schema::Deleted;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::auth::{
    AcceptInvitationRequest, AuthError, CreateInvitationRequest, InvitationQuery, InvitationView, MeResponse,
    OAuthCallbackQuery, OrgRole, OrganizationView, ProjectView, SendCodeRequest, SessionContext, SwitchQuery,
    User, UserView, VerifyCodeRequest,
};
use crate::error::{ApiError, ApiJson, ApiQuery};
use crate::middleware::CurrentSession;
use crate::state::AppState;

#[derive(Serialize)]
struct CodeSentResponse {
    object: &'static str,
    email: String,
    sent: bool,
}

#[derive(Serialize)]
struct OAuthUrlResponse {
    object: &'static str,
    url: String,
}

async fn send_code(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SendCodeRequest>,
) -> Result<Json<CodeSentResponse>, ApiError> {
    let email = body.email.trim().to_lowercase();
    let code = state.auth().issue_login_code(&email).await?;
    state.codes().send_code(&email, &code).await?;
    Ok(Json(CodeSentResponse {
        object: "login_code",
        email,
        sent: true,
    }))
}

async fn verify_code(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(body): ApiJson<VerifyCodeRequest>,
) -> Result<(CookieJar, Json<MeResponse>), ApiError> {
    let user = state.auth().verify_login_code(&body.email, &body.code).await?;
    let (jar, context) = start_session(&state, jar, user).await?;
    Ok((jar, Json(me_response(&state, context).await)))
}

async fn oauth_url(State(state): State<AppState>) -> Result<Json<OAuthUrlResponse>, ApiError> {
    let nonce = state.auth().begin_oauth().await?;
    Ok(Json(OAuthUrlResponse {
        object: "oauth_url",
        url: state.identity().authorize_url(&nonce),
    }))
}

/// Completes the provider redirect and sends the browser back to the dashboard.
async fn oauth_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiQuery(query): ApiQuery<OAuthCallbackQuery>,
) -> Result<(CookieJar, Redirect), ApiError> {
    state.auth().consume_oauth_state(&query.state).await?;
    let identity = state.identity().exchange_code(&query.code).await?;
    let user = state.auth().sign_in(identity).await?;
    let (jar, _) = start_session(&state, jar, user).await?;
    Ok((jar, Redirect::to(&state.config().dashboard_url)))
}

async fn invitation(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<InvitationQuery>,
) -> Result<Json<InvitationView>, ApiError> {
    let preview = state.auth().invitation_by_token(&query.token).await?;
    Ok(Json(preview.into()))
}

async fn accept_invitation(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    ApiJson(body): ApiJson<AcceptInvitationRequest>,
) -> Result<Json<OrganizationView>, ApiError> {
    let membership = state.auth().accept_invitation(session.user.id, &body.token).await?;
    let (org, role) = state
        .auth()
        .organizations_for_user(session.user.id)
        .await
        .into_iter()
        .find(|(org, _)| org.id == membership.org_id)
        .ok_or_else(|| AuthError::NotFound("Organization not found".to_string()))?;
    Ok(Json(OrganizationView::new(org, role)))
}

async fn create_invitation(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    ApiJson(body): ApiJson<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<InvitationView>), ApiError> {
    let role = match body.role.as_deref() {
        Some(role) => role.parse::<OrgRole>()?,
        None => OrgRole::Member,
    };
    let (invitation, token) = state
        .auth()
        .create_invitation(session.user.id, session.org.id, &body.email, role)
        .await?;
    Ok((StatusCode::CREATED, Json(InvitationView::created(invitation, token))))
}

async fn me(State(state): State<AppState>, CurrentSession(session): CurrentSession) -> Json<MeResponse> {
    Json(me_response(&state, session).await)
}

async fn switch(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    jar: CookieJar,
    ApiQuery(query): ApiQuery<SwitchQuery>,
) -> Result<(CookieJar, Json<MeResponse>), ApiError> {
    let switched = state
        .auth()
        .switch_organization(session.session_id, query.organization_id)
        .await?;
    let token = state.session_keys().issue(&switched)?;
    let context = state.auth().resolve_session(switched.id, switched.user_id).await?;
    info!(user_id = %context.user.id, org_id = %context.org.id, "Active organization switched");
    Ok((state.cookies().set(jar, token), Json(me_response(&state, context).await)))
}

async fn logout(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    jar: CookieJar,
) -> Result<(CookieJar, Json<Deleted>), ApiError> {
    state.auth().revoke_session(session.session_id).await?;
    let jar = state.cookies().clear(jar);
    Ok((jar, Json(Deleted::by_id("session", session.session_id))))
}

async fn start_session(state: &AppState, jar: CookieJar, user: User) -> Result<(CookieJar, SessionContext), ApiError> {
    let org_id: Uuid = state.auth().default_org_for(user.id).await?;
    let session = state.auth().create_session(user.id, org_id).await?;
    let token = state.session_keys().issue(&session)?;
    let context = state.auth().resolve_session(session.id, user.id).await?;
    Ok((state.cookies().set(jar, token), context))
}

async fn me_response(state: &AppState, context: SessionContext) -> MeResponse {
    let organizations = state
        .auth()
        .organizations_for_user(context.user.id)
        .await
        .into_iter()
        .map(|(org, role)| OrganizationView::new(org, role))
        .collect();
    MeResponse {
        user: UserView::from(context.user),
        organization: OrganizationView::new(context.org, context.role),
        project: ProjectView::from(context.project),
        organizations,
    }
}

/// Entry points reachable without a session.
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/auth/send-code", post(send_code))
        .route("/auth/verify-code", post(verify_code))
        .route("/auth/invitation", get(invitation))
        .route("/auth/oauth-url", get(oauth_url))
        .route("/auth/oauth-callback", get(oauth_callback))
}

pub fn session_router() -> Router<AppState> {
    Router::new()
        .route("/auth/me", get(me))
        .route("/auth/switch", get(switch))
        .route("/auth/logout", get(logout))
        .route("/auth/accept-invitation", post(accept_invitation))
        .route("/invitations", post(create_invitation))
}

#[cfg(test)]
mod tests {
    use axum::http::{header, HeaderValue, Method};
    use axum::response::Response;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::app::build_router;
    use crate::auth::{VerifiedIdentity, SESSION_COOKIE};
    use crate::routes::test_util::{send, TestRequest};
    use crate::state::test_support::{oauth_identity, TestApp, OAUTH_CODE};

    fn session_cookie(response: &Response) -> HeaderValue {
        let set_cookie = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find(|value| value.starts_with(SESSION_COOKIE))
            .unwrap();
        let pair = set_cookie.split(';').next().unwrap();
        HeaderValue::from_str(pair).unwrap()
    }

    #[tokio::test]
    async fn code_login_sets_a_session_cookie() {
        let app = TestApp::new().await;
        let router = build_router(app.state.clone());

        let (status, body) = send(
            &router,
            TestRequest::new(Method::POST, "/auth/send-code").json(json!({ "email": "Dev@Example.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sent"], true);
        let code = app.codes.last_code_for("dev@example.com").await.unwrap();

        let response = router
            .clone()
            .oneshot(
                TestRequest::new(Method::POST, "/auth/verify-code")
                    .json(json!({ "email": "dev@example.com", "code": code }))
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = session_cookie(&response);

        let (status, me) = send(&router, TestRequest::new(Method::GET, "/auth/me").cookie(&cookie)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["user"]["object"], "user");
        assert_eq!(me["user"]["email"], "dev@example.com");
        assert_eq!(me["organization"]["role"], "owner");
        assert_eq!(me["project"]["object"], "project");
    }

    #[tokio::test]
    async fn wrong_code_is_unauthorized() {
        let app = TestApp::new().await;
        let router = build_router(app.state.clone());
        send(
            &router,
            TestRequest::new(Method::POST, "/auth/send-code").json(json!({ "email": "dev@example.com" })),
        )
        .await;
        let (status, body) = send(
            &router,
            TestRequest::new(Method::POST, "/auth/verify-code")
                .json(json!({ "email": "dev@example.com", "code": "not-a-code" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["type"], "unauthorized");
    }

    #[tokio::test]
    async fn logout_invalidates_the_cookie_server_side() {
        let app = TestApp::new().await;
        let router = build_router(app.state.clone());
        let (context, cookie) = app.session_for("dev@example.com").await;

        let (status, body) = send(&router, TestRequest::new(Method::GET, "/auth/logout").cookie(&cookie)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], context.session_id.to_string());

        let (status, _) = send(&router, TestRequest::new(Method::GET, "/auth/me").cookie(&cookie)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn oauth_round_trip_redirects_with_a_session() {
        let app = TestApp::new().await;
        let router = build_router(app.state.clone());

        let (status, body) = send(&router, TestRequest::new(Method::GET, "/auth/oauth-url")).await;
        assert_eq!(status, StatusCode::OK);
        let url = body["url"].as_str().unwrap();
        let state_param = url.split("state=").nth(1).unwrap().to_string();

        let callback = format!("/auth/oauth-callback?code={}&state={}", OAUTH_CODE, state_param);
        let response = router
            .clone()
            .oneshot(TestRequest::new(Method::GET, &callback).build())
            .await
            .unwrap();
        assert!(response.status().is_redirection());
        assert_eq!(response.headers()[header::LOCATION], "https://app.hangar.test");
        let cookie = session_cookie(&response);

        let (_, me) = send(&router, TestRequest::new(Method::GET, "/auth/me").cookie(&cookie)).await;
        assert_eq!(me["user"]["email"], "oauth@example.com");
        assert_eq!(me["user"]["first_name"], "Grace");

        let (status, _) = send(&router, TestRequest::new(Method::GET, &callback)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    async fn oauth_callback_uri(router: &Router) -> String {
        let (_, body) = send(router, TestRequest::new(Method::GET, "/auth/oauth-url")).await;
        let state_param = body["url"].as_str().unwrap().split("state=").nth(1).unwrap().to_string();
        format!("/auth/oauth-callback?code={}&state={}", OAUTH_CODE, state_param)
    }

    #[tokio::test]
    async fn oauth_with_unverified_email_cannot_enter_an_existing_account() {
        let app = TestApp::with_identity(VerifiedIdentity {
            idp_user_id: Some("other-sub".to_string()),
            email: "owner@example.com".to_string(),
            email_verified: false,
            ..oauth_identity()
        })
        .await;
        let router = build_router(app.state.clone());
        let (owner, _) = app.session_for("owner@example.com").await;

        let callback = oauth_callback_uri(&router).await;
        let response = router
            .clone()
            .oneshot(TestRequest::new(Method::GET, &callback).build())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .all(|value| !value.to_str().unwrap_or_default().starts_with(SESSION_COOKIE)));

        let owner = app.state.auth().get_user(owner.user.id).await.unwrap();
        assert!(owner.idp_user_id.is_none());
    }

    #[tokio::test]
    async fn oauth_with_verified_email_joins_the_existing_account() {
        let app = TestApp::with_identity(VerifiedIdentity {
            email: "owner@example.com".to_string(),
            ..oauth_identity()
        })
        .await;
        let router = build_router(app.state.clone());
        let (owner, _) = app.session_for("owner@example.com").await;

        let callback = oauth_callback_uri(&router).await;
        let response = router
            .clone()
            .oneshot(TestRequest::new(Method::GET, &callback).build())
            .await
            .unwrap();
        assert!(response.status().is_redirection());
        let cookie = session_cookie(&response);

        let (_, me) = send(&router, TestRequest::new(Method::GET, "/auth/me").cookie(&cookie)).await;
        assert_eq!(me["user"]["id"], owner.user.id.to_string());
        assert_eq!(me["organization"]["id"], owner.org.id.to_string());
    }

    #[tokio::test]
    async fn invitation_is_previewable_then_accepted_and_switchable() {
        let app = TestApp::new().await;
        let router = build_router(app.state.clone());
        let (owner, owner_cookie) = app.session_for("owner@example.com").await;

        let (status, invitation) = send(
            &router,
            TestRequest::new(Method::POST, "/invitations")
                .cookie(&owner_cookie)
                .json(json!({ "email": "guest@example.com", "role": "admin" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(invitation["object"], "invitation");
        let token = invitation["token"].as_str().unwrap().to_string();

        let (status, preview) = send(
            &router,
            TestRequest::new(Method::GET, &format!("/auth/invitation?token={}", token)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(preview["email"], "guest@example.com");
        assert!(preview.get("token").is_none());

        let (_, guest_cookie) = app.session_for("guest@example.com").await;
        let (status, joined) = send(
            &router,
            TestRequest::new(Method::POST, "/auth/accept-invitation")
                .cookie(&guest_cookie)
                .json(json!({ "token": token })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(joined["id"], owner.org.id.to_string());
        assert_eq!(joined["role"], "admin");

        let response = router
            .clone()
            .oneshot(
                TestRequest::new(Method::GET, &format!("/auth/switch?organization_id={}", owner.org.id))
                    .cookie(&guest_cookie)
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let switched_cookie = session_cookie(&response);
        let (_, me) = send(&router, TestRequest::new(Method::GET, "/auth/me").cookie(&switched_cookie)).await;
        assert_eq!(me["organization"]["id"], owner.org.id.to_string());
        assert_eq!(me["project"]["id"], owner.project.id.to_string());
        assert_eq!(me["organizations"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn session_routes_reject_anonymous_callers() {
        let app = TestApp::new().await;
        let router = build_router(app.state.clone());
        for (method, uri) in [
            (Method::GET, "/auth/me"),
            (Method::GET, "/auth/logout"),
            (Method::POST, "/invitations"),
        ] {
            let (status, _) = send(&router, TestRequest::new(method, uri)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }
    }
}
