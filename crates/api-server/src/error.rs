//! HTTP error boundary
//!
//! Every handler returns `Result<_, ApiError>`. Client errors carry their
//! message; anything else becomes a generic 500 plus a logged incident.

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, FromRequest, FromRequestParts, Request},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use hangar_core::schema::FieldError;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::auth::AuthError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] hangar_core::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Too many requests")]
    RateLimited,

    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    object: &'static str,
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<Vec<FieldError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    incident_id: Option<Uuid>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Core(err) => match err.kind() {
                "bad_request" => StatusCode::BAD_REQUEST,
                "unauthorized" => StatusCode::UNAUTHORIZED,
                "forbidden" => StatusCode::FORBIDDEN,
                "not_found" => StatusCode::NOT_FOUND,
                "conflict" => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Auth(err) => match err {
                AuthError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                AuthError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
                AuthError::NotFound(_) => StatusCode::NOT_FOUND,
                AuthError::Conflict(_) => StatusCode::CONFLICT,
                AuthError::Identity(_) | AuthError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self.status() {
            StatusCode::BAD_REQUEST => "bad_request",
            StatusCode::UNAUTHORIZED => "unauthorized",
            StatusCode::FORBIDDEN => "forbidden",
            StatusCode::NOT_FOUND => "not_found",
            StatusCode::CONFLICT => "conflict",
            StatusCode::TOO_MANY_REQUESTS => "rate_limited",
            _ => "internal_server_error",
        }
    }

    /// The raw message without the variant prefix, for client-facing bodies.
    fn client_message(&self) -> String {
        match self {
            Self::Core(hangar_core::Error::BadRequest(message))
            | Self::Core(hangar_core::Error::Unauthorized(message))
            | Self::Core(hangar_core::Error::Forbidden(message))
            | Self::Core(hangar_core::Error::NotFound(message))
            | Self::Core(hangar_core::Error::Conflict(message)) => message.clone(),
            Self::Auth(
                AuthError::InvalidInput(message)
                | AuthError::Unauthorized(message)
                | AuthError::Forbidden(message)
                | AuthError::NotFound(message)
                | AuthError::Conflict(message),
            ) => message.clone(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = if status.is_server_error() {
            let incident_id = Uuid::new_v4();
            error!(incident_id = %incident_id, error = %self, "Unhandled request error");
            ErrorDetail {
                kind: "internal_server_error",
                message: "Internal server error".to_string(),
                fields: None,
                incident_id: Some(incident_id),
            }
        } else {
            let fields = match &self {
                Self::Core(hangar_core::Error::Validation(validation)) => Some(validation.fields.clone()),
                _ => None,
            };
            ErrorDetail {
                kind: self.kind(),
                message: self.client_message(),
                fields,
                incident_id: None,
            }
        };

        (
            status,
            Json(ErrorBody {
                object: "error",
                error: detail,
            }),
        )
            .into_response()
    }
}

impl From<hangar_core::schema::ValidationError> for ApiError {
    fn from(err: hangar_core::schema::ValidationError) -> Self {
        Self::Core(err.into())
    }
}

/// `Json` whose rejections use the error envelope above.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest(rejection.body_text())
}

/// `Query` whose rejections use the error envelope above.
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match axum::extract::Query::<T>::from_request_parts(parts, state).await {
            Ok(axum::extract::Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(query_rejection(rejection)),
        }
    }
}

fn query_rejection(rejection: QueryRejection) -> ApiError {
    ApiError::BadRequest(rejection.body_text())
}
