//! Error types for the core library

use thiserror::Error;

use crate::provider::ProviderError;
use crate::schema::ValidationError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Token error: {0}")]
    Token(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Stable machine-readable kind, used in error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) | Self::Validation(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Provider(_) | Self::Token(_) | Self::Storage(_) | Self::Internal(_) => {
                "internal_server_error"
            }
        }
    }

    /// Whether the message is safe to hand back to a caller.
    pub fn is_client_error(&self) -> bool {
        self.kind() != "internal_server_error"
    }
}
