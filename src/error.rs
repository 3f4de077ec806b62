use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::auth::TokenError;
use crate::response::ApiResponse;
use crate::users::{StoreError, UserError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        message: String,
        errors: Vec<String>,
    },
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>, errors: Vec<String>) -> Self {
        Self::Validation {
            message: message.into(),
            errors,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        match self {
            Self::Validation { message, errors } => {
                ApiResponse::error(message, code, Some(json!({ "errors": errors }))).into_response()
            }
            Self::Internal(e) => {
                error!(error = ?e, "internal error");
                ApiResponse::<()>::error("internal server error", code, None).into_response()
            }
            other => ApiResponse::<()>::error(other.to_string(), code, None).into_response(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::NotFound(e.to_string()),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Database(db) => Self::Internal(anyhow::Error::new(db)),
        }
    }
}

impl From<UserError> for ApiError {
    fn from(e: UserError) -> Self {
        match e {
            UserError::Store(store) => store.into(),
            UserError::InvalidCredentials => Self::Unauthorized(e.to_string()),
            UserError::Password(p) => Self::Internal(anyhow::Error::new(p)),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Signing(_) | TokenError::ExpiryOutOfRange => {
                Self::Internal(anyhow::Error::new(e))
            }
            _ => Self::Unauthorized(e.to_string()),
        }
    }
}
