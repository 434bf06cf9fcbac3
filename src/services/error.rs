use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::dtos::ErrorResponse;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("concurrency conflict: stale etag")]
    ConcurrencyConflict,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("password was used before")]
    PasswordReuse,

    #[error("external collaborator failure: {0}")]
    Collaborator(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConcurrencyConflict => ServiceError::ConcurrencyConflict,
            StoreError::NotFound => ServiceError::NotFound("record not found".to_string()),
            StoreError::DuplicateKey(key) => {
                ServiceError::Validation(format!("duplicate natural key: {}", key))
            }
            StoreError::Invalid(msg) => ServiceError::Validation(msg),
            StoreError::Internal(e) => ServiceError::Internal(e),
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::Validation(err.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, message, detail) = match self {
            ServiceError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "Validation error".to_string(), Some(msg))
            }
            ServiceError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string(), None)
            }
            ServiceError::InvalidOrExpiredToken => (
                StatusCode::UNAUTHORIZED,
                "Invalid or expired token".to_string(),
                None,
            ),
            ServiceError::ConcurrencyConflict => (
                StatusCode::CONFLICT,
                "Concurrency conflict".to_string(),
                Some("the supplied etag is stale; re-read and retry".to_string()),
            ),
            ServiceError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ServiceError::PasswordReuse => (
                StatusCode::BAD_REQUEST,
                "Password reuse".to_string(),
                Some("the new password matches a retained prior password".to_string()),
            ),
            ServiceError::Collaborator(msg) => (
                StatusCode::BAD_GATEWAY,
                "External collaborator failure".to_string(),
                Some(msg),
            ),
            ServiceError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                status: status.as_u16(),
                message,
                detail,
            }),
        )
            .into_response()
    }
}
