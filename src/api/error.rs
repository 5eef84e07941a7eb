use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

use super::ApiResponse;

#[derive(Debug)]
pub enum ApiError {
    /// Session missing, expired, or failed validation. Redirect target is
    /// re-authentication; the body never explains which check failed.
    SessionInvalid,

    /// CSRF token missing or mismatched. Reported as a structured 403,
    /// distinct from session failures, so the UI can tell "session
    /// expired" apart from "bad request".
    CsrfRejected,

    NotFound(String),

    ValidationError(String),

    /// Magic-link problems are user-visible and non-fatal.
    LinkUnusable(String),

    DatabaseError(String),

    InternalError(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::SessionInvalid => write!(f, "Session validation failed"),
            ApiError::CsrfRejected => write!(f, "Security validation failed"),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            ApiError::LinkUnusable(msg) => write!(f, "Link unusable: {}", msg),
            ApiError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            ApiError::SessionInvalid => (
                StatusCode::UNAUTHORIZED,
                "Your session could not be validated. Please sign in again.".to_string(),
            ),
            ApiError::CsrfRejected => (
                StatusCode::FORBIDDEN,
                "Security validation failed for this request.".to_string(),
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::LinkUnusable(msg) => (StatusCode::GONE, msg.clone()),
            ApiError::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred".to_string(),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ApiResponse::<()>::error(error_message);
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

impl From<crate::session::SessionError> for ApiError {
    fn from(err: crate::session::SessionError) -> Self {
        ApiError::DatabaseError(err.to_string())
    }
}

impl From<crate::services::ServiceError> for ApiError {
    fn from(err: crate::services::ServiceError) -> Self {
        ApiError::DatabaseError(err.to_string())
    }
}

impl From<crate::services::MagicLinkError> for ApiError {
    fn from(err: crate::services::MagicLinkError) -> Self {
        use crate::services::MagicLinkError;
        match err {
            MagicLinkError::NotFound | MagicLinkError::Expired | MagicLinkError::AlreadyUsed => {
                ApiError::LinkUnusable(
                    "This sign-in link is no longer valid. Please request a new one.".to_string(),
                )
            }
            MagicLinkError::Session(msg) | MagicLinkError::Database(msg) => {
                ApiError::DatabaseError(msg)
            }
        }
    }
}
