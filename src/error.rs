/// Unified error types for Shiftdesk
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum DeskError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration errors
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Authentication errors (bad credentials, missing or expired token)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The acting user lacks permission for the target operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Overlapping schedule, duplicate natural key, or entity still in use
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Notification delivery failed. Never surfaced past the dispatcher.
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JWT errors
    #[error("JWT error: {0}")]
    Jwt(String),
}

impl From<validator::ValidationErrors> for DeskError {
    fn from(errors: validator::ValidationErrors) -> Self {
        DeskError::Validation(errors.to_string())
    }
}

/// Error body returned to API clients
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert DeskError to HTTP response
impl IntoResponse for DeskError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            DeskError::Authentication(_) | DeskError::Jwt(_) => (
                StatusCode::UNAUTHORIZED,
                "AuthenticationRequired",
                self.to_string(),
            ),
            DeskError::Forbidden(_) => (StatusCode::FORBIDDEN, "Forbidden", self.to_string()),
            DeskError::Validation(_) | DeskError::Json(_) => (
                StatusCode::BAD_REQUEST,
                "InvalidRequest",
                self.to_string(),
            ),
            DeskError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound", self.to_string()),
            DeskError::Conflict(_) => (StatusCode::CONFLICT, "Conflict", self.to_string()),
            DeskError::Database(_)
            | DeskError::Migration(_)
            | DeskError::Delivery(_)
            | DeskError::Internal(_)
            | DeskError::Io(_) => {
                tracing::error!("Request failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalServerError",
                    "Something went wrong, please try again".to_string(), // Don't leak details
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for service operations
pub type DeskResult<T> = Result<T, DeskError>;
