/// Unified error types for the LearnHub API
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the API
#[derive(Error, Debug)]
pub enum ApiError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Authentication errors (missing, invalid, or expired credential)
    #[error("{0}")]
    Authentication(String),

    /// Authorization errors (valid identity, insufficient privilege)
    #[error("{0}")]
    Authorization(String),

    /// Validation errors (malformed input)
    #[error("{0}")]
    Validation(String),

    /// Not found errors
    #[error("{0}")]
    NotFound(String),

    /// Conflict errors (duplicate unique field)
    #[error("{0}")]
    Conflict(String),

    /// Upstream billing provider failures
    #[error("Payment provider error: {0}")]
    PaymentProvider(String),

    /// Data-integrity gap between the billing provider and the local store.
    /// Logged and alerted; never surfaced to the provider as a delivery failure.
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Token encoding errors
    #[error("Token error: {0}")]
    Jwt(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Uniform error envelope returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

/// Convert ApiError to HTTP response
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Authentication(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::Authorization(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::PaymentProvider(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            // Don't leak internal details
            ApiError::Database(_)
            | ApiError::Integrity(_)
            | ApiError::Jwt(_)
            | ApiError::Internal(_)
            | ApiError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {}", self);
        }

        let body = Json(ErrorResponse {
            success: false,
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;
