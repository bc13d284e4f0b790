//! Data API error types.
//!
//! All errors map to appropriate HTTP status codes via the `IntoResponse` impl.
//! Error messages returned to clients are intentionally generic to avoid
//! leaking internal details. Actual errors are logged server-side.

use crate::auth::AuthError;
use crate::db::{ConnectError, DriverError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Message returned for every rejected bearer token.
pub const INVALID_TOKEN_MESSAGE: &str = "The access token is invalid or expired";

/// Data API error type.
///
/// Maps to appropriate HTTP status codes:
/// - InvalidToken: 401 Unauthorized
/// - Configuration, Database, Internal: 500 Internal Server Error
/// - ServiceUnavailable: 503 Service Unavailable
/// - Timeout: 504 Gateway Timeout
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Request exceeded {0:?}")]
    Timeout(std::time::Duration),

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::InvalidToken(_) => 401,
            ApiError::Configuration(_) | ApiError::Database(_) | ApiError::Internal => 500,
            ApiError::ServiceUnavailable(_) => 503,
            ApiError::Timeout(_) => 504,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::InvalidToken(reason) => {
                (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", reason.clone())
            }
            ApiError::Configuration(reason) => {
                tracing::error!(target: "api.config", reason = %reason, "Service misconfigured");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIGURATION_ERROR",
                    "The service is not configured correctly".to_string(),
                )
            }
            ApiError::Database(err) => {
                // Log actual error server-side, return generic message to client
                tracing::error!(target: "api.db", error = %err, "Database operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            ApiError::ServiceUnavailable(reason) => {
                tracing::warn!(target: "api.availability", reason = %reason, "Service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                )
            }
            ApiError::Timeout(limit) => {
                tracing::warn!(target: "api.routes", limit_secs = limit.as_secs(), "Request timed out");
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    "REQUEST_TIMEOUT",
                    "The request took too long to complete".to_string(),
                )
            }
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        // Add WWW-Authenticate header for 401 responses
        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) = "Bearer realm=\"data-api\", error=\"invalid_token\"".parse() {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

/// Token rejections collapse to one generic 401; the cause stays in the logs.
impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Config(cause) => ApiError::Configuration(cause),
            AuthError::Fetch(cause) => ApiError::ServiceUnavailable(cause),
            AuthError::UnknownKey { .. } | AuthError::Expired | AuthError::InvalidToken(_) => {
                ApiError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string())
            }
        }
    }
}

impl From<ConnectError> for ApiError {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::Config(cause) => ApiError::Configuration(cause),
            other => ApiError::Database(other.to_string()),
        }
    }
}

impl From<DriverError> for ApiError {
    fn from(err: DriverError) -> Self {
        ApiError::Database(err.to_string())
    }
}
