//! Live service error types.
//!
//! Every error maps to an HTTP status code via the `IntoResponse` impl.
//! Database and internal failures are logged server-side and reach the client
//! only as a generic message. Domain failures carry a human-readable reason
//! naming the precondition that failed.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Live service error type.
///
/// Maps to HTTP status codes:
/// - Validation: 400 Bad Request
/// - InvalidToken: 401 Unauthorized
/// - Forbidden: 403 Forbidden
/// - NotFound: 404 Not Found
/// - CapabilityExpired: 410 Gone
/// - Database, Internal: 500 Internal Server Error
/// - ServiceUnavailable: 503 Service Unavailable
#[derive(Debug, Error)]
pub enum LiveError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invite has expired")]
    CapabilityExpired,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LiveError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            LiveError::Validation(_) => 400,
            LiveError::InvalidToken(_) => 401,
            LiveError::Forbidden(_) => 403,
            LiveError::NotFound(_) => 404,
            LiveError::CapabilityExpired => 410,
            LiveError::Database(_) | LiveError::Internal(_) => 500,
            LiveError::ServiceUnavailable(_) => 503,
        }
    }

    /// Stable machine-readable code, also used as a metric label.
    pub fn code(&self) -> &'static str {
        match self {
            LiveError::Validation(_) => "VALIDATION_ERROR",
            LiveError::InvalidToken(_) => "INVALID_TOKEN",
            LiveError::Forbidden(_) => "FORBIDDEN",
            LiveError::NotFound(_) => "NOT_FOUND",
            LiveError::CapabilityExpired => "INVITE_EXPIRED",
            LiveError::Database(_) => "DATABASE_ERROR",
            LiveError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            LiveError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Rejection for any operation against an ended session.
    pub fn session_inactive() -> Self {
        LiveError::Forbidden("Session is no longer active".to_string())
    }

    /// Rejection for an unknown session id.
    pub fn session_not_found() -> Self {
        LiveError::NotFound("Session not found".to_string())
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

impl IntoResponse for LiveError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = match &self {
            LiveError::Database(err) => {
                tracing::error!(target: "live.database", error = %err, "Database operation failed");
                "An internal database error occurred".to_string()
            }
            LiveError::Internal(err) => {
                tracing::error!(target: "live.internal", error = %err, "Internal error");
                "An internal error occurred".to_string()
            }
            LiveError::ServiceUnavailable(reason) => {
                tracing::warn!(target: "live.availability", reason = %reason, "Service unavailable");
                "Service temporarily unavailable".to_string()
            }
            LiveError::CapabilityExpired => {
                "This invite has expired. Ask the host for a new one.".to_string()
            }
            LiveError::Validation(reason)
            | LiveError::InvalidToken(reason)
            | LiveError::Forbidden(reason)
            | LiveError::NotFound(reason) => reason.clone(),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) = "Bearer realm=\"live-service\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

impl From<sqlx::Error> for LiveError {
    fn from(err: sqlx::Error) -> Self {
        LiveError::Database(err.to_string())
    }
}
