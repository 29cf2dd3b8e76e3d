/// Unified error types for the FPA portal
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the portal
#[derive(Error, Debug)]
pub enum PortalError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration errors
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Authorization errors
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict errors (e.g., duplicate email or registration)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A status change that the lifecycle does not allow
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// Upload storage errors
    #[error("Upload error: {0}")]
    Upload(String),

    /// Email delivery errors
    #[error("Email error: {0}")]
    Email(String),

    /// Signing a session token failed
    #[error("Token signing error: {0}")]
    TokenSigning(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<validator::ValidationErrors> for PortalError {
    fn from(errors: validator::ValidationErrors) -> Self {
        PortalError::Validation(errors.to_string())
    }
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl PortalError {
    /// HTTP status and machine-readable code for this error
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            PortalError::Authentication(_) => (StatusCode::UNAUTHORIZED, "AuthenticationRequired"),
            PortalError::Authorization(_) => (StatusCode::FORBIDDEN, "Forbidden"),
            PortalError::Validation(_) => (StatusCode::BAD_REQUEST, "InvalidRequest"),
            PortalError::Upload(_) => (StatusCode::BAD_REQUEST, "InvalidUpload"),
            PortalError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            PortalError::Conflict(_) => (StatusCode::CONFLICT, "Conflict"),
            PortalError::InvalidTransition(_) => (StatusCode::CONFLICT, "InvalidTransition"),
            PortalError::RateLimitExceeded { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "RateLimitExceeded")
            }
            PortalError::Database(_)
            | PortalError::Migration(_)
            | PortalError::Email(_)
            | PortalError::TokenSigning(_)
            | PortalError::Io(_)
            | PortalError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalServerError")
            }
        }
    }
}

/// Convert PortalError to HTTP response
impl IntoResponse for PortalError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            // Don't leak details
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let retry_after = match &self {
            PortalError::RateLimitExceeded { retry_after } => Some(retry_after.as_secs().max(1)),
            _ => None,
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result type alias for portal operations
pub type PortalResult<T> = Result<T, PortalError>;

/// Turn a UNIQUE constraint violation into a conflict with the given message
pub fn conflict_on_unique(message: &str) -> impl FnOnce(sqlx::Error) -> PortalError + '_ {
    move |err| match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            PortalError::Conflict(message.to_string())
        }
        _ => PortalError::Database(err),
    }
}
