//! Error types for the backup server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mealplan_backup::BackupError;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// One problem with a request field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl FieldError {
    /// Creates a field error.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors that can occur in the backup server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Request fields failed validation.
    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    /// Missing or invalid credentials.
    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated, but not an administrator.
    #[error("Admin access required")]
    Forbidden,

    /// The backup subsystem failed.
    #[error("backup error: {0}")]
    Backup(#[from] BackupError),

    /// Configuration could not be read.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Shorthand for a single-field validation failure.
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        ServerError::Validation(vec![FieldError::new(field, message)])
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        match self {
            ServerError::Validation(_)
            | ServerError::Unauthorized(_)
            | ServerError::Forbidden => true,
            ServerError::Backup(e) => e.is_validation(),
            _ => false,
        }
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden => StatusCode::FORBIDDEN,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Renders the JSON error envelope.
    ///
    /// Server-side failures carry their detail in `error` unless `production`
    /// is set; the `message` field is always present and stable.
    pub fn to_body(&self, production: bool) -> Value {
        match self {
            ServerError::Validation(errors) => json!({
                "success": false,
                "message": "Validation failed",
                "errors": errors,
            }),
            ServerError::Backup(BackupError::InvalidScript) => json!({
                "success": false,
                "message": "Script must be a string",
            }),
            ServerError::Backup(e) if e.is_validation() => json!({
                "success": false,
                "message": "Validation failed",
                "errors": [FieldError::new("request", e.to_string())],
            }),
            ServerError::Unauthorized(_) | ServerError::Forbidden => json!({
                "success": false,
                "message": self.to_string(),
            }),
            _ if production => json!({
                "success": false,
                "message": "Internal server error",
            }),
            _ => json!({
                "success": false,
                "message": "Internal server error",
                "error": self.to_string(),
            }),
        }
    }

    /// Wraps the error for rendering in the given mode.
    pub fn in_mode(self, production: bool) -> ErrorResponse {
        ErrorResponse {
            error: self,
            production,
        }
    }
}

/// A [`ServerError`] paired with the deployment mode it is rendered in.
#[derive(Debug)]
pub struct ErrorResponse {
    error: ServerError,
    production: bool,
}

impl ErrorResponse {
    /// The wrapped error.
    pub fn error(&self) -> &ServerError {
        &self.error
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        (status, Json(self.error.to_body(self.production))).into_response()
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        self.in_mode(true).into_response()
    }
}
