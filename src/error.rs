use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::json;
use thiserror::Error;

/// Unified error type for the relay
#[derive(Error, Debug)]
pub enum RelayError {
    // Egress errors
    #[error("No usable egress path: {0}")]
    Configuration(String),

    #[error("Upstream blocked the request with status {status}")]
    UpstreamBlocked { status: StatusCode, body: Bytes },

    #[error("Upstream unreachable after {attempts} attempts: {message}")]
    TransientNetwork { attempts: u32, message: String },

    // Request errors
    #[error("Invalid request: {0}")]
    Validation(String),

    // Manifest errors
    #[error("Manifest rewrite failed: {0}")]
    Rewrite(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,

            // Origin status is passed through for diagnosis
            RelayError::UpstreamBlocked { status, .. } => *status,

            // 502 Bad Gateway
            RelayError::TransientNetwork { .. } => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            RelayError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            RelayError::InvalidConfig(_)
            | RelayError::Rewrite(_)
            | RelayError::Io(_)
            | RelayError::Http(_)
            | RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let RelayError::UpstreamBlocked { body, .. } = self {
            return (status, [(header::CONTENT_TYPE, "text/html")], body).into_response();
        }

        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

impl From<url::ParseError> for RelayError {
    fn from(err: url::ParseError) -> Self {
        RelayError::Validation(err.to_string())
    }
}

impl From<axum::http::Error> for RelayError {
    fn from(err: axum::http::Error) -> Self {
        RelayError::Http(err.to_string())
    }
}
