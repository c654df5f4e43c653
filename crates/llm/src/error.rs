use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::messages::claude::ErrorResponse;

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Proxy-originated errors with their HTTP mapping.
///
/// Upstream non-2xx responses are not errors in this taxonomy: they are
/// forwarded verbatim by the proxy handler and never rewrapped.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Proxy key mismatch.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Unknown provider, missing credential, or disallowed model.
    #[error("ConfigError: {0}")]
    Config(String),

    /// Upstream TCP/TLS failure.
    #[error("Upstream connection error: {0}")]
    Transport(String),

    /// Malformed JSON in a request, chunk, or response.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Adapter-level translation failure.
    #[error("Transform error: {0}")]
    Transform(String),
}

impl LlmError {
    /// The HTTP status code this error surfaces as.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::Parse(_) | Self::Transform(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The Claude error-envelope `type` string.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Auth(_) => "authentication_error",
            Self::Config(_) => "api_error",
            Self::Transport(_) => "api_error",
            Self::Parse(_) => "invalid_request_error",
            Self::Transform(_) => "api_error",
        }
    }
}

impl IntoResponse for LlmError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Auth and config failures answer in plain text; everything that
        // originates from transformation uses the Claude error envelope.
        match self {
            Self::Auth(_) | Self::Config(_) => (status, self.to_string()).into_response(),
            _ => {
                let body = ErrorResponse::new(self.error_type(), self.to_string());
                (status, Json(body)).into_response()
            }
        }
    }
}
