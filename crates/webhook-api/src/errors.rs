//! Maps `webhook_core::WebhookCoreError` (and request-level validation
//! failures) onto HTTP status codes per the error-handling design: auth and
//! malformed-input errors are 4xx and synchronous; storage errors are 5xx so
//! the upstream caller retries; not-found and duplicate-event are 200s
//! (handled before this type is ever constructed).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use webhook_core::WebhookCoreError;

#[derive(Debug, thiserror::Error)]
pub enum WebhookHandlerError {
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("authentication failed: {0}")]
    AuthFailure(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("request body exceeds the configured limit")]
    PayloadTooLarge,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<WebhookCoreError> for WebhookHandlerError {
    fn from(e: WebhookCoreError) -> Self {
        match e {
            WebhookCoreError::AuthFailure { reason } => Self::AuthFailure(reason),
            WebhookCoreError::MalformedInput { reason } => Self::MalformedInput(reason),
            WebhookCoreError::Validation(err) => Self::MalformedInput(err.to_string()),
            WebhookCoreError::Parse(err) => Self::MalformedInput(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for WebhookHandlerError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::MissingHeader(_) | Self::AuthFailure(_) => StatusCode::UNAUTHORIZED,
            Self::MalformedInput(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
