use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Result alias used throughout the gateway crate.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway errors, each mapped to an HTTP status code and an OpenAI-shaped body.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A client-supplied `x_adapter_critic` override (or the request body itself) failed to validate.
    #[error("{0}")]
    Validation(String),

    /// The served model could not be resolved: unknown model name, incomplete partial
    /// override, or a missing secondary stage target.
    #[error("{0}")]
    Routing(String),

    /// An upstream returned a body that does not conform to the OpenAI response shape.
    #[error("upstream returned non-OpenAI response shape")]
    UpstreamFormat(#[from] crate::provider::UpstreamResponseFormatError),

    /// A network, TLS, timeout, or non-2xx transport failure talking to an upstream.
    #[error("upstream request failed: {0}")]
    Transport(String),

    /// An internal invariant was violated (e.g. dispatch called with a mode lacking its
    /// required secondary stage target). Should not be reachable once routing resolution
    /// has succeeded.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Routing(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamFormat(_) | Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// OpenAI-style `error.type` string.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_request_error",
            Self::Routing(_) => "invalid_request_error",
            Self::UpstreamFormat(_) => "upstream_error",
            Self::Transport(_) => "upstream_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<crate::provider::UpstreamError> for GatewayError {
    fn from(error: crate::provider::UpstreamError) -> Self {
        match error {
            crate::provider::UpstreamError::Format(format_error) => Self::UpstreamFormat(format_error),
            crate::provider::UpstreamError::Transport(message) => Self::Transport(message),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    r#type: String,
    code: u16,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let Self::UpstreamFormat(ref format_error) = self {
            log::error!(
                "upstream response format error model={} base_url={} message_count={} status_code={} reason={} payload={}",
                format_error.model,
                format_error.base_url,
                format_error.message_count,
                format_error.status_code,
                format_error.reason,
                format_error.payload_preview,
            );
        }

        let message = match self {
            Self::UpstreamFormat(_) => "upstream returned non-OpenAI response shape".to_string(),
            Self::Transport(_) => "upstream request failed".to_string(),
            ref other => other.to_string(),
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                message,
                r#type: self.error_type().to_string(),
                code: status.as_u16(),
            },
        };

        (status, Json(body)).into_response()
    }
}
