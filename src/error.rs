//! Gateway error taxonomy and HTTP mapping.
//!
//! Validation and rate-limit errors carry structured detail back to the
//! client. Upstream and parsing failures are logged server-side with their
//! cause, but only a short generic string is echoed to the client so that
//! internal configuration and secrets never leak through error bodies.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

pub type Result<T> = std::result::Result<T, GatewayError>;

/// A single failed constraint in a request body, with the path that failed.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    /// JSON path of the offending field, e.g. `metadata.symbol`.
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Request body failed schema validation. Carries every failing field,
    /// not just the first.
    #[error("request validation failed ({} field(s))", .0.len())]
    Validation(Vec<FieldError>),

    /// A rate-limit policy rejected the request.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        retry_after_secs: u64,
        limit: u32,
        remaining: u32,
        reset_at_millis: u64,
    },

    /// The LLM or backend call exceeded its deadline. Retryable.
    #[error("upstream call timed out: {0}")]
    UpstreamTimeout(String),

    /// Network or connection failure reaching the LLM or backend. Retryable.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The model produced output no JSON object could be recovered from.
    #[error("unparsable model output: {0}")]
    InvalidResponseFormat(String),

    /// Recovered model JSON lacked a required field.
    #[error("model output missing required field `{0}`")]
    MissingRequiredField(&'static str),

    /// Missing or incorrect shared-secret API token.
    #[error("unauthorized")]
    Unauthorized,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// HTTP status for this error class.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamTimeout(_)
            | Self::InvalidResponseFormat(_)
            | Self::MissingRequiredField(_)
            | Self::Config(_)
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short client-safe message. Internal causes stay in the server log.
    fn client_message(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Request validation failed",
            Self::RateLimited { .. } => "Rate limit exceeded",
            Self::UpstreamTimeout(_) => "The AI service took too long to respond",
            Self::UpstreamUnavailable(_) => "The service is temporarily unavailable",
            Self::InvalidResponseFormat(_) | Self::MissingRequiredField(_) => {
                "The AI service returned an unexpected response"
            }
            Self::Unauthorized => "Unauthorized",
            Self::Config(_) | Self::Io(_) => "Internal server error",
        }
    }

    /// Machine-readable error code included in the failure envelope.
    fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::RateLimited { .. } => "rate_limited",
            Self::UpstreamTimeout(_) => "upstream_timeout",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::InvalidResponseFormat(_) => "invalid_response_format",
            Self::MissingRequiredField(_) => "missing_required_field",
            Self::Unauthorized => "unauthorized",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
        }
    }

    /// Whether a client may reasonably retry the same request later.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::UpstreamTimeout(_) | Self::UpstreamUnavailable(_)
        )
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        // Full cause goes to the log; the body carries only the generic string.
        match &self {
            Self::Validation(fields) => {
                warn!(fields = fields.len(), "request validation failed");
            }
            Self::RateLimited {
                retry_after_secs, ..
            } => {
                warn!(retry_after_secs, "rate limit exceeded");
            }
            Self::Unauthorized => {
                warn!("rejected request with missing or invalid API token");
            }
            other => {
                error!(error = %other, "request failed");
            }
        }

        let mut body = json!({
            "success": false,
            "error": self.client_message(),
            "code": self.code(),
        });
        if self.retryable() {
            body["retryable"] = json!(true);
        }
        if let Self::Validation(ref fields) = self {
            body["details"] = json!(fields);
        }

        let mut response = (self.status(), Json(body)).into_response();

        if let Self::RateLimited {
            retry_after_secs,
            limit,
            remaining,
            reset_at_millis,
        } = self
        {
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, retry_after_secs.into());
            headers.insert("x-ratelimit-limit", limit.into());
            headers.insert("x-ratelimit-remaining", remaining.into());
            headers.insert("x-ratelimit-reset", reset_at_millis.into());
        }

        response
    }
}
