//! LLM provider abstraction.
//!
//! The gate talks to the model through [`LLMProvider`] so the concrete
//! Gemini implementation can be swapped for a test double (or a different
//! vendor) without touching orchestration code.

pub mod gemini;

pub use gemini::GeminiProvider;

use async_trait::async_trait;

use crate::error::{GatewayError, Result};

/// Per-call generation parameters. `None` fields are omitted from the
/// request so the upstream default applies.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
}

/// A text-completion backend.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Send one completion request: a system instruction plus a single user
    /// turn. Returns the raw completion text.
    async fn complete(
        &self,
        system: &str,
        user: &str,
        options: &GenerationOptions,
    ) -> Result<String>;

    /// Model used when the caller does not override one.
    fn default_model(&self) -> &str;

    /// Short provider name for logging.
    fn name(&self) -> &str;
}

/// Map an upstream HTTP error status to a gateway error class.
///
/// Every non-success status is an upstream availability problem from the
/// gateway's point of view; the status and body are preserved for the
/// server-side log only.
pub(crate) fn provider_error(status: u16, detail: &str) -> GatewayError {
    if status == 408 || status == 504 {
        GatewayError::UpstreamTimeout(format!("upstream returned {status}: {detail}"))
    } else {
        GatewayError::UpstreamUnavailable(format!("upstream returned {status}: {detail}"))
    }
}
