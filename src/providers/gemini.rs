//! Native Gemini provider.
//!
//! Auth priority: config key → GEMINI_API_KEY → GOOGLE_API_KEY
//!
//! Thinking model support: Gemini 2.5 models return parts tagged
//! `thought: true`. This provider filters those out and only returns the
//! final non-thought text, which keeps the downstream JSON extraction from
//! choking on reasoning prose.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{GatewayError, Result};

use super::{provider_error, GenerationOptions, LLMProvider};

/// Gemini v1beta REST API base.
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model when none is configured.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

// ── Auth ─────────────────────────────────────────────────────────────────────

/// Authentication method for the Gemini REST API.
pub enum GeminiAuth {
    /// Standard API key — sent as `?key=` query parameter.
    ApiKey(String),
    /// OAuth bearer token — sent as `Authorization: Bearer` header.
    BearerToken(String),
}

impl std::fmt::Debug for GeminiAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("GeminiAuth::ApiKey([REDACTED])"),
            Self::BearerToken(_) => f.write_str("GeminiAuth::BearerToken([REDACTED])"),
        }
    }
}

impl GeminiAuth {
    /// Resolve auth credentials in priority order.
    ///
    /// 1. `explicit_key` — value from gateway configuration
    /// 2. `env_key` — value of `GEMINI_API_KEY` or `GOOGLE_API_KEY`
    pub fn resolve(explicit_key: Option<&str>, env_key: Option<&str>) -> Option<Self> {
        if let Some(k) = explicit_key.filter(|k| !k.is_empty()) {
            return Some(Self::ApiKey(k.to_string()));
        }
        if let Some(k) = env_key.filter(|k| !k.is_empty()) {
            return Some(Self::ApiKey(k.to_string()));
        }
        None
    }
}

// ── Provider ──────────────────────────────────────────────────────────────────

/// Provider that speaks the Gemini `generateContent` REST API directly.
pub struct GeminiProvider {
    auth: GeminiAuth,
    model: String,
    client: Client,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("auth", &self.auth)
            .field("model", &self.model)
            .finish()
    }
}

impl GeminiProvider {
    /// Build a provider that authenticates with an API key.
    pub fn new_with_key(api_key: &str, model: &str) -> Self {
        Self {
            auth: GeminiAuth::ApiKey(api_key.to_string()),
            model: model.to_string(),
            client: Self::build_client(),
        }
    }

    /// Build a provider that authenticates with a bearer token.
    pub fn new_with_token(bearer_token: &str, model: &str) -> Self {
        Self {
            auth: GeminiAuth::BearerToken(bearer_token.to_string()),
            model: model.to_string(),
            client: Self::build_client(),
        }
    }

    /// Build from an optional configured API key, resolving auth in priority
    /// order. Returns `None` when no credentials are available.
    pub fn from_config(api_key: Option<&str>, model: &str) -> Option<Self> {
        let env_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .ok();

        let auth = GeminiAuth::resolve(api_key, env_key.as_deref())?;

        Some(Self {
            auth,
            model: model.to_string(),
            client: Self::build_client(),
        })
    }

    fn build_client() -> Client {
        // Generous client-level ceiling; the request gate applies its own
        // much tighter cancellable deadline around each call.
        Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("failed to build HTTP client")
    }

    /// Build a `generateContent` request body: one user turn plus a system
    /// instruction, with the generation parameters that are set.
    fn build_request_body(system: &str, user: &str, options: &GenerationOptions) -> Value {
        let mut generation_config = json!({});
        if let Some(temp) = options.temperature {
            generation_config["temperature"] = json!(temp);
        }
        if let Some(max_tokens) = options.max_output_tokens {
            generation_config["maxOutputTokens"] = json!(max_tokens);
        }
        if let Some(top_p) = options.top_p {
            generation_config["topP"] = json!(top_p);
        }
        if let Some(top_k) = options.top_k {
            generation_config["topK"] = json!(top_k);
        }

        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": user }]
            }],
            "systemInstruction": { "parts": [{ "text": system }] },
            "generationConfig": generation_config
        })
    }

    /// Extract final answer text from a Gemini API response.
    ///
    /// Gemini 2.5 thinking models return parts tagged `"thought": true`.
    /// Those are intermediate reasoning steps and must be filtered out.
    /// If no non-thought parts exist (unusual), fall back to the thought
    /// text so the caller always gets *something*.
    pub fn extract_text(response: &Value) -> Option<String> {
        let parts = response["candidates"][0]["content"]["parts"].as_array()?;

        let final_parts: Vec<&str> = parts
            .iter()
            .filter(|p| !p["thought"].as_bool().unwrap_or(false))
            .filter_map(|p| p["text"].as_str())
            .collect();

        if !final_parts.is_empty() {
            return Some(final_parts.join(""));
        }

        let thought_parts: Vec<&str> = parts.iter().filter_map(|p| p["text"].as_str()).collect();

        if !thought_parts.is_empty() {
            Some(thought_parts.join(""))
        } else {
            None
        }
    }

    /// Build the full API URL for `generateContent`.
    fn api_url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", GEMINI_API_BASE, model)
    }

    /// Attach authentication to the request builder.
    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            GeminiAuth::ApiKey(key) => request.query(&[("key", key.as_str())]),
            GeminiAuth::BearerToken(token) => {
                request.header("Authorization", format!("Bearer {}", token))
            }
        }
    }
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        options: &GenerationOptions,
    ) -> Result<String> {
        let body = Self::build_request_body(system, user, options);

        debug!(model = %self.model, "Gemini generateContent request");

        let request = self
            .client
            .post(self.api_url(&self.model))
            .header("Content-Type", "application/json")
            .json(&body);

        let request = self.apply_auth(request);

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::UpstreamTimeout(format!("Gemini request timed out: {e}"))
            } else {
                GatewayError::UpstreamUnavailable(format!("Gemini request failed: {e}"))
            }
        })?;

        if response.status().is_success() {
            let json: Value = response.json().await.map_err(|e| {
                GatewayError::UpstreamUnavailable(format!("failed to read Gemini response: {e}"))
            })?;

            return Self::extract_text(&json).ok_or_else(|| {
                GatewayError::InvalidResponseFormat("Gemini response contained no text".into())
            });
        }

        let status = response.status().as_u16();
        let error_text = response.text().await.unwrap_or_default();

        // Try to extract a useful message from the Gemini error body.
        let body_msg = serde_json::from_str::<Value>(&error_text)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(String::from))
            .unwrap_or(error_text);

        Err(provider_error(status, &body_msg))
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_resolution_prefers_explicit_key() {
        let auth = GeminiAuth::resolve(Some("explicit-key"), Some("env-key"));
        assert!(matches!(auth, Some(GeminiAuth::ApiKey(k)) if k == "explicit-key"));
    }

    #[test]
    fn test_auth_resolution_falls_back_to_env() {
        let auth = GeminiAuth::resolve(None, Some("env-key"));
        assert!(matches!(auth, Some(GeminiAuth::ApiKey(k)) if k == "env-key"));
    }

    #[test]
    fn test_auth_resolution_ignores_empty_strings() {
        let auth = GeminiAuth::resolve(Some(""), Some("env-key"));
        assert!(matches!(auth, Some(GeminiAuth::ApiKey(k)) if k == "env-key"));
    }

    #[test]
    fn test_auth_resolution_returns_none_with_no_credentials() {
        let auth = GeminiAuth::resolve(None, None);
        assert!(auth.is_none());
    }

    #[test]
    fn test_auth_debug_redacts_secrets() {
        let auth = GeminiAuth::ApiKey("super-secret".into());
        let formatted = format!("{:?}", auth);
        assert!(!formatted.contains("super-secret"));
        assert!(formatted.contains("REDACTED"));
    }

    #[test]
    fn test_build_request_body_structure() {
        let options = GenerationOptions {
            temperature: Some(0.4),
            max_output_tokens: Some(2048),
            top_p: Some(0.95),
            top_k: Some(40),
        };
        let body = GeminiProvider::build_request_body("Be concise", "Explain SPY", &options);
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Explain SPY");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be concise");
        assert_eq!(body["generationConfig"]["temperature"], 0.4);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
        assert_eq!(body["generationConfig"]["topP"], 0.95);
        assert_eq!(body["generationConfig"]["topK"], 40);
    }

    #[test]
    fn test_build_request_body_omits_unset_parameters() {
        let body =
            GeminiProvider::build_request_body("sys", "user", &GenerationOptions::default());
        let config = body["generationConfig"].as_object().unwrap();
        assert!(config.is_empty());
    }

    #[test]
    fn test_extract_thinking_model_response_skips_thought_parts() {
        let response = serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "thinking...", "thought": true },
                        { "text": "Final answer here" }
                    ]
                }
            }]
        });
        let text = GeminiProvider::extract_text(&response);
        assert_eq!(text.as_deref(), Some("Final answer here"));
    }

    #[test]
    fn test_extract_thinking_falls_back_to_thought_if_no_final() {
        let response = serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "only thought part", "thought": true }
                    ]
                }
            }]
        });
        let text = GeminiProvider::extract_text(&response);
        assert_eq!(text.as_deref(), Some("only thought part"));
    }

    #[test]
    fn test_extract_text_multiple_non_thought_parts_joined() {
        let response = serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "Part one. ", "thought": true },
                        { "text": "Part two. " },
                        { "text": "Part three." }
                    ]
                }
            }]
        });
        let text = GeminiProvider::extract_text(&response);
        assert_eq!(text.as_deref(), Some("Part two. Part three."));
    }

    #[test]
    fn test_extract_text_returns_none_for_empty_parts() {
        let response = serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": []
                }
            }]
        });
        let text = GeminiProvider::extract_text(&response);
        assert!(text.is_none());
    }

    #[test]
    fn test_api_url_format() {
        let provider = GeminiProvider::new_with_key("key", "gemini-2.0-flash");
        let url = provider.api_url("gemini-2.0-flash");
        assert!(url.contains("generativelanguage.googleapis.com"));
        assert!(url.contains("gemini-2.0-flash"));
        assert!(url.ends_with(":generateContent"));
    }

    #[test]
    fn test_provider_name_and_default_model() {
        let provider = GeminiProvider::new_with_key("key", DEFAULT_GEMINI_MODEL);
        assert_eq!(provider.name(), "gemini");
        assert_eq!(provider.default_model(), DEFAULT_GEMINI_MODEL);
    }

    #[test]
    fn test_new_with_token_uses_bearer_auth() {
        let provider = GeminiProvider::new_with_token("tok", "gemini-2.5-pro");
        assert!(matches!(provider.auth, GeminiAuth::BearerToken(_)));
        assert_eq!(provider.default_model(), "gemini-2.5-pro");
    }
}
