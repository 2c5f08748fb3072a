//! Environment-driven gateway configuration.
//!
//! Every knob has a default so a bare `strikesight` start works against
//! localhost. Invalid values fall back to the default with a warning rather
//! than aborting startup; the only hard requirement is an LLM credential,
//! enforced when the provider is constructed.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::explain::RateClasses;
use crate::providers::gemini::DEFAULT_GEMINI_MODEL;
use crate::providers::GenerationOptions;
use crate::ratelimit::RateLimitPolicy;

/// Gemini model and generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// Explicit API key. `GEMINI_API_KEY` / `GOOGLE_API_KEY` are consulted
    /// when unset.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            temperature: 0.7,
            max_output_tokens: 2048,
            top_p: None,
            top_k: None,
        }
    }
}

/// Per-traffic-class rate-limit thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Per-client burst budget for the AI endpoint.
    pub ai_max: u32,
    pub ai_window_secs: u64,
    /// Per-client sustained budget for the AI endpoint.
    pub ai_hourly_max: u32,
    pub ai_hourly_window_secs: u64,
    /// Per-client budget for general (proxied) API traffic.
    pub api_max: u32,
    pub api_window_secs: u64,
    /// Process-wide budget protecting the LLM upstream.
    pub llm_global_max: u32,
    pub llm_global_window_secs: u64,
    /// Minimum spacing between opportunistic window sweeps.
    pub cleanup_interval_secs: u64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            ai_max: 10,
            ai_window_secs: 60,
            ai_hourly_max: 50,
            ai_hourly_window_secs: 3600,
            api_max: 60,
            api_window_secs: 60,
            llm_global_max: 30,
            llm_global_window_secs: 60,
            cleanup_interval_secs: 300,
        }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: String,
    pub port: u16,
    /// Shared-secret token protecting the API. `None` disables the check.
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    /// Base URL of the upstream options-analytics backend.
    pub backend_base_url: String,
    /// Directory holding prompt template files.
    pub prompt_dir: PathBuf,
    pub prompt_ttl_secs: u64,
    pub response_ttl_secs: u64,
    /// Deadline for a single LLM call.
    pub llm_timeout_secs: u64,
    pub gemini: GeminiConfig,
    pub rate: RateConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
            api_token: None,
            backend_base_url: "http://localhost:8000".to_string(),
            prompt_dir: PathBuf::from("prompts"),
            prompt_ttl_secs: 300,
            response_ttl_secs: 600,
            llm_timeout_secs: 30,
            gemini: GeminiConfig::default(),
            rate: RateConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Build configuration from the process environment, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let rate_defaults = RateConfig::default();
        let gemini_defaults = GeminiConfig::default();

        Self {
            bind: env_string("STRIKESIGHT_BIND", defaults.bind),
            port: env_parse("STRIKESIGHT_PORT", defaults.port),
            api_token: env_opt("STRIKESIGHT_API_TOKEN"),
            backend_base_url: env_string("BACKEND_BASE_URL", defaults.backend_base_url),
            prompt_dir: env_opt("PROMPT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.prompt_dir),
            prompt_ttl_secs: env_parse("PROMPT_CACHE_TTL_SECS", defaults.prompt_ttl_secs),
            response_ttl_secs: env_parse("RESPONSE_CACHE_TTL_SECS", defaults.response_ttl_secs),
            llm_timeout_secs: env_parse("LLM_TIMEOUT_SECS", defaults.llm_timeout_secs),
            gemini: GeminiConfig {
                api_key: env_opt("GEMINI_API_KEY"),
                model: env_string("GEMINI_MODEL", gemini_defaults.model),
                temperature: env_parse("GEMINI_TEMPERATURE", gemini_defaults.temperature),
                max_output_tokens: env_parse(
                    "GEMINI_MAX_OUTPUT_TOKENS",
                    gemini_defaults.max_output_tokens,
                ),
                top_p: env_opt("GEMINI_TOP_P").and_then(|v| v.parse().ok()),
                top_k: env_opt("GEMINI_TOP_K").and_then(|v| v.parse().ok()),
            },
            rate: RateConfig {
                ai_max: env_parse("RATE_AI_MAX", rate_defaults.ai_max),
                ai_window_secs: env_parse("RATE_AI_WINDOW_SECS", rate_defaults.ai_window_secs),
                ai_hourly_max: env_parse("RATE_AI_HOURLY_MAX", rate_defaults.ai_hourly_max),
                ai_hourly_window_secs: env_parse(
                    "RATE_AI_HOURLY_WINDOW_SECS",
                    rate_defaults.ai_hourly_window_secs,
                ),
                api_max: env_parse("RATE_API_MAX", rate_defaults.api_max),
                api_window_secs: env_parse("RATE_API_WINDOW_SECS", rate_defaults.api_window_secs),
                llm_global_max: env_parse("RATE_LLM_GLOBAL_MAX", rate_defaults.llm_global_max),
                llm_global_window_secs: env_parse(
                    "RATE_LLM_GLOBAL_WINDOW_SECS",
                    rate_defaults.llm_global_window_secs,
                ),
                cleanup_interval_secs: env_parse(
                    "RATE_CLEANUP_INTERVAL_SECS",
                    rate_defaults.cleanup_interval_secs,
                ),
            },
        }
    }

    /// Policies for the AI-gate traffic classes.
    pub fn rate_classes(&self) -> RateClasses {
        RateClasses {
            ai: RateLimitPolicy::new(self.rate.ai_max, self.rate.ai_window_secs),
            ai_hourly: RateLimitPolicy::new(self.rate.ai_hourly_max, self.rate.ai_hourly_window_secs),
            llm_global: RateLimitPolicy::new(
                self.rate.llm_global_max,
                self.rate.llm_global_window_secs,
            ),
        }
    }

    /// Policy for general proxied API traffic.
    pub fn api_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(self.rate.api_max, self.rate.api_window_secs)
    }

    /// Generation defaults sent with every LLM call unless a request
    /// overrides them.
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: Some(self.gemini.temperature),
            max_output_tokens: Some(self.gemini.max_output_tokens),
            top_p: self.gemini.top_p,
            top_k: self.gemini.top_k,
        }
    }
}

/// Read an env var, treating unset and empty identically.
fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_string(name: &str, default: String) -> String {
    env_opt(name).unwrap_or(default)
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    match env_opt(name) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, "unparsable value, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.bind, "127.0.0.1");
        assert_eq!(cfg.port, 8080);
        assert!(cfg.api_token.is_none());
        assert_eq!(cfg.prompt_ttl_secs, 300);
        assert_eq!(cfg.response_ttl_secs, 600);
        assert_eq!(cfg.llm_timeout_secs, 30);
        assert_eq!(cfg.rate.ai_max, 10);
        assert_eq!(cfg.rate.ai_window_secs, 60);
        assert_eq!(cfg.rate.ai_hourly_max, 50);
        assert_eq!(cfg.gemini.model, DEFAULT_GEMINI_MODEL);
    }

    #[test]
    fn test_rate_classes_reflect_config() {
        let mut cfg = GatewayConfig::default();
        cfg.rate.ai_max = 5;
        cfg.rate.ai_window_secs = 30;
        let classes = cfg.rate_classes();
        assert_eq!(classes.ai, RateLimitPolicy::new(5, 30));
        assert_eq!(classes.ai_hourly, RateLimitPolicy::new(50, 3600));
    }

    #[test]
    fn test_generation_options_carry_gemini_params() {
        let mut cfg = GatewayConfig::default();
        cfg.gemini.top_p = Some(0.9);
        cfg.gemini.top_k = Some(32);
        let opts = cfg.generation_options();
        assert_eq!(opts.temperature, Some(0.7));
        assert_eq!(opts.max_output_tokens, Some(2048));
        assert_eq!(opts.top_p, Some(0.9));
        assert_eq!(opts.top_k, Some(32));
    }

    #[test]
    fn test_deserialize_partial_json_uses_defaults() {
        let json = r#"{"port": 3000, "rate": {"ai_max": 3}}"#;
        let cfg: GatewayConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.rate.ai_max, 3);
        assert_eq!(cfg.rate.ai_window_secs, 60); // default
        assert_eq!(cfg.bind, "127.0.0.1"); // default
    }

    #[test]
    fn test_serialized_config_omits_secrets() {
        let mut cfg = GatewayConfig::default();
        cfg.api_token = Some("shh".into());
        cfg.gemini.api_key = Some("key".into());
        let dumped = serde_json::to_string(&cfg).unwrap();
        assert!(!dumped.contains("shh"));
        assert!(!dumped.contains("\"api_key\""));
    }
}
