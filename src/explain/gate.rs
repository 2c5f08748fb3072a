//! The AI-access gate: validation → rate limiting → cache → LLM → parse.
//!
//! Composes the TTL caches, the rate limiter, the prompt store, and the
//! LLM provider for the explanation endpoint. Rejections happen before any
//! upstream call; nothing is cached on any failure path.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::error::{GatewayError, Result};
use crate::providers::{GenerationOptions, LLMProvider};
use crate::ratelimit::{RateLimitDecision, RateLimitPolicy, RateLimiter, LLM_GLOBAL_IDENTIFIER};

use super::parser;
use super::prompts::PromptStore;
use super::schema::{ExplainContent, ExplainRequest, ExplainSettings};

/// Rate-limit policies for the traffic classes the gate enforces.
#[derive(Debug, Clone, Copy)]
pub struct RateClasses {
    /// Per-client burst budget.
    pub ai: RateLimitPolicy,
    /// Per-client sustained budget.
    pub ai_hourly: RateLimitPolicy,
    /// Process-wide budget protecting the LLM upstream.
    pub llm_global: RateLimitPolicy,
}

/// Result of a handled explanation request.
#[derive(Debug, Clone)]
pub struct ExplainOutcome {
    pub content: ExplainContent,
    pub cached: bool,
}

pub struct ExplainGate {
    provider: Arc<dyn LLMProvider>,
    prompts: PromptStore,
    responses: TtlCache<ExplainContent>,
    limiter: Arc<RateLimiter>,
    classes: RateClasses,
    defaults: GenerationOptions,
    llm_timeout: Duration,
}

impl ExplainGate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        prompts: PromptStore,
        response_ttl_secs: u64,
        limiter: Arc<RateLimiter>,
        classes: RateClasses,
        defaults: GenerationOptions,
        llm_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            prompts,
            responses: TtlCache::new(response_ttl_secs),
            limiter,
            classes,
            defaults,
            llm_timeout,
        }
    }

    /// Deterministic digest of the request-identifying fields, used as the
    /// response-cache key.
    ///
    /// Length-prefixed encoding prevents separator collisions (e.g.
    /// `page="a_b"` vs `page="a", context="b"`). Metadata is serialized
    /// through `serde_json::Value`, whose object map is ordered, so two
    /// payloads with the same keys in different arrival order fingerprint
    /// identically.
    pub fn fingerprint(page_id: &str, context_type: &str, metadata: &Value) -> String {
        let metadata_json = metadata.to_string();
        let mut hasher = Sha256::new();
        for part in [page_id, context_type, metadata_json.as_str()] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        use std::fmt::Write as _;
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(out, "{:02x}", byte);
        }
        out
    }

    /// Handle one explanation request for `client_id`.
    pub async fn handle(
        &self,
        request: &ExplainRequest,
        client_id: &str,
    ) -> Result<ExplainOutcome> {
        request.validate().map_err(GatewayError::Validation)?;

        self.enforce_rate_limits(client_id)?;

        let fingerprint =
            Self::fingerprint(&request.page_id, &request.context_type, &request.metadata);

        if let Some(content) = self.responses.get(&fingerprint) {
            debug!(
                page_id = %request.page_id,
                context_type = %request.context_type,
                "serving explanation from cache"
            );
            return Ok(ExplainOutcome {
                content,
                cached: true,
            });
        }

        let template = self
            .prompts
            .load(&request.page_id, &request.context_type)
            .await;
        let user_prompt = compose_user_prompt(request);
        let options = merge_options(self.defaults, request.settings.as_ref());

        let raw = match tokio::time::timeout(
            self.llm_timeout,
            self.provider.complete(&template, &user_prompt, &options),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(GatewayError::UpstreamTimeout(format!(
                    "{} call exceeded {}s",
                    self.provider.name(),
                    self.llm_timeout.as_secs()
                )))
            }
        };

        let content = parser::parse_model_output(&raw)?.into_content();

        self.responses.insert(fingerprint, content.clone());

        Ok(ExplainOutcome {
            content,
            cached: false,
        })
    }

    /// Check every traffic class; the first rejection wins. Identifiers are
    /// namespaced per class so windows of different lengths never share a
    /// counter.
    fn enforce_rate_limits(&self, client_id: &str) -> Result<()> {
        let checks = [
            ("ai", format!("ai:{client_id}"), self.classes.ai),
            (
                "ai_hourly",
                format!("ai-hourly:{client_id}"),
                self.classes.ai_hourly,
            ),
            (
                "llm_global",
                LLM_GLOBAL_IDENTIFIER.to_string(),
                self.classes.llm_global,
            ),
        ];

        for (class, identifier, policy) in checks {
            let decision = self.limiter.check(&identifier, &policy);
            if !decision.allowed {
                warn!(class, client_id, "explanation request rate limited");
                return Err(rate_limited(decision));
            }
        }
        Ok(())
    }

    /// Number of cached responses. Exposed for operational visibility.
    pub fn cached_responses(&self) -> usize {
        self.responses.len()
    }
}

fn rate_limited(decision: RateLimitDecision) -> GatewayError {
    GatewayError::RateLimited {
        retry_after_secs: decision.retry_after_secs(),
        limit: decision.limit,
        remaining: decision.remaining,
        reset_at_millis: decision.reset_at_millis,
    }
}

/// Serialize the request into the single user turn sent to the model.
fn compose_user_prompt(request: &ExplainRequest) -> String {
    let metadata_json = serde_json::to_string_pretty(&request.metadata)
        .unwrap_or_else(|_| request.metadata.to_string());
    format!(
        "Page: {}\nContext: {}\nPage data:\n{}",
        request.page_id, request.context_type, metadata_json
    )
}

/// Per-request settings override the configured defaults where present.
fn merge_options(defaults: GenerationOptions, settings: Option<&ExplainSettings>) -> GenerationOptions {
    let Some(settings) = settings else {
        return defaults;
    };
    GenerationOptions {
        temperature: settings.temperature.or(defaults.temperature),
        max_output_tokens: settings.max_output_tokens.or(defaults.max_output_tokens),
        ..defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const GOOD_COMPLETION: &str = r#"{"summary": "The spread risks 3.75 to make 1.25."}"#;

    /// Test double that returns a canned completion and counts calls.
    struct StaticProvider {
        response: String,
        calls: AtomicUsize,
    }

    impl StaticProvider {
        fn new(response: &str) -> Arc<Self> {
            Arc::new(Self {
                response: response.to_string(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LLMProvider for StaticProvider {
        async fn complete(
            &self,
            _system: &str,
            _user: &str,
            _options: &GenerationOptions,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }

        fn default_model(&self) -> &str {
            "static"
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    /// Test double that never completes within any reasonable deadline.
    struct SlowProvider;

    #[async_trait]
    impl LLMProvider for SlowProvider {
        async fn complete(
            &self,
            _system: &str,
            _user: &str,
            _options: &GenerationOptions,
        ) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }

        fn default_model(&self) -> &str {
            "slow"
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn relaxed_classes() -> RateClasses {
        RateClasses {
            ai: RateLimitPolicy::new(100, 60),
            ai_hourly: RateLimitPolicy::new(1000, 3600),
            llm_global: RateLimitPolicy::new(1000, 60),
        }
    }

    fn gate_with(provider: Arc<dyn LLMProvider>, classes: RateClasses) -> ExplainGate {
        ExplainGate::new(
            provider,
            PromptStore::new("/nonexistent/prompts", 300),
            600,
            Arc::new(RateLimiter::new(300)),
            classes,
            GenerationOptions::default(),
            Duration::from_secs(30),
        )
    }

    fn valid_request() -> ExplainRequest {
        serde_json::from_value(json!({
            "pageId": "credit_spreads",
            "contextType": "screener_results",
            "metadata": { "symbol": "SPY", "credit": 1.25, "max_loss": 3.75 },
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_happy_path_returns_parsed_content() {
        let provider = StaticProvider::new(GOOD_COMPLETION);
        let gate = gate_with(provider.clone(), relaxed_classes());

        let outcome = gate.handle(&valid_request(), "1.2.3.4").await.unwrap();
        assert!(!outcome.cached);
        assert_eq!(
            outcome.content.summary,
            "The spread risks 3.75 to make 1.25."
        );
        assert!(outcome.content.key_insights.is_empty());
        assert!(!outcome.content.disclaimer.is_empty());
    }

    #[tokio::test]
    async fn test_second_identical_request_served_from_cache() {
        let provider = StaticProvider::new(GOOD_COMPLETION);
        let gate = gate_with(provider.clone(), relaxed_classes());

        let first = gate.handle(&valid_request(), "1.2.3.4").await.unwrap();
        let second = gate.handle(&valid_request(), "1.2.3.4").await.unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.content, second.content);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_metadata_misses_cache() {
        let provider = StaticProvider::new(GOOD_COMPLETION);
        let gate = gate_with(provider.clone(), relaxed_classes());

        gate.handle(&valid_request(), "1.2.3.4").await.unwrap();

        let mut other = valid_request();
        other.metadata = json!({ "symbol": "QQQ" });
        gate.handle(&other, "1.2.3.4").await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_validation_failure_lists_every_field() {
        let gate = gate_with(StaticProvider::new(GOOD_COMPLETION), relaxed_classes());
        let bad: ExplainRequest = serde_json::from_value(json!({
            "pageId": "bogus",
            "contextType": "also_bogus",
            "metadata": {},
        }))
        .unwrap();

        let err = gate.handle(&bad, "1.2.3.4").await.unwrap_err();
        match err {
            GatewayError::Validation(fields) => {
                assert_eq!(fields.len(), 2);
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_rejection_carries_retry_hint() {
        let provider = StaticProvider::new(GOOD_COMPLETION);
        let mut classes = relaxed_classes();
        classes.ai = RateLimitPolicy::new(2, 60);
        let gate = gate_with(provider.clone(), classes);

        // Distinct metadata per call so the cache never short-circuits the
        // limiter.
        for i in 0..2 {
            let mut req = valid_request();
            req.metadata = json!({ "call": i });
            gate.handle(&req, "9.9.9.9").await.unwrap();
        }

        let mut req = valid_request();
        req.metadata = json!({ "call": 2 });
        let err = gate.handle(&req, "9.9.9.9").await.unwrap_err();
        match err {
            GatewayError::RateLimited {
                limit, remaining, ..
            } => {
                assert_eq!(limit, 2);
                assert_eq!(remaining, 0);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rate_limited_clients_are_independent() {
        let provider = StaticProvider::new(GOOD_COMPLETION);
        let mut classes = relaxed_classes();
        classes.ai = RateLimitPolicy::new(1, 60);
        let gate = gate_with(provider, classes);

        let mut a = valid_request();
        a.metadata = json!({ "n": 1 });
        gate.handle(&a, "1.1.1.1").await.unwrap();

        let mut b = valid_request();
        b.metadata = json!({ "n": 2 });
        assert!(gate.handle(&b, "2.2.2.2").await.is_ok());
    }

    #[tokio::test]
    async fn test_global_class_shared_across_clients() {
        let provider = StaticProvider::new(GOOD_COMPLETION);
        let mut classes = relaxed_classes();
        classes.llm_global = RateLimitPolicy::new(1, 60);
        let gate = gate_with(provider, classes);

        let mut a = valid_request();
        a.metadata = json!({ "n": 1 });
        gate.handle(&a, "1.1.1.1").await.unwrap();

        let mut b = valid_request();
        b.metadata = json!({ "n": 2 });
        let err = gate.handle(&b, "2.2.2.2").await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_unparsable_output_fails_and_is_not_cached() {
        let gate = gate_with(
            StaticProvider::new("I'd be happy to help, but..."),
            relaxed_classes(),
        );

        let err = gate.handle(&valid_request(), "1.2.3.4").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidResponseFormat(_)));
        assert_eq!(gate.cached_responses(), 0);
    }

    #[tokio::test]
    async fn test_missing_summary_fails_and_is_not_cached() {
        let gate = gate_with(
            StaticProvider::new(r#"{"keyInsights": []}"#),
            relaxed_classes(),
        );

        let err = gate.handle(&valid_request(), "1.2.3.4").await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingRequiredField("summary")));
        assert_eq!(gate.cached_responses(), 0);
    }

    #[tokio::test]
    async fn test_llm_timeout_is_distinct_and_not_cached() {
        let gate = ExplainGate::new(
            Arc::new(SlowProvider),
            PromptStore::new("/nonexistent/prompts", 300),
            600,
            Arc::new(RateLimiter::new(300)),
            relaxed_classes(),
            GenerationOptions::default(),
            // Tight real deadline so the test completes quickly; the slow
            // provider sleeps far past it.
            Duration::from_millis(50),
        );

        let err = gate.handle(&valid_request(), "1.2.3.4").await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamTimeout(_)));
        assert_eq!(gate.cached_responses(), 0);
    }

    #[test]
    fn test_fingerprint_deterministic_and_field_aware() {
        let meta = json!({ "symbol": "SPY" });
        let a = ExplainGate::fingerprint("leaps_ranker", "roi_simulator", &meta);
        let b = ExplainGate::fingerprint("leaps_ranker", "roi_simulator", &meta);
        assert_eq!(a, b);

        let c = ExplainGate::fingerprint("leaps_ranker", "screener_results", &meta);
        assert_ne!(a, c);

        let d = ExplainGate::fingerprint("leaps_ranker", "roi_simulator", &json!({ "symbol": "QQQ" }));
        assert_ne!(a, d);
    }

    #[test]
    fn test_fingerprint_no_separator_collision() {
        let meta = json!({});
        let a = ExplainGate::fingerprint("leaps_ranker", "roi", &meta);
        let b = ExplainGate::fingerprint("leaps_ranker_roi", "", &meta);
        assert_ne!(
            a, b,
            "length-prefixed encoding must prevent separator collisions"
        );
    }

    #[test]
    fn test_merge_options_overrides_defaults() {
        let defaults = GenerationOptions {
            temperature: Some(0.7),
            max_output_tokens: Some(2048),
            top_p: Some(0.95),
            top_k: Some(40),
        };
        let settings = ExplainSettings {
            temperature: Some(0.2),
            max_output_tokens: None,
        };
        let merged = merge_options(defaults, Some(&settings));
        assert_eq!(merged.temperature, Some(0.2));
        assert_eq!(merged.max_output_tokens, Some(2048));
        assert_eq!(merged.top_p, Some(0.95));
        assert_eq!(merged.top_k, Some(40));
    }

    #[test]
    fn test_compose_user_prompt_embeds_metadata() {
        let prompt = compose_user_prompt(&valid_request());
        assert!(prompt.contains("Page: credit_spreads"));
        assert!(prompt.contains("Context: screener_results"));
        assert!(prompt.contains("\"symbol\": \"SPY\""));
    }
}
