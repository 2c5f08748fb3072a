//! Axum API server for the gateway.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::middleware as axum_mw;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::config::GatewayConfig;
use crate::explain::{ExplainGate, PromptStore};
use crate::providers::LLMProvider;
use crate::ratelimit::RateLimiter;

/// Shared state for all API handlers.
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    /// The AI-access gate composing cache, rate limiting, prompts, and the
    /// LLM provider.
    pub gate: ExplainGate,
    /// Process-wide limiter, shared between the gate and the proxy-route
    /// middleware.
    pub limiter: Arc<RateLimiter>,
    /// Client for proxied backend calls.
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: GatewayConfig, provider: Arc<dyn LLMProvider>) -> Self {
        let config = Arc::new(config);
        let limiter = Arc::new(RateLimiter::new(config.rate.cleanup_interval_secs));
        let gate = ExplainGate::new(
            provider,
            PromptStore::new(&config.prompt_dir, config.prompt_ttl_secs),
            config.response_ttl_secs,
            limiter.clone(),
            config.rate_classes(),
            config.generation_options(),
            Duration::from_secs(config.llm_timeout_secs),
        );
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            config,
            gate,
            limiter,
            http,
        }
    }

    /// State wired to a canned LLM provider, for handler and middleware
    /// tests.
    #[cfg(test)]
    pub fn for_tests(config: GatewayConfig) -> Self {
        Self::new(config, Arc::new(tests::CannedProvider))
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: AppState) -> Router {
    // Wrap state in Arc once so it can be shared across both the middleware
    // layers and the route handlers without a double-Arc.
    let shared_state = Arc::new(state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            "x-api-key".parse().expect("valid header name"),
        ]);

    // Proxy routes are metered by the general `api` policy; the explainer
    // enforces its own traffic classes inside the gate.
    let proxy = Router::new()
        .route(
            "/api/leaps",
            get(super::routes::proxy::forward).post(super::routes::proxy::forward),
        )
        .route(
            "/api/leaps/simulate",
            get(super::routes::proxy::forward).post(super::routes::proxy::forward),
        )
        .route(
            "/api/credit-spreads",
            get(super::routes::proxy::forward).post(super::routes::proxy::forward),
        )
        .route(
            "/api/credit-spreads/simulate",
            get(super::routes::proxy::forward).post(super::routes::proxy::forward),
        )
        .route(
            "/api/iron-condors",
            get(super::routes::proxy::forward).post(super::routes::proxy::forward),
        )
        .route(
            "/api/chain/{*rest}",
            get(super::routes::proxy::forward).post(super::routes::proxy::forward),
        )
        .layer(axum_mw::from_fn_with_state(
            shared_state.clone(),
            super::middleware::api_rate_limit_middleware,
        ));

    Router::new()
        .route("/api/health", get(super::routes::health::get_health))
        .route("/api/ai-explainer", post(super::routes::explain::explain))
        .merge(proxy)
        // Body size limit: 1 MiB. Applied before the auth middleware so
        // oversized payloads are rejected cheaply before token validation.
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(axum_mw::from_fn_with_state(
            shared_state.clone(),
            super::middleware::auth_middleware,
        ))
        .with_state(shared_state)
}

/// Start the API server.
pub async fn start_server(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.bind, state.config.port);
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("strikesight gateway listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
