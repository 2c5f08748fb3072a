//! Request middleware: shared-secret auth and general API rate limiting.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::error::GatewayError;
use crate::ratelimit::client_identifier;

use super::server::AppState;

/// Middleware that enforces the shared-secret API token when one is
/// configured.
///
/// Skips `GET /api/health` (liveness probe). Accepts the secret either as
/// `Authorization: Bearer <token>` or an `x-api-key` header. Comparison is
/// constant-time so the token cannot be recovered byte-by-byte from
/// response timing.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // No token configured — the check is disabled.
    let Some(expected) = state.config.api_token.as_deref() else {
        return next.run(request).await;
    };

    if request.uri().path() == "/api/health" {
        return next.run(request).await;
    }

    let presented = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| {
            request
                .headers()
                .get("x-api-key")
                .and_then(|v| v.to_str().ok())
        });

    let authorized = presented
        .map(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())))
        .unwrap_or(false);

    if authorized {
        next.run(request).await
    } else {
        GatewayError::Unauthorized.into_response()
    }
}

/// Middleware metering proxied backend traffic with the general `api`
/// rate-limit policy, keyed per client.
///
/// The AI endpoint is NOT behind this layer; the explain gate enforces its
/// own, stricter traffic classes.
pub async fn api_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = client_identifier(request.headers());
    let decision = state
        .limiter
        .check(&format!("api:{client}"), &state.config.api_policy());

    if !decision.allowed {
        return GatewayError::RateLimited {
            retry_after_secs: decision.retry_after_secs(),
            limit: decision.limit,
            remaining: decision.remaining,
            reset_at_millis: decision.reset_at_millis,
        }
        .into_response();
    }

    next.run(request).await
}

// ============================================================================
// Tests
// ============================================================================
