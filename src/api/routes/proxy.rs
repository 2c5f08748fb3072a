//! Thin pass-through to the options-analytics backend.
//!
//! Query strings and JSON bodies are forwarded unchanged, and the upstream
//! status code and body are relayed verbatim. The gateway adds nothing but
//! rate limiting (middleware) and a 503 translation for connection errors.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::debug;

use crate::error::GatewayError;

use crate::api::server::AppState;

/// Forward the incoming request to the analytics backend.
pub async fn forward(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let target = target_url(&state.config.backend_base_url, &uri);
    debug!(%method, %target, "proxying to analytics backend");

    let method = match reqwest::Method::from_bytes(method.as_str().as_bytes()) {
        Ok(m) => m,
        Err(_) => return StatusCode::METHOD_NOT_ALLOWED.into_response(),
    };

    let mut request = state.http.request(method, target);
    if let Some(content_type) = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        request = request.header(header::CONTENT_TYPE, content_type);
    }
    if !body.is_empty() {
        request = request.body(body);
    }

    let upstream = match request.send().await {
        Ok(resp) => resp,
        Err(e) if e.is_timeout() => {
            return GatewayError::UpstreamTimeout(format!("backend proxy timed out: {e}"))
                .into_response()
        }
        Err(e) => {
            return GatewayError::UpstreamUnavailable(format!("backend proxy failed: {e}"))
                .into_response()
        }
    };

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let bytes = match upstream.bytes().await {
        Ok(b) => b,
        Err(e) => {
            return GatewayError::UpstreamUnavailable(format!("backend body read failed: {e}"))
                .into_response()
        }
    };

    let mut response = Response::builder().status(status);
    if let Some(ct) = content_type {
        response = response.header(header::CONTENT_TYPE, ct);
    }
    response
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

/// Join the backend base URL with the inbound path and query, untouched.
fn target_url(base: &str, uri: &Uri) -> String {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    format!("{}{}", base.trim_end_matches('/'), path_and_query)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn test_target_url_passes_query_through() {
        assert_eq!(
            target_url(
                "http://localhost:8000",
                &uri("/api/leaps?symbol=SPY&top_n=15")
            ),
            "http://localhost:8000/api/leaps?symbol=SPY&top_n=15"
        );
    }

    #[test]
    fn test_target_url_handles_trailing_slash_base() {
        assert_eq!(
            target_url("http://backend:8000/", &uri("/api/iron-condors")),
            "http://backend:8000/api/iron-condors"
        );
    }

    #[test]
    fn test_target_url_nested_chain_path() {
        assert_eq!(
            target_url(
                "http://backend:8000",
                &uri("/api/chain/expirations?symbol=SPY")
            ),
            "http://backend:8000/api/chain/expirations?symbol=SPY"
        );
    }
}
