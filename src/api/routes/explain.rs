//! AI explainer endpoint.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::{SecondsFormat, Utc};
use std::sync::Arc;
use tracing::info;

use crate::error::Result;
use crate::explain::{ExplainRequest, ExplainResponse};
use crate::ratelimit::client_identifier;

use crate::api::server::AppState;

/// POST /api/ai-explainer — generate (or serve a cached) explanation for a
/// page context.
pub async fn explain(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ExplainRequest>,
) -> Result<Json<ExplainResponse>> {
    let client_id = client_identifier(&headers);
    let outcome = state.gate.handle(&request, &client_id).await?;

    info!(
        page_id = %request.page_id,
        context_type = %request.context_type,
        cached = outcome.cached,
        "served explanation"
    );

    Ok(Json(ExplainResponse {
        success: true,
        page_id: request.page_id,
        context_type: request.context_type,
        content: outcome.content,
        cached: outcome.cached,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}
