//! Request and response models for the AI explainer endpoint.
//!
//! The inbound body is deserialized leniently and then validated in one
//! pass that collects EVERY failing field path, so a client fixing a bad
//! request sees all of its problems at once instead of one per round trip.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FieldError;

/// Closed set of pages the explainer knows how to talk about.
pub const PAGE_IDS: &[&str] = &[
    "leaps_ranker",
    "credit_spreads",
    "iron_condors",
    "chain_analysis",
];

/// Closed set of page contexts an explanation can be anchored to.
pub const CONTEXT_TYPES: &[&str] = &[
    "roi_simulator",
    "screener_results",
    "spread_simulator",
    "chain_overview",
];

/// Disclaimer appended when the model omits one.
pub const DEFAULT_DISCLAIMER: &str =
    "This is AI-generated educational content, not financial advice. \
     Options trading involves substantial risk of loss.";

/// Ticker symbols: 1-5 uppercase letters, nothing else.
static SYMBOL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{1,5}$").expect("valid regex"));

const MIN_TEMPERATURE: f32 = 0.0;
const MAX_TEMPERATURE: f32 = 2.0;
const MAX_OUTPUT_TOKENS_LIMIT: u32 = 8192;

/// Optional per-request generation overrides.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExplainSettings {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

/// Inbound explanation request.
///
/// Fields default rather than hard-failing deserialization so that
/// [`ExplainRequest::validate`] can report every problem together.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainRequest {
    #[serde(default)]
    pub page_id: String,
    #[serde(default)]
    pub context_type: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<ExplainSettings>,
}

impl ExplainRequest {
    /// Validate the request shape, collecting every failing field path.
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        if !PAGE_IDS.contains(&self.page_id.as_str()) {
            errors.push(FieldError::new(
                "pageId",
                format!("must be one of: {}", PAGE_IDS.join(", ")),
            ));
        }

        if !CONTEXT_TYPES.contains(&self.context_type.as_str()) {
            errors.push(FieldError::new(
                "contextType",
                format!("must be one of: {}", CONTEXT_TYPES.join(", ")),
            ));
        }

        match &self.metadata {
            Value::Object(map) => {
                if let Some(symbol) = map.get("symbol") {
                    match symbol.as_str() {
                        Some(s) if SYMBOL_RE.is_match(s) => {}
                        _ => errors.push(FieldError::new(
                            "metadata.symbol",
                            "must be 1-5 uppercase letters (A-Z)",
                        )),
                    }
                }
            }
            _ => errors.push(FieldError::new("metadata", "must be a JSON object")),
        }

        if let Some(ts) = &self.timestamp {
            if chrono::DateTime::parse_from_rfc3339(ts).is_err() {
                errors.push(FieldError::new(
                    "timestamp",
                    "must be an RFC 3339 timestamp",
                ));
            }
        }

        if let Some(settings) = &self.settings {
            if let Some(t) = settings.temperature {
                if !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&t) {
                    errors.push(FieldError::new(
                        "settings.temperature",
                        format!("must be between {MIN_TEMPERATURE} and {MAX_TEMPERATURE}"),
                    ));
                }
            }
            if let Some(m) = settings.max_output_tokens {
                if m == 0 || m > MAX_OUTPUT_TOKENS_LIMIT {
                    errors.push(FieldError::new(
                        "settings.maxOutputTokens",
                        format!("must be between 1 and {MAX_OUTPUT_TOKENS_LIMIT}"),
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Sentiment of a key insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

/// Severity of an identified risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// One notable observation about the analyzed page data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyInsight {
    pub title: String,
    pub description: String,
    pub sentiment: Sentiment,
}

/// One risk the reader should weigh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskItem {
    pub risk: String,
    pub severity: Severity,
}

/// Something to monitor after entering a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchItem {
    pub item: String,
    pub trigger: String,
}

/// Structured explanation returned to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainContent {
    pub summary: String,
    pub key_insights: Vec<KeyInsight>,
    pub risks: Vec<RiskItem>,
    pub watch_items: Vec<WatchItem>,
    pub disclaimer: String,
}

/// Success envelope for `POST /api/ai-explainer`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainResponse {
    pub success: bool,
    pub page_id: String,
    pub context_type: String,
    pub content: ExplainContent,
    pub cached: bool,
    pub timestamp: String,
}
