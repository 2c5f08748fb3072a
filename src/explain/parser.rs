//! LLM output extraction and validation.
//!
//! Models are instructed to return a bare JSON object, but real completions
//! arrive wrapped in markdown fences, prefixed with pleasantries, or
//! followed by trailing prose. Extraction runs in two stages:
//!
//! 1. Strip any code fences and try a direct parse.
//! 2. On failure, scan the original text for the first balanced JSON object
//!    with a linear-time depth counter that tracks string-literal state and
//!    escapes, so braces inside string values never confuse it. No regex,
//!    no backtracking.
//!
//! The parser only enforces the one hard requirement (a non-empty
//! `summary`); defaulting of optional fields is the gate's job.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{GatewayError, Result};

use super::schema::{ExplainContent, KeyInsight, RiskItem, WatchItem, DEFAULT_DISCLAIMER};

/// Explanation fields as the model emits them, before defaulting.
///
/// Accepts both camelCase (what the prompt asks for) and snake_case (what
/// models sometimes produce anyway).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedExplanation {
    pub summary: String,
    #[serde(default, alias = "key_insights")]
    pub key_insights: Option<Vec<KeyInsight>>,
    #[serde(default)]
    pub risks: Option<Vec<RiskItem>>,
    #[serde(default, alias = "watch_items")]
    pub watch_items: Option<Vec<WatchItem>>,
    #[serde(default)]
    pub disclaimer: Option<String>,
}

impl ParsedExplanation {
    /// Apply defaults: empty lists for absent collections, the standard
    /// disclaimer when the model omitted one.
    pub fn into_content(self) -> ExplainContent {
        ExplainContent {
            summary: self.summary,
            key_insights: self.key_insights.unwrap_or_default(),
            risks: self.risks.unwrap_or_default(),
            watch_items: self.watch_items.unwrap_or_default(),
            disclaimer: self
                .disclaimer
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DISCLAIMER.to_string()),
        }
    }
}

/// Turn a raw model completion into a validated [`ParsedExplanation`].
///
/// Fails with [`GatewayError::InvalidResponseFormat`] when no JSON object
/// can be recovered, or [`GatewayError::MissingRequiredField`] when the
/// recovered object lacks a non-empty `summary` string.
pub fn parse_model_output(raw: &str) -> Result<ParsedExplanation> {
    let stripped = strip_code_fences(raw);

    let value = match serde_json::from_str::<Value>(stripped) {
        Ok(v) if v.is_object() => v,
        _ => recover_object(raw)?,
    };

    match value.get("summary").and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => {}
        _ => return Err(GatewayError::MissingRequiredField("summary")),
    }

    serde_json::from_value(value)
        .map_err(|e| GatewayError::InvalidResponseFormat(format!("unexpected field shape: {e}")))
}

/// Stage 2: balanced-brace recovery over the original, unstripped text.
fn recover_object(raw: &str) -> Result<Value> {
    let candidate = extract_balanced_object(raw).ok_or_else(|| {
        GatewayError::InvalidResponseFormat("no JSON object found in model output".into())
    })?;

    match serde_json::from_str::<Value>(candidate) {
        Ok(v) if v.is_object() => Ok(v),
        Ok(_) => Err(GatewayError::InvalidResponseFormat(
            "extracted text is not a JSON object".into(),
        )),
        Err(e) => Err(GatewayError::InvalidResponseFormat(format!(
            "extracted object failed to parse: {e}"
        ))),
    }
}

/// Remove a leading ```` ```json ```` / ```` ``` ```` fence and a trailing
/// ```` ``` ```` fence, if present.
fn strip_code_fences(text: &str) -> &str {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

/// Locate the first balanced `{...}` object in `text`.
///
/// Walks forward from the first `{`, incrementing depth on `{` and
/// decrementing on `}`, but only while outside string literals. String
/// state toggles on unescaped `"`; a backslash inside a string escapes the
/// next character, so `\"` never toggles and `{`/`}` inside values never
/// count. Returns the object slice when depth first returns to zero.
fn extract_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth: u32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
