//! Prompt template resolution.
//!
//! Templates live as plain text files under a configurable directory and
//! are resolved through an ordered fallback chain:
//!
//! 1. `<dir>/<page>_<context>.txt` — page-and-context specific
//! 2. `<dir>/<page>.txt` — page generic
//! 3. built-in default template
//!
//! Whichever candidate is found is cached under `"<page>:<context>"` with a
//! TTL, so edits to a template file show up within one cache period without
//! a restart. Storage failures fall through the chain; resolution itself
//! never fails.

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::cache::TtlCache;

/// Fallback template used when no file-based template resolves.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "\
You are an options-trading analytics assistant. You will receive a JSON \
payload describing what a user is currently looking at on an options \
analytics page. Explain it in plain language for a retail trader.

Respond with ONLY a JSON object, no markdown fences and no surrounding \
prose, using exactly these fields:

{
  \"summary\": \"2-3 sentence plain-language explanation of the data\",
  \"keyInsights\": [
    {\"title\": \"short label\", \"description\": \"one sentence\", \"sentiment\": \"positive|negative|neutral\"}
  ],
  \"risks\": [
    {\"risk\": \"one sentence\", \"severity\": \"low|medium|high\"}
  ],
  \"watchItems\": [
    {\"item\": \"what to monitor\", \"trigger\": \"when it matters\"}
  ],
  \"disclaimer\": \"one sentence\"
}

Be specific to the numbers in the payload. Never invent data that is not \
present. Never give direct financial advice.";

/// TTL-cached, file-backed prompt template store.
pub struct PromptStore {
    dir: PathBuf,
    cache: TtlCache<String>,
}

impl PromptStore {
    pub fn new(dir: impl Into<PathBuf>, ttl_secs: u64) -> Self {
        Self {
            dir: dir.into(),
            cache: TtlCache::new(ttl_secs),
        }
    }

    /// Resolve the template for a page/context pair. Infallible: the
    /// built-in default terminates the fallback chain.
    pub async fn load(&self, page_id: &str, context_type: &str) -> String {
        let key = format!("{page_id}:{context_type}");
        if let Some(text) = self.cache.get(&key) {
            debug!(key, "prompt template cache hit");
            return text;
        }

        let text = self.read_template(page_id, context_type).await;
        self.cache.insert(key, text.clone());
        text
    }

    async fn read_template(&self, page_id: &str, context_type: &str) -> String {
        let candidates = [
            format!("{page_id}_{context_type}.txt"),
            format!("{page_id}.txt"),
        ];

        for candidate in &candidates {
            let path = self.dir.join(candidate);
            match tokio::fs::read_to_string(&path).await {
                Ok(text) if !text.trim().is_empty() => {
                    debug!(template = %candidate, "loaded prompt template");
                    return text;
                }
                Ok(_) => {
                    warn!(template = %candidate, "prompt template is empty, falling through");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(template = %candidate, error = %e, "failed to read prompt template");
                }
            }
        }

        debug!(page_id, context_type, "using built-in default prompt template");
        DEFAULT_PROMPT_TEMPLATE.to_string()
    }
}
