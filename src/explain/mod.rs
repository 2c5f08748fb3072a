//! AI explanation pipeline: schema validation, rate-limited gating,
//! prompt resolution, LLM invocation, and output extraction.

pub mod gate;
pub mod parser;
pub mod prompts;
pub mod schema;

pub use gate::{ExplainGate, ExplainOutcome, RateClasses};
pub use prompts::PromptStore;
pub use schema::{ExplainContent, ExplainRequest, ExplainResponse};
