//! LLM synthesis of structured product records.
//!
//! A [`Synthesizer`] turns a product name, optional grounding content and
//! optional caller context into an [`EnrichedRecord`]. The shipped
//! implementation, [`OpenAiSynthesizer`], talks to any OpenAI-compatible
//! chat completions endpoint (OpenAI, Ollama, OpenRouter, ...).

mod openai;
mod prompt;

use async_trait::async_trait;

use productenrich_shared::{EnrichedRecord, ExtractedContent, SynthesisError};

pub use openai::OpenAiSynthesizer;
pub use prompt::{ChatMessage, build_messages, parse_record};

/// Produces one structured record per call.
///
/// An empty `content` slice means generative mode: the model must rely on
/// its own knowledge. Failures are reported with their class
/// ([`SynthesisError`]); malformed model output is never coerced. The
/// record's `confidence_signal` is not meaningful here; the orchestrator
/// sets it from the final mode.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        product_name: &str,
        content: &[ExtractedContent],
        context: Option<&str>,
    ) -> Result<EnrichedRecord, SynthesisError>;
}
