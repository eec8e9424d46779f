//! Shared types, error model, and configuration for the product enrichment
//! workspace.
//!
//! This crate is the foundation depended on by all other crates. It provides:
//! - [`EnrichError`] / [`SynthesisError`] — the unified error types
//! - Domain types ([`EnrichmentRequest`], [`SearchResultRef`],
//!   [`ExtractedContent`], [`EnrichedRecord`], [`EnrichmentResult`])
//! - Configuration ([`AppConfig`], [`EnrichmentConfig`], config loading)

pub mod config;
pub mod error;
pub mod text;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, EnrichmentConfig, ExtractionConfig, LlmConfig, PipelineConfig, SearchConfig,
    SearchSettings, config_dir, config_file_path, init_config, load_config, load_config_from,
    resolve_api_key,
};
pub use error::{EnrichError, Result, SynthesisError};
pub use text::truncate_chars;
pub use types::{
    ConfidenceSignal, EnrichedRecord, EnrichmentMode, EnrichmentRequest, EnrichmentResult,
    ExtractedContent, MAX_CONTEXT_CHARS, MAX_PRODUCT_NAME_CHARS, SearchProviderKind,
    SearchResultRef, SourceReference,
};
