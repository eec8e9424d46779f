use std::sync::Arc;

use tracing::info;

use productenrich_extractor::HttpExtractor;
use productenrich_search::build_provider;
use productenrich_shared::{AppConfig, EnrichmentConfig, Result};
use productenrich_synthesis::OpenAiSynthesizer;

use crate::EnrichmentOrchestrator;

/// Build an orchestrator backed by the real HTTP collaborators.
///
/// Fails on invalid configuration (unknown provider, zero limits) or when an
/// HTTP client cannot be constructed.
pub fn build_orchestrator(config: &AppConfig) -> Result<EnrichmentOrchestrator> {
    let settings = EnrichmentConfig::try_from(config)?;

    let search = settings
        .search
        .provider
        .map(|kind| build_provider(kind, &config.search))
        .transpose()?;
    let extractor = Arc::new(HttpExtractor::new(&config.extraction)?);
    let synthesizer = Arc::new(OpenAiSynthesizer::new(&config.llm)?);

    info!(
        search = settings.search.provider.map(|k| k.as_str()).unwrap_or("none"),
        model = %config.llm.model,
        base_url = %config.llm.base_url,
        "orchestrator ready"
    );

    Ok(EnrichmentOrchestrator::new(
        settings,
        search,
        extractor,
        synthesizer,
    ))
}
