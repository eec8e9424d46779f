//! Web search providers for product enrichment.
//!
//! A [`SearchProvider`] turns a query string into ranked candidate
//! [`SearchResultRef`]s. Which concrete provider backs a request is a
//! configuration decision ([`build_provider`]); the orchestrator only sees
//! the trait.

mod duckduckgo;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use productenrich_shared::{
    EnrichError, Result, SearchConfig, SearchProviderKind, SearchResultRef,
};

pub use duckduckgo::DuckDuckGoSearch;

/// Maximum number of redirects to follow for search requests.
const MAX_REDIRECTS: usize = 3;

/// Browser-like User-Agent; the HTML endpoint rejects obvious bots.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// A pluggable web search backend.
///
/// Implementations must bound their own request time and may fail; the
/// orchestrator treats failure and an empty result list identically.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Search for `query`, returning candidates in provider order with
    /// 0-based ranks.
    async fn search(&self, query: &str) -> Result<Vec<SearchResultRef>>;

    /// Which provider this is, for logging.
    fn kind(&self) -> SearchProviderKind;
}

/// Construct the provider selected by configuration.
pub fn build_provider(
    kind: SearchProviderKind,
    config: &SearchConfig,
) -> Result<Arc<dyn SearchProvider>> {
    match kind {
        SearchProviderKind::DuckDuckGo => Ok(Arc::new(DuckDuckGoSearch::new(config)?)),
    }
}

/// Build a reqwest client with appropriate settings.
fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| EnrichError::Network(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_duckduckgo_provider() {
        let provider =
            build_provider(SearchProviderKind::DuckDuckGo, &SearchConfig::default()).unwrap();
        assert_eq!(provider.kind(), SearchProviderKind::DuckDuckGo);
    }

    #[test]
    fn provider_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn SearchProvider>();
    }
}
