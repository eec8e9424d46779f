//! DuckDuckGo provider backed by the JavaScript-free HTML endpoint.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use productenrich_shared::{
    EnrichError, Result, SearchConfig, SearchProviderKind, SearchResultRef,
};

use crate::{SearchProvider, build_client};

/// Scrapes `html.duckduckgo.com` result pages.
pub struct DuckDuckGoSearch {
    client: Client,
    endpoint: Url,
    max_results: usize,
}

impl DuckDuckGoSearch {
    /// Create a provider from the `[search]` config section.
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            EnrichError::config(format!("invalid search endpoint '{}': {e}", config.endpoint))
        })?;

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            endpoint,
            max_results: config.max_results,
        })
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    #[instrument(skip_all, fields(provider = "duckduckgo"))]
    async fn search(&self, query: &str) -> Result<Vec<SearchResultRef>> {
        debug!(query, endpoint = %self.endpoint, "requesting search results");

        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("q", query)])
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| EnrichError::Search(format!("DuckDuckGo request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnrichError::Search(format!("DuckDuckGo returned HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| EnrichError::Search(format!("DuckDuckGo body read failed: {e}")))?;

        parse_results(&body, self.max_results)
    }

    fn kind(&self) -> SearchProviderKind {
        SearchProviderKind::DuckDuckGo
    }
}

/// Parse a DuckDuckGo HTML results page.
///
/// Ads are skipped, redirect links are unwrapped, and ranks are assigned in
/// page order starting at 0. A bot-challenge page is an error rather than
/// an empty result list.
pub(crate) fn parse_results(html: &str, max_results: usize) -> Result<Vec<SearchResultRef>> {
    let doc = Html::parse_document(html);

    let challenge_sel = selector(".anomaly-modal, #challenge-form")?;
    if doc.select(&challenge_sel).next().is_some() {
        return Err(EnrichError::Search(
            "DuckDuckGo served a bot challenge instead of results".into(),
        ));
    }

    let result_sel = selector(".result:not(.result--ad)")?;
    let title_sel = selector(".result__title a, a.result__a")?;
    let snippet_sel = selector(".result__snippet")?;

    let mut results = Vec::new();

    for el in doc.select(&result_sel) {
        if results.len() >= max_results {
            break;
        }

        let Some(link) = el.select(&title_sel).next() else {
            continue;
        };
        let title = collapse_text(link.text());
        if title.is_empty() {
            continue;
        }
        let Some(url) = link.value().attr("href").and_then(unwrap_redirect) else {
            continue;
        };
        let snippet = el
            .select(&snippet_sel)
            .next()
            .map(|s| collapse_text(s.text()))
            .unwrap_or_default();

        results.push(SearchResultRef {
            url,
            title,
            snippet,
            source_provider: SearchProviderKind::DuckDuckGo,
            rank: results.len(),
        });
    }

    debug!(count = results.len(), "parsed search results");
    Ok(results)
}

/// Resolve a result link to the target URL.
///
/// DuckDuckGo wraps targets like `//duckduckgo.com/l/?uddg=https%3A%2F%2F...`;
/// the `uddg` parameter carries the real URL.
fn unwrap_redirect(href: &str) -> Option<String> {
    let full = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };

    let parsed = Url::parse(&full).ok()?;
    let is_redirect = parsed
        .host_str()
        .is_some_and(|h| h.ends_with("duckduckgo.com"))
        && parsed.path().starts_with("/l/");

    if is_redirect {
        parsed
            .query_pairs()
            .find(|(key, _)| key == "uddg")
            .map(|(_, value)| value.into_owned())
    } else {
        Some(parsed.to_string())
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| EnrichError::parse(format!("invalid selector '{css}': {e:?}")))
}

fn collapse_text<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
