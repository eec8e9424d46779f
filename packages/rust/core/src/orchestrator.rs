//! The enrichment pipeline: search → concurrent extraction → synthesis.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{Instrument, Span, debug, error, info, instrument, warn};
use uuid::Uuid;

use productenrich_extractor::ContentExtractor;
use productenrich_search::SearchProvider;
use productenrich_shared::{
    EnrichError, EnrichmentConfig, EnrichmentMode, EnrichmentRequest, EnrichmentResult,
    ExtractedContent, SearchResultRef, SynthesisError,
};
use productenrich_synthesis::Synthesizer;

use crate::mode::{Grounding, select_candidates};

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Pipeline stage entered by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Searching,
    Extracting { urls: usize },
    Synthesizing { mode: EnrichmentMode },
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Searching => f.write_str("Searching the web"),
            Self::Extracting { urls } => write!(f, "Extracting {urls} page(s)"),
            Self::Synthesizing { mode: EnrichmentMode::Search } => {
                f.write_str("Synthesizing from sources")
            }
            Self::Synthesizing {
                mode: EnrichmentMode::Generative,
            } => f.write_str("Synthesizing from model knowledge"),
        }
    }
}

/// Progress callback for reporting pipeline status.
pub trait EnrichProgress: Send + Sync {
    /// Called when a request enters a new stage.
    fn stage(&self, stage: Stage);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl EnrichProgress for SilentProgress {
    fn stage(&self, _stage: Stage) {}
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives one enrichment request through its stages.
///
/// Holds only immutable configuration and shared collaborator handles, so a
/// single instance serves any number of concurrent requests.
pub struct EnrichmentOrchestrator {
    config: EnrichmentConfig,
    search: Option<Arc<dyn SearchProvider>>,
    extractor: Arc<dyn ContentExtractor>,
    synthesizer: Arc<dyn Synthesizer>,
}

impl EnrichmentOrchestrator {
    /// `search` may be `None`; search also stays off when the configured
    /// provider is `none`.
    pub fn new(
        config: EnrichmentConfig,
        search: Option<Arc<dyn SearchProvider>>,
        extractor: Arc<dyn ContentExtractor>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            config,
            search,
            extractor,
            synthesizer,
        }
    }

    pub fn config(&self) -> &EnrichmentConfig {
        &self.config
    }

    /// Enrich one product. Never fails: problems are reported in the result.
    pub async fn enrich(&self, request: &EnrichmentRequest) -> EnrichmentResult {
        self.enrich_with_progress(request, &SilentProgress).await
    }

    /// [`enrich`](Self::enrich) with stage notifications.
    ///
    /// Dropping the returned future abandons the request: in-flight
    /// extraction tasks are aborted with it.
    #[instrument(
        skip_all,
        fields(request_id = %Uuid::now_v7(), product = %request.product_name)
    )]
    pub async fn enrich_with_progress(
        &self,
        request: &EnrichmentRequest,
        progress: &dyn EnrichProgress,
    ) -> EnrichmentResult {
        let start = Instant::now();

        if let Err(e) = request.validate() {
            warn!(error = %e, "rejecting request");
            return EnrichmentResult::failed(
                &request.product_name,
                EnrichmentMode::Generative,
                0,
                start.elapsed(),
                e.to_string(),
            );
        }

        // --- Search ---
        let results = match self.enabled_search() {
            Some(provider) => {
                progress.stage(Stage::Searching);
                self.run_search(provider.as_ref(), &request.search_query())
                    .await
            }
            None => {
                debug!("search disabled, using generative mode");
                Vec::new()
            }
        };
        let search_results_count = results.len();
        let candidates = select_candidates(results, self.config.search.max_candidates);

        // --- Extraction + mode finalization ---
        let grounding = if candidates.is_empty() {
            Grounding::generative()
        } else {
            progress.stage(Stage::Extracting {
                urls: candidates.len(),
            });
            let attempts = self.extract_all(&candidates).await;
            Grounding::from_attempts(&candidates, attempts, self.config.max_content_chars)
        };
        info!(
            mode = %grounding.mode,
            candidates = candidates.len(),
            sources = grounding.sources.len(),
            "mode selected"
        );

        // --- Synthesis ---
        progress.stage(Stage::Synthesizing {
            mode: grounding.mode,
        });
        let outcome = self.run_synthesis(request, &grounding.content).await;

        // --- Assembly ---
        let elapsed = start.elapsed();
        match outcome {
            Ok(mut record) => {
                record.confidence_signal = grounding.mode.confidence();
                info!(
                    mode = %grounding.mode,
                    elapsed_ms = elapsed.as_millis(),
                    "enrichment complete"
                );
                EnrichmentResult {
                    success: true,
                    product_name: request.product_name.clone(),
                    enriched_data: Some(record),
                    sources: grounding.sources,
                    mode_used: grounding.mode,
                    elapsed_duration: elapsed,
                    search_results_count,
                    error: None,
                }
            }
            Err(e) => {
                error!(
                    kind = e.kind(),
                    error = %e,
                    elapsed_ms = elapsed.as_millis(),
                    "synthesis failed"
                );
                EnrichmentResult::failed(
                    &request.product_name,
                    grounding.mode,
                    search_results_count,
                    elapsed,
                    EnrichError::from(e).to_string(),
                )
            }
        }
    }

    fn enabled_search(&self) -> Option<&Arc<dyn SearchProvider>> {
        if !self.config.search.is_enabled() {
            return None;
        }
        if self.search.is_none() {
            warn!("search enabled but no provider supplied");
        }
        self.search.as_ref()
    }

    /// Search with a deadline. Failure and timeout both degrade to no results.
    async fn run_search(&self, provider: &dyn SearchProvider, query: &str) -> Vec<SearchResultRef> {
        let timeout = self.config.search.timeout;
        match tokio::time::timeout(timeout, provider.search(query)).await {
            Ok(Ok(results)) => {
                info!(
                    provider = %provider.kind(),
                    %query,
                    results = results.len(),
                    "search complete"
                );
                results
            }
            Ok(Err(e)) => {
                warn!(
                    provider = %provider.kind(),
                    error = %e,
                    "search failed, continuing without results"
                );
                Vec::new()
            }
            Err(_) => {
                warn!(
                    provider = %provider.kind(),
                    ?timeout,
                    "search timed out, continuing without results"
                );
                Vec::new()
            }
        }
    }

    /// Extract every candidate concurrently and wait for all of them.
    ///
    /// The returned attempts line up with `candidates` by index. A timed-out
    /// or panicked extraction becomes a failed attempt for its URL.
    async fn extract_all(&self, candidates: &[SearchResultRef]) -> Vec<ExtractedContent> {
        let timeout = self.config.extract_timeout;
        let mut tasks = JoinSet::new();

        for (slot, candidate) in candidates.iter().enumerate() {
            let extractor = Arc::clone(&self.extractor);
            let url = candidate.url.clone();
            tasks.spawn(
                async move {
                    let content = match tokio::time::timeout(timeout, extractor.extract(&url)).await
                    {
                        Ok(content) => content,
                        Err(_) => {
                            warn!(%url, ?timeout, "extraction timed out");
                            ExtractedContent::failed(url)
                        }
                    };
                    (slot, content)
                }
                .instrument(Span::current()),
            );
        }

        let mut slots: Vec<Option<ExtractedContent>> = candidates.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, content)) => slots[slot] = Some(content),
                Err(e) => warn!(error = %e, "extraction task did not complete"),
            }
        }

        let attempts: Vec<ExtractedContent> = slots
            .into_iter()
            .zip(candidates)
            .map(|(slot, candidate)| {
                slot.unwrap_or_else(|| ExtractedContent::failed(candidate.url.as_str()))
            })
            .collect();

        debug!(
            attempted = attempts.len(),
            usable = attempts.iter().filter(|a| a.is_usable()).count(),
            "extraction settled"
        );
        attempts
    }

    async fn run_synthesis(
        &self,
        request: &EnrichmentRequest,
        content: &[ExtractedContent],
    ) -> Result<productenrich_shared::EnrichedRecord, SynthesisError> {
        let timeout = self.config.synthesis_timeout;
        let call = self
            .synthesizer
            .synthesize(&request.product_name, content, request.context());

        match tokio::time::timeout(timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SynthesisError::Timeout { after: timeout }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::time::Duration;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use productenrich_shared::{
        ConfidenceSignal, EnrichedRecord, Result, SearchProviderKind, SearchSettings,
    };

    // -- mocks ---------------------------------------------------------------

    type EventLog = Arc<Mutex<Vec<String>>>;

    struct MockSearch {
        outcome: std::result::Result<Vec<SearchResultRef>, String>,
        delay: Duration,
        queries: Mutex<Vec<String>>,
    }

    impl MockSearch {
        fn returning(results: Vec<SearchResultRef>) -> Self {
            Self {
                outcome: Ok(results),
                delay: Duration::ZERO,
                queries: Mutex::new(Vec::new()),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                outcome: Err(message.into()),
                ..Self::returning(Vec::new())
            }
        }

        fn calls(&self) -> usize {
            self.queries.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SearchProvider for MockSearch {
        async fn search(&self, query: &str) -> Result<Vec<SearchResultRef>> {
            self.queries.lock().unwrap().push(query.to_string());
            tokio::time::sleep(self.delay).await;
            self.outcome.clone().map_err(EnrichError::Search)
        }

        fn kind(&self) -> SearchProviderKind {
            SearchProviderKind::DuckDuckGo
        }
    }

    #[derive(Clone)]
    enum Page {
        Text(&'static str),
        Empty,
        Fail,
        Hang,
    }

    /// Records `abandoned:<url>` if a hanging extraction is dropped.
    struct AbandonGuard {
        log: EventLog,
        url: String,
    }

    impl Drop for AbandonGuard {
        fn drop(&mut self) {
            self.log.lock().unwrap().push(format!("abandoned:{}", self.url));
        }
    }

    struct MockExtractor {
        pages: HashMap<String, (Page, Duration)>,
        log: EventLog,
        calls: AtomicUsize,
    }

    impl MockExtractor {
        fn new(log: EventLog) -> Self {
            Self {
                pages: HashMap::new(),
                log,
                calls: AtomicUsize::new(0),
            }
        }

        fn page(mut self, url: &str, page: Page) -> Self {
            self.pages.insert(url.to_string(), (page, Duration::ZERO));
            self
        }

        fn slow_page(mut self, url: &str, page: Page, delay: Duration) -> Self {
            self.pages.insert(url.to_string(), (page, delay));
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContentExtractor for MockExtractor {
        async fn extract(&self, url: &str) -> ExtractedContent {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (page, delay) = self
                .pages
                .get(url)
                .cloned()
                .unwrap_or((Page::Fail, Duration::ZERO));
            tokio::time::sleep(delay).await;

            let content = match page {
                Page::Text(text) => ExtractedContent {
                    url: url.to_string(),
                    title: format!("Page {url}"),
                    text_content: text.to_string(),
                    description: None,
                    images: vec![],
                    extracted_at: Utc::now(),
                    success: true,
                },
                Page::Empty => ExtractedContent {
                    success: true,
                    ..ExtractedContent::failed(url)
                },
                Page::Fail => ExtractedContent::failed(url),
                Page::Hang => {
                    let _guard = AbandonGuard {
                        log: Arc::clone(&self.log),
                        url: url.to_string(),
                    };
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            };
            self.log.lock().unwrap().push(format!("extracted:{url}"));
            content
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct SynthesisCall {
        product_name: String,
        urls: Vec<String>,
        texts: Vec<String>,
        context: Option<String>,
    }

    struct MockSynthesizer {
        outcome: std::result::Result<EnrichedRecord, SynthesisError>,
        delay: Duration,
        log: EventLog,
        calls: Mutex<Vec<SynthesisCall>>,
    }

    impl MockSynthesizer {
        fn ok(log: EventLog) -> Self {
            Self {
                outcome: Ok(record()),
                delay: Duration::ZERO,
                log,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing(log: EventLog, error: SynthesisError) -> Self {
            Self {
                outcome: Err(error),
                ..Self::ok(log)
            }
        }

        fn calls(&self) -> Vec<SynthesisCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Synthesizer for MockSynthesizer {
        async fn synthesize(
            &self,
            product_name: &str,
            content: &[ExtractedContent],
            context: Option<&str>,
        ) -> std::result::Result<EnrichedRecord, SynthesisError> {
            self.log.lock().unwrap().push("synthesize".into());
            self.calls.lock().unwrap().push(SynthesisCall {
                product_name: product_name.to_string(),
                urls: content.iter().map(|c| c.url.clone()).collect(),
                texts: content.iter().map(|c| c.text_content.clone()).collect(),
                context: context.map(str::to_string),
            });
            tokio::time::sleep(self.delay).await;
            self.outcome.clone()
        }
    }

    // -- fixtures ------------------------------------------------------------

    fn record() -> EnrichedRecord {
        serde_json::from_value(serde_json::json!({
            "detailed_description": "The iPhone 15 Pro is Apple's 2023 flagship.",
            "features": ["A17 Pro chip", "Titanium frame"],
            "specifications": { "display": "6.1 inch" }
        }))
        .unwrap()
    }

    fn iphone() -> EnrichmentRequest {
        EnrichmentRequest::new("iPhone 15 Pro")
            .with_brand("Apple")
            .with_model("A2848")
    }

    fn hit(url: &str, rank: usize) -> SearchResultRef {
        SearchResultRef {
            url: url.into(),
            title: format!("Title {rank}"),
            snippet: String::new(),
            source_provider: SearchProviderKind::DuckDuckGo,
            rank,
        }
    }

    fn config(search_enabled: bool) -> EnrichmentConfig {
        EnrichmentConfig {
            search: SearchSettings {
                provider: search_enabled.then_some(SearchProviderKind::DuckDuckGo),
                max_candidates: 3,
                timeout: Duration::from_secs(2),
            },
            extract_timeout: Duration::from_secs(2),
            synthesis_timeout: Duration::from_secs(2),
            max_content_chars: 2_000,
        }
    }

    fn log() -> EventLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    struct Harness {
        search: Arc<MockSearch>,
        extractor: Arc<MockExtractor>,
        synthesizer: Arc<MockSynthesizer>,
        orchestrator: EnrichmentOrchestrator,
    }

    fn harness(
        config: EnrichmentConfig,
        search: MockSearch,
        extractor: MockExtractor,
        synthesizer: MockSynthesizer,
    ) -> Harness {
        let search = Arc::new(search);
        let extractor = Arc::new(extractor);
        let synthesizer = Arc::new(synthesizer);
        let orchestrator = EnrichmentOrchestrator::new(
            config,
            Some(search.clone() as Arc<dyn SearchProvider>),
            extractor.clone(),
            synthesizer.clone(),
        );
        Harness {
            search,
            extractor,
            synthesizer,
            orchestrator,
        }
    }

    fn three_hits() -> Vec<SearchResultRef> {
        vec![
            hit("https://www.apple.com/iphone-15-pro/", 0),
            hit("https://en.wikipedia.org/wiki/IPhone_15_Pro", 1),
            hit("https://www.gsmarena.com/apple_iphone_15_pro-12557.php", 2),
        ]
    }

    // -- properties ----------------------------------------------------------

    #[tokio::test]
    async fn search_disabled_is_generative_without_calling_collaborators() {
        let log = log();
        let h = harness(
            config(false),
            MockSearch::returning(three_hits()),
            MockExtractor::new(log.clone())
                .page("https://www.apple.com/iphone-15-pro/", Page::Text("specs")),
            MockSynthesizer::ok(log),
        );

        let result = h.orchestrator.enrich(&iphone()).await;

        assert!(result.success);
        assert_eq!(result.mode_used, EnrichmentMode::Generative);
        assert!(result.sources.is_empty());
        assert_eq!(result.search_results_count, 0);
        assert!(result.error.is_none());
        let data = result.enriched_data.unwrap();
        assert_eq!(data.confidence_signal, ConfidenceSignal::Generated);

        assert_eq!(h.search.calls(), 0);
        assert_eq!(h.extractor.calls(), 0);
        let calls = h.synthesizer.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].product_name, "iPhone 15 Pro");
        assert!(calls[0].urls.is_empty());
    }

    #[tokio::test]
    async fn search_enabled_without_provider_is_generative() {
        let log = log();
        let extractor = Arc::new(MockExtractor::new(log.clone()));
        let synthesizer = Arc::new(MockSynthesizer::ok(log));
        let orchestrator =
            EnrichmentOrchestrator::new(config(true), None, extractor.clone(), synthesizer);

        let result = orchestrator.enrich(&iphone()).await;
        assert!(result.success);
        assert_eq!(result.mode_used, EnrichmentMode::Generative);
        assert_eq!(extractor.calls(), 0);
    }

    #[tokio::test]
    async fn all_sources_extracted_is_search_mode() {
        let log = log();
        let h = harness(
            config(true),
            MockSearch::returning(three_hits()),
            MockExtractor::new(log.clone())
                .page("https://www.apple.com/iphone-15-pro/", Page::Text("A17 Pro chip"))
                .page("https://en.wikipedia.org/wiki/IPhone_15_Pro", Page::Text("Released 2023"))
                .page(
                    "https://www.gsmarena.com/apple_iphone_15_pro-12557.php",
                    Page::Text("187 g"),
                ),
            MockSynthesizer::ok(log),
        );

        let result = h.orchestrator.enrich(&iphone()).await;

        assert!(result.success);
        assert_eq!(result.mode_used, EnrichmentMode::Search);
        assert_eq!(result.sources.len(), 3);
        assert_eq!(result.search_results_count, 3);
        assert_eq!(
            result.enriched_data.unwrap().confidence_signal,
            ConfidenceSignal::Grounded
        );

        assert_eq!(
            h.search.queries.lock().unwrap().as_slice(),
            ["iPhone 15 Pro Apple A2848"]
        );
        assert_eq!(h.extractor.calls(), 3);
        assert_eq!(h.synthesizer.calls()[0].urls.len(), 3);
    }

    #[tokio::test]
    async fn all_extractions_failing_falls_back_to_generative() {
        let log = log();
        let h = harness(
            config(true),
            MockSearch::returning(three_hits()),
            MockExtractor::new(log.clone())
                .page("https://www.apple.com/iphone-15-pro/", Page::Fail)
                .page("https://en.wikipedia.org/wiki/IPhone_15_Pro", Page::Empty)
                .page(
                    "https://www.gsmarena.com/apple_iphone_15_pro-12557.php",
                    Page::Text("  \n  "),
                ),
            MockSynthesizer::ok(log),
        );

        let result = h.orchestrator.enrich(&iphone()).await;

        assert!(result.success);
        assert_eq!(result.mode_used, EnrichmentMode::Generative);
        assert!(result.sources.is_empty());
        assert_eq!(result.search_results_count, 3);
        assert_eq!(h.extractor.calls(), 3);

        let calls = h.synthesizer.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].urls.is_empty());
    }

    #[tokio::test]
    async fn sources_are_successful_urls_in_rank_order() {
        let log = log();
        let results = vec![
            hit("https://c.test/", 2),
            hit("https://a.test/", 0),
            hit("https://b.test/", 1),
        ];
        let h = harness(
            config(true),
            MockSearch::returning(results),
            MockExtractor::new(log.clone())
                .slow_page("https://a.test/", Page::Text("alpha"), Duration::from_millis(80))
                .page("https://b.test/", Page::Fail)
                .page("https://c.test/", Page::Text("gamma")),
            MockSynthesizer::ok(log),
        );

        let result = h.orchestrator.enrich(&iphone()).await;

        assert_eq!(result.mode_used, EnrichmentMode::Search);
        let sources: Vec<_> = result
            .sources
            .iter()
            .map(|s| (s.url.as_str(), s.title.as_str(), s.rank))
            .collect();
        assert_eq!(
            sources,
            [("https://a.test/", "Title 0", 0), ("https://c.test/", "Title 2", 2)]
        );
        assert_eq!(
            h.synthesizer.calls()[0].urls,
            ["https://a.test/", "https://c.test/"]
        );
    }

    #[tokio::test]
    async fn mode_selection_is_idempotent() {
        let log = log();
        let h = harness(
            config(true),
            MockSearch::returning(three_hits()),
            MockExtractor::new(log.clone())
                .page("https://www.apple.com/iphone-15-pro/", Page::Text("A17 Pro chip"))
                .slow_page(
                    "https://en.wikipedia.org/wiki/IPhone_15_Pro",
                    Page::Text("Released 2023"),
                    Duration::from_millis(30),
                ),
            MockSynthesizer::ok(log),
        );

        let first = h.orchestrator.enrich(&iphone()).await;
        let second = h.orchestrator.enrich(&iphone()).await;

        assert_eq!(first.mode_used, second.mode_used);
        assert_eq!(first.sources, second.sources);
        assert_eq!(first.search_results_count, second.search_results_count);
        assert_eq!(first.enriched_data, second.enriched_data);
        assert_eq!(first.sources.len(), 2);
    }

    #[tokio::test]
    async fn fan_in_waits_for_every_extraction() {
        let log = log();
        let results: Vec<_> = (0..5).map(|i| hit(&format!("https://s{i}.test/"), i)).collect();
        let cfg = EnrichmentConfig {
            search: SearchSettings {
                max_candidates: 5,
                ..config(true).search
            },
            extract_timeout: Duration::from_millis(200),
            ..config(true)
        };
        let h = harness(
            cfg,
            MockSearch::returning(results),
            MockExtractor::new(log.clone())
                .page("https://s0.test/", Page::Text("zero"))
                .slow_page("https://s1.test/", Page::Hang, Duration::ZERO)
                .slow_page("https://s2.test/", Page::Text("two"), Duration::from_millis(50))
                .slow_page("https://s3.test/", Page::Hang, Duration::ZERO)
                .slow_page("https://s4.test/", Page::Text("four"), Duration::from_millis(100)),
            MockSynthesizer::ok(log.clone()),
        );

        let start = Instant::now();
        let result = h.orchestrator.enrich(&iphone()).await;

        assert!(result.success);
        assert_eq!(result.mode_used, EnrichmentMode::Search);
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert_eq!(h.extractor.calls(), 5);

        let events = log.lock().unwrap().clone();
        let synth_at = events.iter().position(|e| e == "synthesize").unwrap();
        assert_eq!(synth_at, events.len() - 1, "synthesis must come last: {events:?}");
        for expected in [
            "extracted:https://s0.test/",
            "extracted:https://s2.test/",
            "extracted:https://s4.test/",
            "abandoned:https://s1.test/",
            "abandoned:https://s3.test/",
        ] {
            assert!(events[..synth_at].iter().any(|e| e == expected), "missing {expected}");
        }

        let urls: Vec<_> = result.sources.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, ["https://s0.test/", "https://s2.test/", "https://s4.test/"]);
    }

    #[tokio::test]
    async fn malformed_synthesis_fails_the_request() {
        let log = log();
        let h = harness(
            config(true),
            MockSearch::returning(three_hits()),
            MockExtractor::new(log.clone())
                .page("https://www.apple.com/iphone-15-pro/", Page::Text("A17 Pro chip"))
                .page("https://en.wikipedia.org/wiki/IPhone_15_Pro", Page::Text("Released 2023"))
                .page(
                    "https://www.gsmarena.com/apple_iphone_15_pro-12557.php",
                    Page::Text("187 g"),
                ),
            MockSynthesizer::failing(log, SynthesisError::MalformedOutput("invalid JSON".into())),
        );

        let result = h.orchestrator.enrich(&iphone()).await;

        assert!(!result.success);
        assert!(result.enriched_data.is_none());
        assert!(result.sources.is_empty());
        assert_eq!(result.mode_used, EnrichmentMode::Search);
        assert_eq!(result.search_results_count, 3);
        let error = result.error.unwrap();
        assert!(error.contains("malformed synthesis output"), "{error}");
    }

    #[tokio::test]
    async fn slow_synthesis_times_out() {
        let log = log();
        let mut synthesizer = MockSynthesizer::ok(log.clone());
        synthesizer.delay = Duration::from_secs(5);
        let cfg = EnrichmentConfig {
            synthesis_timeout: Duration::from_millis(100),
            ..config(false)
        };
        let h = harness(
            cfg,
            MockSearch::returning(Vec::new()),
            MockExtractor::new(log),
            synthesizer,
        );

        let result = h.orchestrator.enrich(&iphone()).await;
        assert!(!result.success);
        assert!(result.enriched_data.is_none());
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn search_failure_degrades_to_generative() {
        let log = log();
        let h = harness(
            config(true),
            MockSearch::failing("HTTP 503"),
            MockExtractor::new(log.clone()),
            MockSynthesizer::ok(log),
        );

        let result = h.orchestrator.enrich(&iphone()).await;
        assert!(result.success);
        assert_eq!(result.mode_used, EnrichmentMode::Generative);
        assert_eq!(result.search_results_count, 0);
        assert_eq!(h.search.calls(), 1);
        assert_eq!(h.extractor.calls(), 0);
    }

    #[tokio::test]
    async fn search_timeout_degrades_to_generative() {
        let log = log();
        let mut search = MockSearch::returning(three_hits());
        search.delay = Duration::from_secs(5);
        let cfg = EnrichmentConfig {
            search: SearchSettings {
                timeout: Duration::from_millis(100),
                ..config(true).search
            },
            ..config(true)
        };
        let h = harness(cfg, search, MockExtractor::new(log.clone()), MockSynthesizer::ok(log));

        let result = h.orchestrator.enrich(&iphone()).await;
        assert!(result.success);
        assert_eq!(result.mode_used, EnrichmentMode::Generative);
        assert_eq!(result.search_results_count, 0);
        assert_eq!(h.extractor.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_request_runs_no_stage() {
        let log = log();
        let h = harness(
            config(true),
            MockSearch::returning(three_hits()),
            MockExtractor::new(log.clone()),
            MockSynthesizer::ok(log),
        );

        let result = h.orchestrator.enrich(&EnrichmentRequest::new("   ")).await;

        assert!(!result.success);
        assert!(result.enriched_data.is_none());
        assert!(result.error.is_some());
        assert_eq!(h.search.calls(), 0);
        assert_eq!(h.extractor.calls(), 0);
        assert!(h.synthesizer.calls().is_empty());
    }

    #[tokio::test]
    async fn candidates_are_cleaned_and_capped() {
        let log = log();
        let results = vec![
            hit("https://a.test/", 0),
            hit("not-a-url", 1),
            hit("https://a.test/", 2),
            hit("https://b.test/", 3),
            hit("https://c.test/", 4),
            hit("https://d.test/", 5),
        ];
        let h = harness(
            config(true),
            MockSearch::returning(results),
            MockExtractor::new(log.clone())
                .page("https://a.test/", Page::Text("a"))
                .page("https://b.test/", Page::Text("b"))
                .page("https://c.test/", Page::Text("c"))
                .page("https://d.test/", Page::Text("d")),
            MockSynthesizer::ok(log),
        );

        let result = h.orchestrator.enrich(&iphone()).await;

        assert_eq!(result.search_results_count, 6);
        assert_eq!(h.extractor.calls(), 3);
        let urls: Vec<_> = result.sources.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, ["https://a.test/", "https://b.test/", "https://c.test/"]);
    }

    #[tokio::test]
    async fn synthesis_gets_truncated_text_and_context() {
        let log = log();
        let cfg = EnrichmentConfig {
            max_content_chars: 5,
            ..config(true)
        };
        let h = harness(
            cfg,
            MockSearch::returning(vec![hit("https://a.test/", 0)]),
            MockExtractor::new(log.clone()).page("https://a.test/", Page::Text("0123456789")),
            MockSynthesizer::ok(log),
        );

        let request = iphone().with_context("focus on the camera");
        let result = h.orchestrator.enrich(&request).await;
        assert!(result.success);

        let call = &h.synthesizer.calls()[0];
        assert_eq!(call.texts, ["01234"]);
        assert_eq!(call.context.as_deref(), Some("focus on the camera"));
    }

    #[tokio::test]
    async fn progress_reports_each_stage() {
        struct Recorder(Mutex<Vec<Stage>>);
        impl EnrichProgress for Recorder {
            fn stage(&self, stage: Stage) {
                self.0.lock().unwrap().push(stage);
            }
        }

        let log = log();
        let h = harness(
            config(true),
            MockSearch::returning(three_hits()),
            MockExtractor::new(log.clone())
                .page("https://www.apple.com/iphone-15-pro/", Page::Text("A17 Pro chip")),
            MockSynthesizer::ok(log),
        );
        let recorder = Recorder(Mutex::new(Vec::new()));

        h.orchestrator
            .enrich_with_progress(&iphone(), &recorder)
            .await;

        assert_eq!(
            recorder.0.lock().unwrap().as_slice(),
            [
                Stage::Searching,
                Stage::Extracting { urls: 3 },
                Stage::Synthesizing {
                    mode: EnrichmentMode::Search
                },
            ]
        );
    }

    #[tokio::test]
    async fn cancelled_request_abandons_extractions_and_skips_synthesis() {
        let log = log();
        let hits = three_hits();
        let mut extractor = MockExtractor::new(log.clone());
        for hit in &hits {
            extractor = extractor.page(&hit.url, Page::Hang);
        }
        let cfg = EnrichmentConfig {
            extract_timeout: Duration::from_secs(10),
            ..config(true)
        };
        let h = harness(
            cfg,
            MockSearch::returning(hits.clone()),
            extractor,
            MockSynthesizer::ok(log.clone()),
        );

        let outer = tokio::time::timeout(
            Duration::from_millis(200),
            h.orchestrator.enrich(&iphone()),
        )
        .await;
        assert!(outer.is_err(), "request should still be extracting");

        // Aborted tasks are dropped on their next scheduling.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let events = log.lock().unwrap().clone();
        for hit in &hits {
            let abandoned = format!("abandoned:{}", hit.url);
            assert!(events.contains(&abandoned), "missing {abandoned} in {events:?}");
        }
        assert!(!events.iter().any(|e| e == "synthesize"), "{events:?}");
        assert!(h.synthesizer.calls().is_empty());
        assert_eq!(h.extractor.calls(), 3);
    }

    #[tokio::test]
    async fn synthesis_deadline_leaves_room_for_retries() {
        use productenrich_shared::{AppConfig, LlmConfig, SearchConfig};
        use productenrich_synthesis::OpenAiSynthesizer;
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let completion = serde_json::json!({
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": r#"{"detailed_description":"A titanium smartphone."}"#
                }
            }]
        });
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion.clone())
                    .set_delay(Duration::from_secs(3)),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion))
            .mount(&server)
            .await;

        let app = AppConfig {
            search: SearchConfig {
                provider: "none".into(),
                ..SearchConfig::default()
            },
            llm: LlmConfig {
                base_url: format!("{}/v1", server.uri()),
                api_key_env: "PRODUCTENRICH_TEST_UNSET_KEY".into(),
                timeout_secs: 1,
                max_retries: 2,
                ..LlmConfig::default()
            },
            ..AppConfig::default()
        };
        let cfg = EnrichmentConfig::try_from(&app).unwrap();
        let synthesizer = OpenAiSynthesizer::new(&app.llm).unwrap();
        let orchestrator = EnrichmentOrchestrator::new(
            cfg,
            None,
            Arc::new(MockExtractor::new(log())),
            Arc::new(synthesizer),
        );

        let result = orchestrator.enrich(&iphone()).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.mode_used, EnrichmentMode::Generative);
        let record = result.enriched_data.unwrap();
        assert_eq!(record.detailed_description, "A titanium smartphone.");
        assert_eq!(record.confidence_signal, ConfidenceSignal::Generated);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }
}
