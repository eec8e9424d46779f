//! Mode selection and grounding assembly.
//!
//! Pure functions with no I/O: which candidates to extract, which mode the
//! extraction outcome implies, and what content and provenance go forward.

use std::collections::HashSet;

use url::Url;

use productenrich_shared::{
    EnrichmentMode, ExtractedContent, SearchResultRef, SourceReference, truncate_chars,
};

/// Pick the top `max_candidates` search results to extract.
///
/// Results whose URL is not an absolute http(s) URL are dropped and
/// repeated URLs keep only their best-ranked entry. The output is ordered by
/// rank.
pub fn select_candidates(
    mut results: Vec<SearchResultRef>,
    max_candidates: usize,
) -> Vec<SearchResultRef> {
    results.sort_by_key(|r| r.rank);

    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| is_fetchable(&r.url))
        .filter(|r| seen.insert(r.url.clone()))
        .take(max_candidates)
        .collect()
}

fn is_fetchable(raw: &str) -> bool {
    Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some())
        .unwrap_or(false)
}

/// The mode an extraction outcome implies: SEARCH iff at least one attempt
/// yielded usable text.
pub fn select_mode(attempts: &[ExtractedContent]) -> EnrichmentMode {
    if attempts.iter().any(ExtractedContent::is_usable) {
        EnrichmentMode::Search
    } else {
        EnrichmentMode::Generative
    }
}

/// What synthesis is grounded on, and the matching provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Grounding {
    pub mode: EnrichmentMode,
    /// Usable content, text truncated for synthesis. Empty iff generative.
    pub content: Vec<ExtractedContent>,
    /// One entry per item of `content`, in the same (rank) order.
    pub sources: Vec<SourceReference>,
}

impl Grounding {
    /// Grounding for a request that never reached extraction.
    pub fn generative() -> Self {
        Self {
            mode: EnrichmentMode::Generative,
            content: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// Finalize the mode from settled extraction attempts.
    ///
    /// `attempts[i]` must be the attempt for `candidates[i]`.
    pub fn from_attempts(
        candidates: &[SearchResultRef],
        attempts: Vec<ExtractedContent>,
        max_content_chars: usize,
    ) -> Self {
        debug_assert_eq!(candidates.len(), attempts.len());

        if select_mode(&attempts) == EnrichmentMode::Generative {
            return Self::generative();
        }

        let (sources, content) = candidates
            .iter()
            .zip(attempts)
            .filter(|(_, attempt)| attempt.is_usable())
            .map(|(candidate, mut attempt)| {
                let truncated = truncate_chars(&attempt.text_content, max_content_chars);
                if truncated.len() < attempt.text_content.len() {
                    attempt.text_content = truncated.to_string();
                }
                (SourceReference::from(candidate), attempt)
            })
            .unzip();

        Self {
            mode: EnrichmentMode::Search,
            content,
            sources,
        }
    }
}
