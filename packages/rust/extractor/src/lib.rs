//! Page fetching and content extraction for product enrichment.
//!
//! This crate provides:
//! - [`ContentExtractor`] — the per-URL extraction contract
//! - [`HttpExtractor`] — fetches pages over HTTP with an SSRF guard
//! - [`parse`] — HTML → normalized text, title, description and images

mod engine;
pub mod parse;

use async_trait::async_trait;

use productenrich_shared::ExtractedContent;

pub use engine::HttpExtractor;
pub use parse::{PageLimits, parse_page};

/// Fetches one URL and extracts its content.
///
/// Implementations must be safely callable concurrently for distinct URLs
/// and must never fail the call: any fetch or parse problem is reported as
/// an [`ExtractedContent`] with `success == false`.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> ExtractedContent;
}
