//! Core domain types for product enrichment.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{EnrichError, Result};

/// Maximum accepted length of `product_name`, in characters.
pub const MAX_PRODUCT_NAME_CHARS: usize = 500;

/// Maximum accepted length of `additional_context`, in characters.
pub const MAX_CONTEXT_CHARS: usize = 1000;

// ---------------------------------------------------------------------------
// EnrichmentRequest
// ---------------------------------------------------------------------------

/// Sparse product identifiers supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentRequest {
    /// Product name (required, non-blank).
    pub product_name: String,
    /// Brand name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    /// Model number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Product category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Free-text hints forwarded to synthesis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
}

impl EnrichmentRequest {
    /// Create a request with only a product name.
    pub fn new(product_name: impl Into<String>) -> Self {
        Self {
            product_name: product_name.into(),
            brand: None,
            model: None,
            category: None,
            additional_context: None,
        }
    }

    pub fn with_brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = Some(brand.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.additional_context = Some(context.into());
        self
    }

    /// Check the request's preconditions.
    pub fn validate(&self) -> Result<()> {
        let name = self.product_name.trim();
        if name.is_empty() {
            return Err(EnrichError::validation("product_name must not be empty"));
        }
        if name.chars().count() > MAX_PRODUCT_NAME_CHARS {
            return Err(EnrichError::validation(format!(
                "product_name exceeds {MAX_PRODUCT_NAME_CHARS} characters"
            )));
        }
        if let Some(context) = &self.additional_context {
            if context.chars().count() > MAX_CONTEXT_CHARS {
                return Err(EnrichError::validation(format!(
                    "additional_context exceeds {MAX_CONTEXT_CHARS} characters"
                )));
            }
        }
        Ok(())
    }

    /// Build the web search query: product name, brand and model, each
    /// included only when non-blank, trimmed and space-joined.
    pub fn search_query(&self) -> String {
        [
            Some(self.product_name.as_str()),
            self.brand.as_deref(),
            self.model.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }

    /// Non-blank additional context, if any.
    pub fn context(&self) -> Option<&str> {
        self.additional_context
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Search backends that can produce [`SearchResultRef`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchProviderKind {
    #[serde(rename = "duckduckgo")]
    DuckDuckGo,
}

impl SearchProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuckDuckGo => "duckduckgo",
        }
    }

    /// Parse a configured provider name. `"none"` and blank names mean
    /// search is disabled and yield `Ok(None)`.
    pub fn parse_setting(name: &str) -> Result<Option<Self>> {
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case("none") {
            return Ok(None);
        }
        name.parse().map(Some)
    }
}

impl fmt::Display for SearchProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchProviderKind {
    type Err = EnrichError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "duckduckgo" | "ddg" => Ok(Self::DuckDuckGo),
            other => Err(EnrichError::config(format!(
                "unknown search provider '{other}': expected 'duckduckgo' or 'none'"
            ))),
        }
    }
}

/// A single candidate returned by a search provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultRef {
    /// Result URL (must be an absolute http(s) URL to be usable downstream).
    pub url: String,
    pub title: String,
    pub snippet: String,
    /// Which provider produced this result.
    pub source_provider: SearchProviderKind,
    /// Position in the provider's ordering, 0-based.
    pub rank: usize,
}

// ---------------------------------------------------------------------------
// ExtractedContent
// ---------------------------------------------------------------------------

/// Outcome of extracting one candidate page. Failed attempts are represented
/// too, with `success == false` and empty text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    /// The URL that was fetched (back-reference to the search result).
    pub url: String,
    pub title: String,
    /// Normalized page text; empty when nothing usable was found.
    pub text_content: String,
    /// Meta description, when the page declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Absolute product image URLs found on the page.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    pub extracted_at: DateTime<Utc>,
    pub success: bool,
}

impl ExtractedContent {
    /// A failed extraction attempt for `url`.
    pub fn failed(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            text_content: String::new(),
            description: None,
            images: Vec::new(),
            extracted_at: Utc::now(),
            success: false,
        }
    }

    /// Whether this attempt can ground synthesis: it succeeded and yielded
    /// non-blank text.
    pub fn is_usable(&self) -> bool {
        self.success && !self.text_content.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Mode / confidence
// ---------------------------------------------------------------------------

/// Operating mode of one enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrichmentMode {
    /// Output is grounded on scraped source content.
    Search,
    /// No usable sources; the model relies on its own knowledge.
    Generative,
}

impl EnrichmentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "SEARCH",
            Self::Generative => "GENERATIVE",
        }
    }

    /// The confidence signal a record produced in this mode carries.
    pub fn confidence(&self) -> ConfidenceSignal {
        match self {
            Self::Search => ConfidenceSignal::Grounded,
            Self::Generative => ConfidenceSignal::Generated,
        }
    }
}

impl fmt::Display for EnrichmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an enriched record was based on source content. Set from the
/// final [`EnrichmentMode`] by the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceSignal {
    Grounded,
    #[default]
    Generated,
}

// ---------------------------------------------------------------------------
// EnrichedRecord
// ---------------------------------------------------------------------------

/// Structured product data produced by synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub detailed_description: String,
    #[serde(default)]
    pub features: Vec<String>,
    /// Technical specifications, keyed by spec name.
    #[serde(default, deserialize_with = "deserialize_specifications")]
    pub specifications: BTreeMap<String, String>,
    #[serde(default)]
    pub benefits: Vec<String>,
    #[serde(default)]
    pub use_cases: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_range: Option<String>,
    #[serde(default)]
    pub category_hierarchy: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub seo_title: String,
    #[serde(default)]
    pub seo_description: String,
    #[serde(default)]
    pub confidence_signal: ConfidenceSignal,
}

/// Accept specification values of any JSON scalar type; objects and arrays are kept
/// as compact JSON text. `null` values are dropped.
fn deserialize_specifications<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, serde_json::Value>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                serde_json::Value::Null => return None,
                serde_json::Value::String(s) => s,
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                other => other.to_string(),
            };
            Some((key, value))
        })
        .collect())
}

// ---------------------------------------------------------------------------
// SourceReference / EnrichmentResult
// ---------------------------------------------------------------------------

/// Provenance entry for a source that contributed grounding content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReference {
    pub url: String,
    pub title: String,
    pub rank: usize,
    /// `1.0` for the top result, decreasing by `0.1` per rank, floored at 0.
    pub relevance_score: f64,
}

impl From<&SearchResultRef> for SourceReference {
    fn from(result: &SearchResultRef) -> Self {
        Self {
            url: result.url.clone(),
            title: result.title.clone(),
            rank: result.rank,
            relevance_score: (1.0 - 0.1 * result.rank as f64).max(0.0),
        }
    }
}

/// The complete answer to one enrichment request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub success: bool,
    pub product_name: String,
    /// Present iff `success`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enriched_data: Option<EnrichedRecord>,
    /// Contributing sources, ordered by search rank. Empty in generative mode.
    #[serde(default)]
    pub sources: Vec<SourceReference>,
    pub mode_used: EnrichmentMode,
    /// Wall-clock time spent on the request, serialized as seconds.
    #[serde(with = "duration_secs")]
    pub elapsed_duration: Duration,
    /// Candidates the search provider returned, before any filtering.
    pub search_results_count: usize,
    /// Present iff not `success`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EnrichmentResult {
    /// A failed result. No partial data is carried.
    pub fn failed(
        product_name: impl Into<String>,
        mode_used: EnrichmentMode,
        search_results_count: usize,
        elapsed_duration: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            product_name: product_name.into(),
            enriched_data: None,
            sources: Vec::new(),
            mode_used,
            elapsed_duration,
            search_results_count,
            error: Some(error.into()),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
