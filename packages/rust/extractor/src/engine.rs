//! HTTP page extractor.
//!
//! Fetches a candidate URL, refuses SSRF targets and non-HTML responses,
//! and hands the body to [`parse_page`]. Every failure is folded into an
//! unsuccessful [`ExtractedContent`].

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument, warn};
use url::Url;

use productenrich_shared::{EnrichError, ExtractedContent, ExtractionConfig, Result};

use crate::ContentExtractor;
use crate::parse::{PageLimits, parse_page};

/// Maximum number of redirects to follow per page.
const MAX_REDIRECTS: usize = 5;

/// Maximum response size we are willing to parse (10 MB).
const MAX_RESPONSE_SIZE: u64 = 10 * 1024 * 1024;

// ---------------------------------------------------------------------------
// HttpExtractor
// ---------------------------------------------------------------------------

/// Extracts product page content over HTTP.
pub struct HttpExtractor {
    client: Client,
    limits: PageLimits,
    /// Skip the SSRF guard so tests can target a local mock server.
    allow_localhost: bool,
}

impl HttpExtractor {
    /// Create an extractor from the `[extraction]` config section.
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| EnrichError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            limits: PageLimits {
                max_text_chars: config.max_text_chars,
                max_images: config.max_images,
            },
            allow_localhost: false,
        })
    }

    /// Disable the SSRF guard.
    #[cfg(test)]
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    /// Fetch and parse a single page.
    async fn fetch(&self, raw_url: &str) -> Result<ExtractedContent> {
        let url = Url::parse(raw_url)
            .map_err(|e| EnrichError::extraction(raw_url, format!("invalid URL: {e}")))?;

        if !self.allow_localhost && is_ssrf_target(&url) {
            return Err(EnrichError::extraction(raw_url, "blocked by SSRF protection"));
        }

        let mut response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| EnrichError::extraction(raw_url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnrichError::extraction(raw_url, format!("HTTP {status}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase);
        if let Some(ct) = &content_type {
            if !is_html(ct) {
                return Err(EnrichError::extraction(
                    raw_url,
                    format!("non-HTML content type '{ct}'"),
                ));
            }
        }

        if let Some(len) = response.content_length() {
            if len > MAX_RESPONSE_SIZE {
                return Err(EnrichError::extraction(
                    raw_url,
                    format!("response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"),
                ));
            }
        }

        // Redirects may have moved us; report the final location.
        let final_url = response.url().clone();

        // Chunked bodies carry no Content-Length, so the cap is enforced as we read.
        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| EnrichError::extraction(raw_url, format!("body read failed: {e}")))?
        {
            if (bytes.len() + chunk.len()) as u64 > MAX_RESPONSE_SIZE {
                return Err(EnrichError::extraction(
                    raw_url,
                    format!("response too large (over {MAX_RESPONSE_SIZE} bytes)"),
                ));
            }
            bytes.extend_from_slice(&chunk);
        }
        let body = String::from_utf8_lossy(&bytes);

        let mut content = parse_page(&final_url, &body, self.limits);
        content.url = raw_url.to_string();
        Ok(content)
    }
}

#[async_trait]
impl ContentExtractor for HttpExtractor {
    #[instrument(skip_all, fields(url = %url))]
    async fn extract(&self, url: &str) -> ExtractedContent {
        match self.fetch(url).await {
            Ok(content) => {
                debug!(
                    chars = content.text_content.len(),
                    images = content.images.len(),
                    "page extracted"
                );
                content
            }
            Err(e) => {
                warn!(error = %e, "page extraction failed");
                ExtractedContent::failed(url)
            }
        }
    }
}

fn is_html(content_type: &str) -> bool {
    content_type.contains("text/html") || content_type.contains("application/xhtml+xml")
}

// ---------------------------------------------------------------------------
// Target guard
// ---------------------------------------------------------------------------

/// Whether fetching `url` could reach something other than a public web host.
fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost"
                || host.ends_with(".localhost")
                || host.ends_with(".local")
                || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Loopback, private, link-local and other non-routable ranges.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24, IETF protocol assignments
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 (unique local)
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                // fe80::/10 (link local)
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}
