//! HTML content extraction.
//!
//! Strips page chrome (scripts, navigation, footers, ...), collects the
//! remaining text one line per text node, and picks out the title, meta
//! description and product images.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

use productenrich_shared::{ExtractedContent, truncate_chars};

/// Elements whose text never counts as page content.
const CHROME_TAGS: &[&str] = &[
    "head", "script", "style", "nav", "footer", "header", "aside", "iframe", "noscript",
    "template", "svg",
];

static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));
static H1_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1").expect("valid selector"));
static META_DESC_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"meta[name="description"], meta[property="og:description"]"#)
        .expect("valid selector")
});
static IMG_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img[src]").expect("valid selector"));

static INLINE_WS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Size limits applied while extracting a page.
#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    /// Characters of text kept.
    pub max_text_chars: usize,
    /// Image URLs kept.
    pub max_images: usize,
}

/// Extract content from an HTML document fetched from `url`.
///
/// The result is always `success == true`; an empty `text_content` means
/// the page had nothing usable.
pub fn parse_page(url: &Url, html: &str, limits: PageLimits) -> ExtractedContent {
    let doc = Html::parse_document(html);

    let text = extract_text(&doc);
    let text_content = truncate_chars(&text, limits.max_text_chars).to_string();

    ExtractedContent {
        url: url.to_string(),
        title: extract_title(&doc),
        text_content,
        description: extract_description(&doc),
        images: extract_images(&doc, url, limits.max_images),
        extracted_at: Utc::now(),
        success: true,
    }
}

/// `<title>`, falling back to the first `<h1>`.
fn extract_title(doc: &Html) -> String {
    let title = doc
        .select(&TITLE_SEL)
        .next()
        .map(|el| collapse(&el.text().collect::<String>()))
        .unwrap_or_default();

    if !title.is_empty() {
        return title;
    }

    doc.select(&H1_SEL)
        .next()
        .map(|el| collapse(&el.text().collect::<String>()))
        .unwrap_or_default()
}

fn extract_description(doc: &Html) -> Option<String> {
    // `name="description"` wins over `og:description` regardless of order.
    let mut metas: Vec<ElementRef<'_>> = doc.select(&META_DESC_SEL).collect();
    metas.sort_by_key(|el| el.value().attr("name").is_none());

    metas
        .into_iter()
        .filter_map(|el| el.value().attr("content"))
        .map(collapse)
        .find(|content| !content.is_empty())
}

/// Visible text, one trimmed line per text node, chrome removed.
fn extract_text(doc: &Html) -> String {
    let mut lines = Vec::new();

    for node in doc.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };

        let in_chrome = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| CHROME_TAGS.contains(&el.name()))
        });
        if in_chrome {
            continue;
        }

        let line = collapse(text);
        if !line.is_empty() {
            lines.push(line);
        }
    }

    lines.join("\n")
}

/// Absolute http(s) image URLs, excluding logos and icons.
fn extract_images(doc: &Html, base: &Url, max_images: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut images = Vec::new();

    for el in doc.select(&IMG_SEL) {
        if images.len() >= max_images {
            break;
        }
        let Some(src) = el.value().attr("src") else {
            continue;
        };
        let Ok(resolved) = base.join(src.trim()) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }

        let resolved = resolved.to_string();
        let lower = resolved.to_lowercase();
        if lower.contains("logo") || lower.contains("icon") {
            continue;
        }
        if seen.insert(resolved.clone()) {
            images.push(resolved);
        }
    }

    images
}

fn collapse(s: &str) -> String {
    INLINE_WS.replace_all(s.trim(), " ").into_owned()
}
