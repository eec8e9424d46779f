//! Prompt assembly and response parsing.

use serde::{Deserialize, Serialize};

use productenrich_shared::{EnrichedRecord, ExtractedContent, SynthesisError};

/// Shape the model is asked to fill in.
const OUTPUT_SCHEMA: &str = r#"{
  "detailed_description": "string",
  "features": ["string"],
  "specifications": {"name": "value"},
  "benefits": ["string"],
  "use_cases": ["string"],
  "images": ["absolute image URL"],
  "price_range": "string or null",
  "category_hierarchy": ["top level", "sub category"],
  "tags": ["string"],
  "seo_title": "string",
  "seo_description": "string"
}"#;

const GROUNDED_SYSTEM: &str = "You write product catalogue data. Use only facts stated in the \
supplied sources; leave a field empty or null when the sources do not cover it. Reply with a \
single JSON object and nothing else.";

const GENERATIVE_SYSTEM: &str = "You write product catalogue data from your own knowledge. Be \
factual; if the product is unknown to you, describe it conservatively and say so in the \
description. Reply with a single JSON object and nothing else.";

/// One chat message in OpenAI wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Build the system and user messages for one synthesis call.
///
/// Sources are numbered in the order given; their text is used as-is, so
/// callers truncate beforehand.
pub fn build_messages(
    product_name: &str,
    content: &[ExtractedContent],
    context: Option<&str>,
) -> Vec<ChatMessage> {
    let grounded = !content.is_empty();

    let mut user = format!("Product name: {product_name}\n");
    user.push_str(&format!("Additional context: {}\n\n", context.unwrap_or("none")));

    if grounded {
        user.push_str("Sources:\n");
        for (i, source) in content.iter().enumerate() {
            user.push_str(&format!("\n[Source {}] {}\n", i + 1, source.url));
            if !source.title.is_empty() {
                user.push_str(&format!("Title: {}\n", source.title));
            }
            if let Some(description) = &source.description {
                user.push_str(&format!("Description: {description}\n"));
            }
            user.push_str(&format!("Content:\n{}\n", source.text_content));
        }
    } else {
        user.push_str("Sources: none available. Use your own knowledge of the product.\n");
    }

    user.push_str(&format!("\nRespond with JSON of this shape:\n{OUTPUT_SCHEMA}\n"));

    let system = if grounded {
        GROUNDED_SYSTEM
    } else {
        GENERATIVE_SYSTEM
    };

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// Parse model output into a record.
///
/// Accepts a bare JSON object, optionally wrapped in a Markdown code fence.
/// Empty output, invalid JSON, a non-object, or a blank
/// `detailed_description` are all [`SynthesisError::MalformedOutput`].
/// `confidence_signal` is left for the caller to set.
pub fn parse_record(raw: &str) -> Result<EnrichedRecord, SynthesisError> {
    let body = strip_code_fence(raw.trim());
    if body.is_empty() {
        return Err(SynthesisError::MalformedOutput("empty response from model".into()));
    }

    let record: EnrichedRecord = serde_json::from_str(body)
        .map_err(|e| SynthesisError::MalformedOutput(format!("invalid JSON: {e}")))?;

    if record.detailed_description.trim().is_empty() {
        return Err(SynthesisError::MalformedOutput(
            "detailed_description is empty".into(),
        ));
    }

    Ok(record)
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Drop an optional language tag on the opening fence line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn source(url: &str, text: &str) -> ExtractedContent {
        ExtractedContent {
            url: url.into(),
            title: "Apple iPhone 15 Pro".into(),
            text_content: text.into(),
            description: Some("Titanium.".into()),
            images: vec![],
            extracted_at: Utc::now(),
            success: true,
        }
    }

    #[test]
    fn grounded_prompt_lists_sources() {
        let content = vec![
            source("https://www.apple.com/iphone-15-pro/", "A17 Pro chip"),
            source("https://en.wikipedia.org/wiki/IPhone_15_Pro", "Released 2023"),
        ];
        let messages = build_messages("iPhone 15 Pro", &content, Some("focus on camera"));

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("supplied sources"));

        let user = &messages[1].content;
        assert!(user.contains("Product name: iPhone 15 Pro"));
        assert!(user.contains("Additional context: focus on camera"));
        assert!(user.contains("[Source 1] https://www.apple.com/iphone-15-pro/"));
        assert!(user.contains("[Source 2] https://en.wikipedia.org/wiki/IPhone_15_Pro"));
        assert!(user.contains("A17 Pro chip"));
        assert!(user.contains("\"seo_description\""));
    }

    #[test]
    fn generative_prompt_has_no_sources() {
        let messages = build_messages("iPhone 15 Pro", &[], None);
        assert!(messages[0].content.contains("own knowledge"));
        assert!(messages[1].content.contains("Sources: none available"));
        assert!(messages[1].content.contains("Additional context: none"));
    }

    #[test]
    fn parses_valid_record() {
        let raw = r#"{"detailed_description":"A pro phone.","features":["USB-C"],"specifications":{"chip":"A17 Pro"},"seo_title":"iPhone 15 Pro","seo_description":"Buy it."}"#;
        let record = parse_record(raw).unwrap();
        assert_eq!(record.features, vec!["USB-C".to_string()]);
        assert_eq!(record.specifications["chip"], "A17 Pro");
        assert_eq!(record.seo_title, "iPhone 15 Pro");
        assert!(record.benefits.is_empty());
    }

    #[test]
    fn parses_fenced_record() {
        let raw = "```json\n{\"detailed_description\":\"A kettle.\"}\n```";
        let record = parse_record(raw).unwrap();
        assert_eq!(record.detailed_description, "A kettle.");
    }

    #[test]
    fn rejects_malformed_output() {
        for raw in [
            "",
            "   ",
            "Sure! Here is the product data.",
            "[1, 2, 3]",
            r#"{"features": ["no description"]}"#,
            r#"{"detailed_description": "  "}"#,
        ] {
            let err = parse_record(raw).unwrap_err();
            assert!(
                matches!(err, SynthesisError::MalformedOutput(_)),
                "{raw:?} should be malformed, got {err:?}"
            );
        }
    }

    #[test]
    fn strip_code_fence_variants() {
        assert_eq!(strip_code_fence("{}"), "{}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
    }
}
