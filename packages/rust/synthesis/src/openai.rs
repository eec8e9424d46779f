//! OpenAI-compatible chat completions synthesizer.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use productenrich_shared::{
    EnrichError, EnrichedRecord, ExtractedContent, LlmConfig, Result, SynthesisError,
    resolve_api_key,
};

use crate::Synthesizer;
use crate::prompt::{ChatMessage, build_messages, parse_record};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Synthesizer backed by `POST {base_url}/chat/completions`.
pub struct OpenAiSynthesizer {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    grounded_temperature: f32,
    generative_temperature: f32,
    timeout: Duration,
    /// Backoff before each retry; empty when retries are off.
    retry_delays: Vec<Duration>,
}

impl OpenAiSynthesizer {
    /// Create a synthesizer from the `[llm]` config section.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let timeout = config.attempt_timeout();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EnrichError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: resolve_api_key(config),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            grounded_temperature: config.grounded_temperature,
            generative_temperature: config.generative_temperature,
            timeout,
            retry_delays: (0..config.max_retries)
                .map(|retry| config.retry_delay(retry))
                .collect(),
        })
    }

    fn headers(&self) -> std::result::Result<HeaderMap, SynthesisError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| SynthesisError::Provider(format!("invalid API key header: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// One chat completion round trip; returns the raw message content.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        temperature: f32,
    ) -> std::result::Result<String, SynthesisError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .http
            .post(&self.endpoint)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Provider(format!(
                "HTTP {status}: {}",
                body.trim()
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| SynthesisError::Provider(format!("unreadable response body: {e}")))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                SynthesisError::MalformedOutput("response has no message content".into())
            })
    }

    fn transport_error(&self, e: reqwest::Error) -> SynthesisError {
        if e.is_timeout() {
            SynthesisError::Timeout {
                after: self.timeout,
            }
        } else {
            SynthesisError::Provider(e.to_string())
        }
    }
}

#[async_trait]
impl Synthesizer for OpenAiSynthesizer {
    #[instrument(skip_all, fields(model = %self.model, sources = content.len()))]
    async fn synthesize(
        &self,
        product_name: &str,
        content: &[ExtractedContent],
        context: Option<&str>,
    ) -> std::result::Result<EnrichedRecord, SynthesisError> {
        let temperature = if content.is_empty() {
            self.generative_temperature
        } else {
            self.grounded_temperature
        };
        let messages = build_messages(product_name, content, context);

        let mut attempt = 0;
        loop {
            let outcome = self
                .complete(messages.clone(), temperature)
                .await
                .and_then(|raw| parse_record(&raw));

            match outcome {
                Ok(record) => {
                    debug!(attempt, "synthesis complete");
                    return Ok(record);
                }
                Err(e) => {
                    let Some(&delay) = self.retry_delays.get(attempt) else {
                        return Err(e);
                    };
                    warn!(attempt, error = %e, ?delay, "synthesis failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
