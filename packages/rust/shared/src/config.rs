//! Application configuration for product enrichment.
//!
//! User config lives at `~/.productenrich/productenrich.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EnrichError, Result};
use crate::types::SearchProviderKind;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "productenrich.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".productenrich";

/// API key sent when the configured key variable is unset (local Ollama).
const PLACEHOLDER_API_KEY: &str = "ollama";

/// Backoff before the first synthesis retry; doubled for each further one.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Config structs (matching productenrich.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Web search settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Page extraction settings.
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// LLM synthesis settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Pipeline-wide limits.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Provider name: "none" (generative only) or "duckduckgo".
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Results requested from the provider.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Candidates handed to extraction (top K by rank).
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Search call timeout.
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,

    /// DuckDuckGo HTML endpoint.
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            max_results: default_max_results(),
            max_candidates: default_max_candidates(),
            timeout_secs: default_search_timeout(),
            endpoint: default_search_endpoint(),
        }
    }
}

fn default_provider() -> String {
    "none".into()
}
fn default_max_results() -> usize {
    5
}
fn default_max_candidates() -> usize {
    3
}
fn default_search_timeout() -> u64 {
    10
}
fn default_search_endpoint() -> String {
    "https://html.duckduckgo.com/html/".into()
}

/// `[extraction]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Per-URL extraction timeout.
    #[serde(default = "default_extract_timeout")]
    pub timeout_secs: u64,

    /// TCP connect timeout.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Maximum characters of page text kept per page.
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,

    /// Maximum image URLs collected per page.
    #[serde(default = "default_max_images")]
    pub max_images: usize,

    /// User-Agent header sent with page requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_extract_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_text_chars: default_max_text_chars(),
            max_images: default_max_images(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_extract_timeout() -> u64 {
    10
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_max_text_chars() -> usize {
    15_000
}
fn default_max_images() -> usize {
    5
}
fn default_user_agent() -> String {
    concat!("productenrich/", env!("CARGO_PKG_VERSION")).into()
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Completion token limit.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Synthesis call timeout.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Sampling temperature when grounding content is supplied.
    #[serde(default = "default_grounded_temperature")]
    pub grounded_temperature: f32,

    /// Sampling temperature for generation from model knowledge.
    #[serde(default = "default_generative_temperature")]
    pub generative_temperature: f32,

    /// Extra attempts after a failed synthesis call. Zero disables retry.
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
            grounded_temperature: default_grounded_temperature(),
            generative_temperature: default_generative_temperature(),
            max_retries: 0,
        }
    }
}

impl LlmConfig {
    /// Timeout for a single chat completion attempt.
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Backoff slept before retry number `retry` (0-based).
    pub fn retry_delay(&self, retry: u32) -> Duration {
        RETRY_BASE_DELAY.saturating_mul(2u32.saturating_pow(retry))
    }

    /// Worst-case wall time of one synthesis call: every attempt timing out
    /// plus every backoff in between.
    pub fn synthesis_budget(&self) -> Duration {
        let attempts = self.max_retries.saturating_add(1);
        let backoff = (0..self.max_retries)
            .map(|retry| self.retry_delay(retry))
            .fold(Duration::ZERO, Duration::saturating_add);
        self.attempt_timeout()
            .saturating_mul(attempts)
            .saturating_add(backoff)
    }
}

fn default_base_url() -> String {
    "http://localhost:11434/v1".into()
}
fn default_model() -> String {
    "llama3".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_grounded_temperature() -> f32 {
    0.3
}
fn default_generative_temperature() -> f32 {
    0.7
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Characters of each source's text handed to synthesis.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,

    /// Outer deadline for a whole request, enforced by the caller.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_content_chars: default_max_content_chars(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_max_content_chars() -> usize {
    2_000
}
fn default_request_timeout() -> u64 {
    120
}

// ---------------------------------------------------------------------------
// Enrichment config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Search part of the runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSettings {
    /// `None` disables search entirely.
    pub provider: Option<SearchProviderKind>,
    /// Maximum candidates extracted per request (K).
    pub max_candidates: usize,
    pub timeout: Duration,
}

impl SearchSettings {
    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }
}

/// Runtime configuration consumed by the orchestrator. Built once at
/// startup and passed by value into the orchestrator's constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentConfig {
    pub search: SearchSettings,
    /// Per-URL extraction timeout.
    pub extract_timeout: Duration,
    /// Deadline for a whole synthesis call, retries and backoff included.
    pub synthesis_timeout: Duration,
    /// Characters of each source's text handed to synthesis.
    pub max_content_chars: usize,
}

impl EnrichmentConfig {
    /// Configuration with search disabled and default limits.
    pub fn generative_only() -> Self {
        Self {
            search: SearchSettings {
                provider: None,
                max_candidates: default_max_candidates(),
                timeout: Duration::from_secs(default_search_timeout()),
            },
            extract_timeout: Duration::from_secs(default_extract_timeout()),
            synthesis_timeout: LlmConfig::default().synthesis_budget(),
            max_content_chars: default_max_content_chars(),
        }
    }
}

impl TryFrom<&AppConfig> for EnrichmentConfig {
    type Error = EnrichError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        if config.search.max_candidates == 0 {
            return Err(EnrichError::config("search.max_candidates must be at least 1"));
        }
        if config.pipeline.max_content_chars == 0 {
            return Err(EnrichError::config(
                "pipeline.max_content_chars must be at least 1",
            ));
        }

        Ok(Self {
            search: SearchSettings {
                provider: SearchProviderKind::parse_setting(&config.search.provider)?,
                max_candidates: config.search.max_candidates,
                timeout: Duration::from_secs(config.search.timeout_secs),
            },
            extract_timeout: Duration::from_secs(config.extraction.timeout_secs),
            synthesis_timeout: config.llm.synthesis_budget(),
            max_content_chars: config.pipeline.max_content_chars,
        })
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.productenrich/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| EnrichError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.productenrich/productenrich.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| EnrichError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| EnrichError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| EnrichError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| EnrichError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| EnrichError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve the LLM API key from the configured env var, falling back to the
/// placeholder key a local Ollama server accepts.
pub fn resolve_api_key(config: &LlmConfig) -> String {
    match std::env::var(&config.api_key_env) {
        Ok(val) if !val.trim().is_empty() => val,
        _ => {
            tracing::debug!(
                var = %config.api_key_env,
                "API key variable unset, using placeholder key"
            );
            PLACEHOLDER_API_KEY.to_string()
        }
    }
}
