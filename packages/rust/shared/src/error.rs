//! Error types for the product enrichment workspace.
//!
//! Library crates use [`EnrichError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all enrichment operations.
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to a collaborator.
    #[error("network error: {0}")]
    Network(String),

    /// HTML or JSON parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Search provider failure (request, status, or unusable response).
    #[error("search error: {0}")]
    Search(String),

    /// Page fetch or content extraction failure for a single URL.
    #[error("extraction error: {url}: {message}")]
    Extraction { url: String, message: String },

    /// Structured synthesis failure.
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Request or data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, EnrichError>;

impl EnrichError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an extraction error for `url`.
    pub fn extraction(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Extraction {
            url: url.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Terminal failure classes of the synthesis stage.
///
/// These are the only failures that turn an enrichment into
/// `success == false`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SynthesisError {
    /// The generation call itself failed (transport error, non-2xx status).
    #[error("synthesis provider error: {0}")]
    Provider(String),

    /// The generation call did not complete in time.
    #[error("synthesis timed out after {}s", .after.as_secs_f64())]
    Timeout { after: Duration },

    /// The model answered, but not with the expected structured shape.
    #[error("malformed synthesis output: {0}")]
    MalformedOutput(String),
}

impl SynthesisError {
    /// Short machine-readable class name, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider(_) => "provider",
            Self::Timeout { .. } => "timeout",
            Self::MalformedOutput(_) => "malformed_output",
        }
    }
}
