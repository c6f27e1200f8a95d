//! Error types for the research loop.
//!
//! None of these cross the search gateway or the loop boundary: they are
//! turned into failure-shaped results, dropped findings, named fallbacks,
//! or the run's single terminal error string.

use thiserror::Error;

/// Errors raised by a search backend (web or entity).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized - check API key")]
    Unauthorized,

    #[error("Rate limited - too many requests")]
    RateLimited,

    #[error("HTTP error ({0}): {1}")]
    Http(u16, String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// The backend answered but reported a failure for this query.
    #[error("Backend reported failure: {0}")]
    Backend(String),
}

impl BackendError {
    /// Map a transport-level reqwest failure onto the taxonomy above.
    pub fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_connect() {
            BackendError::Connection(e.to_string())
        } else if e.is_decode() {
            BackendError::Parse(e.to_string())
        } else {
            BackendError::Network(e.to_string())
        }
    }

    /// Map a non-success HTTP status onto the taxonomy above.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => BackendError::Unauthorized,
            429 => BackendError::RateLimited,
            _ => BackendError::Http(status, body),
        }
    }

    /// Short machine-readable kind, used in failure-shaped result content.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::NotConfigured(_) => "not_configured",
            BackendError::Timeout => "timeout",
            BackendError::Connection(_) => "connection",
            BackendError::Network(_) => "network",
            BackendError::Unauthorized => "unauthorized",
            BackendError::RateLimited => "rate_limited",
            BackendError::Http(_, _) => "http",
            BackendError::Parse(_) => "parse",
            BackendError::Backend(_) => "backend",
        }
    }
}

/// Errors from a text-generation call.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Completion failed: {0}")]
    Completion(String),

    #[error("Model did not return structured output for '{0}'")]
    MissingStructuredOutput(String),

    #[error("Structured output did not match '{schema}': {source}")]
    InvalidStructuredOutput {
        schema: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to build output schema: {0}")]
    Schema(String),
}

/// Errors surfaced by the research loop's fallible public operations.
#[derive(Error, Debug)]
pub enum ResearchError {
    #[error("Report generation failed: {0}")]
    Report(#[from] GenerationError),

    #[error("Report generation returned an empty document")]
    EmptyReport,
}
