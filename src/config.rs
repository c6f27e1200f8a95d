//! # Configuration Module
//!
//! Loads the research loop's configuration from environment variables
//! (optionally seeded from a `.env` file) and validates it before any
//! client is constructed.
//!
//! The loop itself never reads the environment: `main` turns a `Config`
//! into the plain settings values each component consumes.

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::research::orchestrator::LoopSettings;
use crate::search::GatewaySettings;

// =============================================================================
// CONFIGURATION STRUCT
// =============================================================================
/// Main configuration for the research loop.
///
/// # Rust Concept: Option for "maybe configured"
///
/// Search backends are optional. A missing URL is not an error: the gateway
/// degrades to a clearly labeled placeholder result instead.
#[derive(Debug, Clone)]
pub struct Config {
    /// The Ollama model to use (e.g., "llama3.2")
    pub model: String,

    /// Ollama server URL (default: http://localhost:11434)
    pub ollama_host: String,

    /// Temperature for LLM responses
    pub temperature: f32,

    /// Upper bound on loop iterations (the judge is told this value)
    pub max_iterations: usize,

    /// Hard cap on the size of every search result's content
    pub max_content_chars: usize,

    /// Maximum queries emitted per planning or judging round
    pub max_queries_per_round: usize,

    /// How many categories entity auto-discovery searches
    pub max_discovered_categories: usize,

    /// Result-count cap passed to both search backends
    pub max_search_results: usize,

    /// Batch web-search endpoint
    pub web_search_url: Option<String>,

    /// Bearer token for the web-search endpoint
    pub web_search_api_key: Option<String>,

    /// Base URL of the internal entity store API
    pub entity_api_url: Option<String>,

    /// Bearer token for the entity store
    pub entity_api_key: Option<String>,

    /// Per-request timeout for both HTTP backends
    pub http_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: "llama3.2".to_string(),
            ollama_host: "http://localhost:11434".to_string(),
            // Low temperature keeps the structured outputs parseable
            temperature: 0.3,
            max_iterations: 3,
            max_content_chars: 15_000,
            max_queries_per_round: 5,
            max_discovered_categories: 5,
            max_search_results: 10,
            web_search_url: None,
            web_search_api_key: None,
            entity_api_url: None,
            entity_api_key: None,
            http_timeout_secs: 30,
        }
    }
}

// =============================================================================
// CONFIGURATION LOADING
// =============================================================================
impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults; set-but-unparseable numeric
    /// variables are an error with a message naming the variable.
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (silently ignore if not found)
        let _ = dotenvy::dotenv();

        let mut config = Config::default();

        if let Ok(val) = env::var("OLLAMA_MODEL") {
            config.model = val;
        }

        if let Ok(val) = env::var("OLLAMA_API_BASE_URL") {
            config.ollama_host = val;
        }

        if let Ok(val) = env::var("TEMPERATURE") {
            config.temperature = val
                .parse()
                .context("TEMPERATURE must be a valid floating-point number (e.g., 0.3)")?;
        }

        config.max_iterations = parse_var("MAX_ITERATIONS", config.max_iterations)?;
        config.max_content_chars = parse_var("MAX_CONTENT_CHARS", config.max_content_chars)?;
        config.max_queries_per_round =
            parse_var("MAX_QUERIES_PER_ROUND", config.max_queries_per_round)?;
        config.max_discovered_categories =
            parse_var("MAX_DISCOVERED_CATEGORIES", config.max_discovered_categories)?;
        config.max_search_results = parse_var("MAX_SEARCH_RESULTS", config.max_search_results)?;
        config.http_timeout_secs = parse_var("HTTP_TIMEOUT_SECS", config.http_timeout_secs)?;

        config.web_search_url = non_empty_var("WEB_SEARCH_URL");
        config.web_search_api_key = non_empty_var("WEB_SEARCH_API_KEY");
        config.entity_api_url = non_empty_var("ENTITY_API_URL");
        config.entity_api_key = non_empty_var("ENTITY_API_KEY");

        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Missing search backends are deliberately not checked here.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            anyhow::bail!(
                "Temperature must be between 0.0 and 2.0, got: {}",
                self.temperature
            );
        }

        if self.max_iterations == 0 {
            anyhow::bail!("MAX_ITERATIONS must be at least 1");
        }

        if self.max_content_chars == 0 {
            anyhow::bail!("MAX_CONTENT_CHARS must be at least 1");
        }

        if self.max_queries_per_round == 0 {
            anyhow::bail!("MAX_QUERIES_PER_ROUND must be at least 1");
        }

        if self.max_discovered_categories == 0 {
            anyhow::bail!("MAX_DISCOVERED_CATEGORIES must be at least 1");
        }

        if self.max_search_results == 0 {
            anyhow::bail!("MAX_SEARCH_RESULTS must be at least 1");
        }

        if self.model.is_empty() {
            anyhow::bail!("OLLAMA_MODEL cannot be empty");
        }

        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Settings consumed by the research loop.
    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            max_iterations: self.max_iterations,
            max_queries_per_round: self.max_queries_per_round,
        }
    }

    /// Settings consumed by the search gateway.
    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            max_content_chars: self.max_content_chars,
            max_discovered_categories: self.max_discovered_categories,
            max_results: self.max_search_results,
        }
    }
}

/// Parse an optional numeric environment variable, keeping `default` when unset.
fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a valid positive integer")),
        Err(_) => Ok(default),
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
