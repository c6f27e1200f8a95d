//! # Dual-Source Research CLI
//!
//! Runs the research loop for one topic from the command line and prints
//! the activity stream followed by the final markdown report.
//!
//! ## Quick Start
//! ```bash
//! cargo run -- "TypeScript best practices" \
//!     --clarify "Audience?::Backend engineers"
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use dual_source_research::activity::{ActivityStatus, RunEvent};
use dual_source_research::config::Config;
use dual_source_research::llm::OllamaGenerator;
use dual_source_research::research::{Clarification, ResearchLoop, ResearchRequest};
use dual_source_research::search::entity::{EntitySearchBackend, HttpEntitySearch};
use dual_source_research::search::web::{HttpWebSearch, WebSearchBackend};
use dual_source_research::search::SearchGateway;

// =============================================================================
// CLI ARGUMENTS
// =============================================================================
#[derive(Parser, Debug)]
#[command(
    name = "dual-source-research",
    version,
    about = "Iterative research over web search and an internal entity store",
    long_about = r#"
Dual-Source Research - plan, search, summarize, judge, report.

The loop plans queries for your topic, runs them against the public web and
the internal entity store, summarizes the results, and repeats until the
model judges the findings sufficient or the iteration limit is reached.

PREREQUISITES:
  1. Install Ollama: https://ollama.ai
  2. Pull a model: ollama pull llama3.2
  3. Optionally set WEB_SEARCH_URL and ENTITY_API_URL (see .env.example)

EXAMPLES:
  dual-source-research "TypeScript best practices"

  dual-source-research --clarify "Which services?::Billing only" \
      --max-iterations 2 --output report.md "Billing architecture"
"#
)]
struct Args {
    /// The topic to research
    #[arg(value_name = "TOPIC")]
    topic: String,

    /// A clarifying question and its answer, as "question::answer" (repeatable)
    #[arg(short = 'c', long = "clarify", value_name = "Q::A", value_parser = parse_clarification)]
    clarify: Vec<Clarification>,

    /// Ollama model to use (overrides OLLAMA_MODEL)
    #[arg(short = 'm', long = "model", env = "OLLAMA_MODEL")]
    model: Option<String>,

    /// Iteration limit (overrides MAX_ITERATIONS)
    #[arg(short = 'i', long = "max-iterations")]
    max_iterations: Option<usize>,

    /// Also write the report to this file
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,

    /// Enable verbose/debug logging
    #[arg(short = 'v', long = "verbose", default_value = "false")]
    verbose: bool,
}

fn parse_clarification(raw: &str) -> Result<Clarification, String> {
    let (question, answer) = raw
        .split_once("::")
        .ok_or_else(|| format!("expected \"question::answer\", got \"{raw}\""))?;
    let (question, answer) = (question.trim(), answer.trim());
    if question.is_empty() {
        return Err("clarification question cannot be empty".to_string());
    }
    Ok(Clarification::new(question, answer))
}

// =============================================================================
// MAIN FUNCTION
// =============================================================================
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let mut config = Config::from_env()?;
    if let Some(model) = args.model {
        info!(model = %model, "Using model from command line");
        config.model = model;
    }
    if let Some(max) = args.max_iterations {
        config.max_iterations = max;
    }
    config.validate()?;

    info!(
        model = %config.model,
        host = %config.ollama_host,
        max_iterations = config.max_iterations,
        web = config.web_search_url.is_some(),
        entity = config.entity_api_url.is_some(),
        "Configuration loaded"
    );

    let research = Arc::new(build_loop(&config)?);
    let request = ResearchRequest::new(args.topic).with_clarifications(args.clarify);

    let mut events = research.start(request);
    let mut report = None;
    while let Some(event) = events.recv().await {
        match event {
            RunEvent::Activity(activity) => {
                let marker = match activity.status {
                    ActivityStatus::Pending => "..",
                    ActivityStatus::Complete => "ok",
                    ActivityStatus::Error => "!!",
                };
                eprintln!(
                    "[{marker}] {:<9} {}",
                    activity.category.as_str(),
                    activity.message
                );
            }
            RunEvent::Report(text) => report = Some(text),
            RunEvent::Error(message) => {
                error!(error = %message, "Research failed");
                eprintln!("\nResearch failed: {message}");
                if message.contains("connection refused") || message.contains("error sending request") {
                    eprintln!("\nTip: Make sure Ollama is running:");
                    eprintln!("   ollama serve");
                }
                anyhow::bail!(message);
            }
        }
    }

    let Some(report) = report else {
        anyhow::bail!("Research run ended without a report");
    };

    println!("\n{}", "=".repeat(60));
    println!("RESEARCH REPORT");
    println!("{}\n", "=".repeat(60));
    println!("{report}");
    println!("\n{}", "=".repeat(60));

    if let Some(path) = args.output {
        std::fs::write(&path, &report)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }

    Ok(())
}

/// Wire the configured clients into a research loop.
///
/// One HTTP client is shared by both search backends. A backend without a
/// URL stays `None` and its queries come back as "disabled" placeholders.
fn build_loop(config: &Config) -> Result<ResearchLoop> {
    let http = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .user_agent(concat!("dual-source-research/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let web: Option<Arc<dyn WebSearchBackend>> = match &config.web_search_url {
        Some(url) => Some(Arc::new(HttpWebSearch::new(
            http.clone(),
            url.clone(),
            config.web_search_api_key.clone(),
        ))),
        None => {
            warn!("WEB_SEARCH_URL not set; web search is disabled");
            None
        }
    };

    let entity: Option<Arc<dyn EntitySearchBackend>> = match &config.entity_api_url {
        Some(url) => Some(Arc::new(HttpEntitySearch::new(
            http,
            url.clone(),
            config.entity_api_key.clone(),
        ))),
        None => {
            warn!("ENTITY_API_URL not set; entity search is disabled");
            None
        }
    };

    let gateway = SearchGateway::new(web, entity, config.gateway_settings());
    let generator = Arc::new(OllamaGenerator::new(
        &config.ollama_host,
        config.model.clone(),
        config.temperature,
    ));

    Ok(ResearchLoop::new(generator, gateway, config.loop_settings()))
}

// =============================================================================
// LOGGING INITIALIZATION
// =============================================================================
/// Install the global tracing subscriber. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}
