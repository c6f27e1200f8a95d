//! Result summarizer: turns one search result into at most one finding.

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::llm::{generate, Generator};
use crate::research::prompts::ResearchPrompts;
use crate::research::state::Finding;
use crate::search::SearchResult;

/// Structured output of the summarization call.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SummaryOutput {
    /// Compact, topic-relevant summary of the content
    pub summary: String,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Summarizer;

impl Summarizer {
    pub fn new() -> Self {
        Self
    }

    /// Summarize `result` for `topic`.
    ///
    /// Returns `None` when there is nothing to summarize (failed, disabled
    /// or empty results) or when the model call fails; neither is fatal.
    pub async fn summarize(
        &self,
        generator: &dyn Generator,
        result: &SearchResult,
        topic: &str,
        clarifications: &str,
        iteration: usize,
    ) -> Option<Finding> {
        if !result.has_content() {
            debug!(
                query = %result.query.text,
                status = ?result.status,
                "Nothing to summarize"
            );
            return None;
        }

        let system = ResearchPrompts::summarizer_system();
        let prompt = ResearchPrompts::summarizer_task(
            &result.content,
            topic,
            clarifications,
            result.query.source,
            &result.label,
        );

        match generate::<SummaryOutput>(generator, "summary", &system, &prompt).await {
            Ok(out) if !out.summary.trim().is_empty() => Some(Finding {
                summary: out.summary.trim().to_string(),
                source: result.label.clone(),
                source_kind: result.query.source,
                references: result.references.clone(),
                iteration,
            }),
            Ok(_) => {
                warn!(query = %result.query.text, "Summarizer returned an empty summary");
                None
            }
            Err(e) => {
                warn!(query = %result.query.text, error = %e, "Summarization failed");
                None
            }
        }
    }
}
