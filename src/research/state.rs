//! Research run state.
//!
//! A `ResearchState` is owned by exactly one run of the loop and dropped
//! when the run ends. Findings are append-only.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::search::{SearchQuery, SearchSource};

/// Characters per token used for the approximate token count.
const CHARS_PER_TOKEN: usize = 4;

/// Approximate token count of `text` (chars / 4, rounded up).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// A clarifying question the user answered before the run started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clarification {
    pub question: String,
    pub answer: String,
}

impl Clarification {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Render clarifications as prompt text, one Q/A pair per block.
pub fn render_clarifications(clarifications: &[Clarification]) -> String {
    clarifications
        .iter()
        .map(|c| format!("Q: {}\nA: {}", c.question, c.answer))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// A summarized, attributable unit of research content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub summary: String,
    /// Human-readable label of where this came from (URL or entity label)
    pub source: String,
    pub source_kind: SearchSource,
    /// URLs (web) or entity identifiers (entity) backing the summary
    pub references: Vec<String>,
    /// Iteration that produced this finding
    pub iteration: usize,
}

// =============================================================================
// RESEARCH STATE
// =============================================================================
/// The complete state of one research run.
///
/// # Rust Concept: Private Fields for Invariants
///
/// `findings` and the executed-query set are private. Callers can only
/// append findings and mark queries executed, so neither can shrink.
#[derive(Debug, Clone, Default)]
pub struct ResearchState {
    pub topic: String,
    pub clarifications: Vec<Clarification>,
    findings: Vec<Finding>,
    pub completed_steps: usize,
    pub tokens_used: usize,
    /// Current iteration, starting at 1 once the loop body is entered
    pub iteration: usize,
    /// Normalized (source, text) of every query already executed
    executed_queries: HashSet<(SearchSource, String)>,
    /// Queries in execution order, for the judge
    query_log: Vec<SearchQuery>,
    /// Gaps reported by the most recent judge round
    pub last_gaps: Vec<String>,
}

impl ResearchState {
    pub fn new(topic: impl Into<String>, clarifications: Vec<Clarification>) -> Self {
        Self {
            topic: topic.into(),
            clarifications,
            ..Default::default()
        }
    }

    pub fn clarifications_text(&self) -> String {
        render_clarifications(&self.clarifications)
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    /// Append findings; existing findings are never touched.
    pub fn append_findings(&mut self, findings: impl IntoIterator<Item = Finding>) {
        self.findings.extend(findings);
    }

    pub fn previous_queries(&self) -> &[SearchQuery] {
        &self.query_log
    }

    /// Record a batch of queries as executed.
    pub fn mark_executed(&mut self, queries: &[SearchQuery]) {
        for q in queries {
            if self.executed_queries.insert(q.dedup_key()) {
                self.query_log.push(q.clone());
            }
        }
    }

    fn was_executed(&self, query: &SearchQuery) -> bool {
        self.executed_queries.contains(&query.dedup_key())
    }

    /// Drop queries already executed (or repeated within `queries`) and cap
    /// the batch at `limit`.
    pub fn fresh_queries(&self, queries: Vec<SearchQuery>, limit: usize) -> Vec<SearchQuery> {
        let mut seen = HashSet::new();
        queries
            .into_iter()
            .filter(|q| !q.text.trim().is_empty())
            .filter(|q| !self.was_executed(q))
            .filter(|q| seen.insert(q.dedup_key()))
            .take(limit)
            .collect()
    }

    pub fn has_entity_findings(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.source_kind == SearchSource::Entity)
    }
}
