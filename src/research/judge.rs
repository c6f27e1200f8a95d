//! Sufficiency judge: decides whether to stop or which queries to run next.

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

use crate::llm::{generate, Generator};
use crate::research::planner::{to_search_queries, PlannedQuery};
use crate::research::prompts::ResearchPrompts;
use crate::research::state::ResearchState;
use crate::search::SearchQuery;

/// Structured output of the judging call.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct JudgeOutput {
    /// True when the findings support a useful report
    pub sufficient: bool,
    /// What is still missing
    #[serde(default)]
    pub gaps: Vec<String>,
    /// New queries that close the gaps
    #[serde(default)]
    pub next_queries: Vec<PlannedQuery>,
}

/// The judge's decision for one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub sufficient: bool,
    pub gaps: Vec<String>,
    pub next_queries: Vec<SearchQuery>,
    /// Whether this verdict came from the fallback rather than the model
    pub fallback: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Judge {
    max_queries: usize,
}

impl Judge {
    pub fn new(max_queries: usize) -> Self {
        Self { max_queries }
    }

    /// Judge the accumulated findings. Never fails.
    ///
    /// `iteration` starts at 1. On a model failure the verdict is
    /// conservative (one more generic web query), except near the cap where
    /// it stops so the run ends with a report.
    pub async fn judge(
        &self,
        generator: &dyn Generator,
        state: &ResearchState,
        iteration: usize,
        max_iterations: usize,
    ) -> Verdict {
        let system = ResearchPrompts::judge_system(self.max_queries);
        let prompt = ResearchPrompts::judge_task(
            &state.topic,
            &state.clarifications_text(),
            state.findings(),
            state.previous_queries(),
            &state.last_gaps,
            iteration,
            max_iterations,
        );

        match generate::<JudgeOutput>(generator, "sufficiency", &system, &prompt).await {
            Ok(out) => {
                // Uncapped: the loop drops executed queries before it caps.
                let next_queries = if out.sufficient {
                    vec![]
                } else {
                    to_search_queries(out.next_queries)
                };
                info!(
                    iteration,
                    sufficient = out.sufficient,
                    gaps = out.gaps.len(),
                    next = next_queries.len(),
                    "Judge verdict"
                );
                Verdict {
                    sufficient: out.sufficient,
                    gaps: out.gaps,
                    next_queries,
                    fallback: false,
                }
            }
            Err(e) => {
                warn!(iteration, error = %e, "Judging failed, using fallback verdict");
                Self::fallback(&state.topic, iteration, max_iterations)
            }
        }
    }

    pub fn fallback(topic: &str, iteration: usize, max_iterations: usize) -> Verdict {
        if ResearchPrompts::near_cap(iteration, max_iterations) {
            return Verdict {
                sufficient: true,
                gaps: vec![],
                next_queries: vec![],
                fallback: true,
            };
        }
        Verdict {
            sufficient: false,
            gaps: vec!["Sufficiency could not be assessed".to_string()],
            next_queries: vec![SearchQuery::web(format!("{topic} overview"))],
            fallback: true,
        }
    }
}
