//! # Research Loop
//!
//! ```text
//! PLANNING ──► ( SEARCHING ──► SUMMARIZING ──► ANALYZING )* ──► REPORTING ──► DONE
//!                    ▲                              │
//!                    └──── next queries ◄───────────┘
//! ```
//!
//! Within an iteration, all searches run concurrently and the loop waits
//! for every one of them; then all summarizations run concurrently behind
//! a second barrier. Findings are appended only after that barrier, so the
//! run's state is never written from two places at once.
//!
//! The loop ends when the judge says the findings are sufficient, when the
//! iteration cap is reached, or when the judge has no new queries left.
//! It always reaches REPORTING, and every run ends with either a report or
//! one human-readable error string.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::activity::{Activity, ActivityCategory, ActivitySink, ChannelSink, RunEvent};
use crate::llm::{Generator, MeteredGenerator};
use crate::research::judge::Judge;
use crate::research::planner::Planner;
use crate::research::report::ReportCompiler;
use crate::research::state::{Clarification, Finding, ResearchState};
use crate::research::summarizer::Summarizer;
use crate::search::{ResultStatus, SearchGateway, SearchQuery, SearchResult};

// =============================================================================
// RUN TYPES
// =============================================================================
/// Loop limits, taken from `Config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub max_iterations: usize,
    pub max_queries_per_round: usize,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            max_queries_per_round: 5,
        }
    }
}

/// States of the research state machine.
///
/// # Rust Concept: Copy Enums as State
///
/// `Phase` is `Copy`, so each transition hands back a new value instead of
/// mutating shared state behind a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Planning,
    Searching,
    Summarizing,
    Analyzing,
    Reporting,
    Done,
    DoneWithError,
}

/// Why the loop left the search/judge cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Sufficient,
    IterationCap,
    NoNewQueries,
}

/// What the caller asks to research.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchRequest {
    pub topic: String,
    pub clarifications: Vec<Clarification>,
}

impl ResearchRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            clarifications: vec![],
        }
    }

    pub fn with_clarifications(mut self, clarifications: Vec<Clarification>) -> Self {
        self.clarifications = clarifications;
        self
    }
}

/// Terminal value of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    Report(String),
    Error(String),
}

/// Everything a finished run hands back.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub result: RunResult,
    pub phase: Phase,
    pub stop_reason: StopReason,
    pub iterations: usize,
    pub completed_steps: usize,
    pub tokens_used: usize,
    pub findings: Vec<Finding>,
    pub executed_queries: Vec<SearchQuery>,
}

impl RunOutcome {
    pub fn report(&self) -> Option<&str> {
        match &self.result {
            RunResult::Report(r) => Some(r),
            RunResult::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.result {
            RunResult::Report(_) => None,
            RunResult::Error(e) => Some(e),
        }
    }
}

// =============================================================================
// RESEARCH LOOP
// =============================================================================
/// The orchestrator. Clients are injected; nothing is read from the
/// environment.
///
/// # Rust Concept: Dependency Injection with Trait Objects
///
/// The loop only knows `dyn Generator` and the gateway's backend traits.
/// `main` wires Ollama and HTTP clients; tests wire scripted fakes.
pub struct ResearchLoop {
    generator: Arc<dyn Generator>,
    gateway: SearchGateway,
    settings: LoopSettings,
    planner: Planner,
    summarizer: Summarizer,
    judge: Judge,
    reporter: ReportCompiler,
}

impl ResearchLoop {
    pub fn new(generator: Arc<dyn Generator>, gateway: SearchGateway, settings: LoopSettings) -> Self {
        Self {
            generator,
            gateway,
            planner: Planner::new(settings.max_queries_per_round),
            summarizer: Summarizer::new(),
            judge: Judge::new(settings.max_queries_per_round),
            reporter: ReportCompiler::new(),
            settings,
        }
    }

    /// Start a run in the background and stream its events.
    ///
    /// The stream carries activities and ends with exactly one
    /// `RunEvent::Report` or `RunEvent::Error`. Dropping the receiver
    /// abandons the run's output; the run itself finishes its current step.
    ///
    /// # Rust Concept: `self: Arc<Self>`
    ///
    /// `tokio::spawn` needs a `'static` future. Taking the loop by `Arc`
    /// moves a reference-counted handle into the task instead of a borrow.
    pub fn start(self: Arc<Self>, request: ResearchRequest) -> mpsc::UnboundedReceiver<RunEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let sink = ChannelSink::new(tx.clone());
            let outcome = self.run(request, &sink).await;
            let terminal = match outcome.result {
                RunResult::Report(report) => RunEvent::Report(report),
                RunResult::Error(error) => RunEvent::Error(error),
            };
            let _ = tx.send(terminal);
        });
        rx
    }

    /// Drive one research run to completion.
    ///
    /// # Rust Concept: Fan-out / Fan-in with `join_all`
    ///
    /// Each phase builds one future per query and awaits them together.
    /// All of them borrow `state` immutably; the single mutable update
    /// happens after the barrier, so the borrow checker proves there is no
    /// concurrent write.
    pub async fn run(&self, request: ResearchRequest, sink: &dyn ActivitySink) -> RunOutcome {
        let max_iterations = self.settings.max_iterations.max(1);
        let metered = MeteredGenerator::new(self.generator.clone());
        let mut state = ResearchState::new(request.topic, request.clarifications);
        let clarifications = state.clarifications_text();

        info!(topic = %state.topic, max_iterations, "Starting research run");

        // ---------------------------------------------------------------------
        // PLANNING
        // ---------------------------------------------------------------------
        let mut phase = Phase::Planning;
        sink.record(Activity::pending(
            ActivityCategory::Planning,
            format!("Planning research for \"{}\"", state.topic),
        ));
        let planned = self.planner.plan(&metered, &state.topic, &clarifications).await;
        let mut batch = state.fresh_queries(planned, self.settings.max_queries_per_round);
        sink.record(Activity::complete(
            ActivityCategory::Planning,
            format!("Planned {} queries", batch.len()),
        ));

        state.iteration = 1;
        let stop_reason = loop {
            // -----------------------------------------------------------------
            // SEARCHING
            // -----------------------------------------------------------------
            phase = transition(phase, Phase::Searching, state.iteration);
            state.mark_executed(&batch);
            for q in &batch {
                sink.record(Activity::pending(
                    ActivityCategory::Search,
                    format!("Searching {}: {}", q.source, q.text),
                ));
            }

            let results: Vec<SearchResult> =
                join_all(batch.iter().map(|q| self.gateway.search(q))).await;

            for r in &results {
                if r.is_success() {
                    state.completed_steps += 1;
                }
                sink.record(search_activity(r));
            }

            // -----------------------------------------------------------------
            // SUMMARIZING
            // -----------------------------------------------------------------
            phase = transition(phase, Phase::Summarizing, state.iteration);
            let summarizable = results.iter().filter(|r| r.has_content()).count();
            if summarizable > 0 {
                sink.record(Activity::pending(
                    ActivityCategory::Summarize,
                    format!("Summarizing {summarizable} results"),
                ));
            }

            let iteration = state.iteration;
            let summaries = join_all(results.iter().map(|r| {
                self.summarizer
                    .summarize(&metered, r, &state.topic, &clarifications, iteration)
            }))
            .await;
            let new_findings: Vec<Finding> = summaries.into_iter().flatten().collect();

            if summarizable > 0 {
                let failed = summarizable - new_findings.len();
                let activity = if failed == 0 {
                    Activity::complete(
                        ActivityCategory::Summarize,
                        format!("Added {} findings", new_findings.len()),
                    )
                } else {
                    Activity::error(
                        ActivityCategory::Summarize,
                        format!(
                            "Added {} findings; {failed} summaries failed",
                            new_findings.len()
                        ),
                    )
                };
                sink.record(activity);
            }
            state.append_findings(new_findings);

            // -----------------------------------------------------------------
            // ANALYZING
            // -----------------------------------------------------------------
            phase = transition(phase, Phase::Analyzing, state.iteration);
            sink.record(Activity::pending(
                ActivityCategory::Analyze,
                format!(
                    "Evaluating {} findings (iteration {} of {max_iterations})",
                    state.findings().len(),
                    state.iteration
                ),
            ));
            let verdict = self
                .judge
                .judge(&metered, &state, state.iteration, max_iterations)
                .await;
            state.tokens_used = metered.tokens_used();
            state.last_gaps = verdict.gaps.clone();

            if verdict.sufficient {
                sink.record(Activity::complete(
                    ActivityCategory::Analyze,
                    "Findings are sufficient",
                ));
                break StopReason::Sufficient;
            }

            if state.iteration >= max_iterations {
                sink.record(Activity::complete(
                    ActivityCategory::Analyze,
                    format!("Reached the iteration limit ({max_iterations})"),
                ));
                break StopReason::IterationCap;
            }

            let next = state.fresh_queries(verdict.next_queries, self.settings.max_queries_per_round);
            if next.is_empty() {
                sink.record(Activity::complete(
                    ActivityCategory::Analyze,
                    "No new queries to run",
                ));
                break StopReason::NoNewQueries;
            }

            let gaps = if verdict.gaps.is_empty() {
                String::new()
            } else {
                format!("; gaps: {}", verdict.gaps.join("; "))
            };
            sink.record(Activity::complete(
                ActivityCategory::Analyze,
                format!("Continuing with {} new queries{gaps}", next.len()),
            ));

            state.iteration += 1;
            batch = next;
        };

        info!(
            iterations = state.iteration,
            findings = state.findings().len(),
            reason = ?stop_reason,
            "Research loop finished"
        );

        // ---------------------------------------------------------------------
        // REPORTING
        // ---------------------------------------------------------------------
        phase = transition(phase, Phase::Reporting, state.iteration);
        sink.record(Activity::pending(
            ActivityCategory::Report,
            format!("Writing report from {} findings", state.findings().len()),
        ));

        let compiled = self
            .reporter
            .compile(&metered, state.findings(), &state.topic, &clarifications)
            .await;
        state.tokens_used = metered.tokens_used();

        let (result, phase) = match compiled {
            Ok(report) => {
                sink.record(Activity::complete(ActivityCategory::Report, "Report ready"));
                (RunResult::Report(report), transition(phase, Phase::Done, state.iteration))
            }
            Err(e) => {
                warn!(error = %e, "Report generation failed");
                let message = format!("Research finished but the report could not be written: {e}");
                sink.record(Activity::error(ActivityCategory::Report, message.clone()));
                (
                    RunResult::Error(message),
                    transition(phase, Phase::DoneWithError, state.iteration),
                )
            }
        };

        RunOutcome {
            result,
            phase,
            stop_reason,
            iterations: state.iteration,
            completed_steps: state.completed_steps,
            tokens_used: state.tokens_used,
            executed_queries: state.previous_queries().to_vec(),
            findings: state.findings().to_vec(),
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================
fn transition(from: Phase, to: Phase, iteration: usize) -> Phase {
    debug!(?from, ?to, iteration, "Phase transition");
    to
}

fn search_activity(result: &SearchResult) -> Activity {
    let q = &result.query;
    match &result.status {
        ResultStatus::Ok => Activity::complete(
            ActivityCategory::Search,
            format!("{} search \"{}\": {} results", q.source, q.text, result.total_count),
        ),
        ResultStatus::NoCategories => Activity::complete(
            ActivityCategory::Search,
            format!("entity search \"{}\": no categories available", q.text),
        ),
        ResultStatus::Disabled => Activity::error(
            ActivityCategory::Search,
            format!("{} search \"{}\": backend not configured", q.source, q.text),
        ),
        ResultStatus::Failed { message, .. } => Activity::error(
            ActivityCategory::Search,
            format!("{} search \"{}\" failed: {message}", q.source, q.text),
        ),
    }
}
