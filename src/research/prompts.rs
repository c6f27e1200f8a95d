//! Prompt templates for the four generation call sites.
//!
//! Each call site gets a system instruction and a task prompt. The
//! decision policies (how many queries, when research is "enough") live
//! here as instructions to the model, not as branching in code.

use chrono::Utc;

use crate::research::state::Finding;
use crate::search::{SearchQuery, SearchSource};

/// Prompt templates for the research loop
pub struct ResearchPrompts;

impl ResearchPrompts {
    fn current_date() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    fn clarification_block(clarifications: &str) -> String {
        if clarifications.trim().is_empty() {
            "No clarifications were provided.".to_string()
        } else {
            clarifications.to_string()
        }
    }

    // =========================================================================
    // PLANNER
    // =========================================================================

    pub fn planner_system(max_queries: usize) -> String {
        format!(
            r#"# Research Planner

For context, today's date is {date}.

You plan the first round of searches for a research task. Two sources are available:

| Source | Use it for |
|--------|-----------|
| `web` | Public information: documentation, articles, news, general knowledge |
| `entity` | The organization's internal records: services, teams, projects, documents and other named entities |

## Guidelines
- Produce at most {max_queries} queries.
- Each query answers ONE specific question; avoid vague queries.
- Use `entity` only when internal records could plausibly be relevant to the topic.
- Entity queries should be short keyword phrases (names, identifiers), not sentences.
- Leave `category` empty unless you are certain of the internal category name.
"#,
            date = Self::current_date(),
            max_queries = max_queries
        )
    }

    pub fn planner_task(topic: &str, clarifications: &str, max_queries: usize) -> String {
        format!(
            "Research topic:\n{topic}\n\nClarifications:\n{}\n\nPlan up to {max_queries} \
             search queries, each tagged with its source (`web` or `entity`).",
            Self::clarification_block(clarifications)
        )
    }

    // =========================================================================
    // SUMMARIZER
    // =========================================================================

    pub fn summarizer_system() -> String {
        r#"# Research Summarizer

You condense raw search content into a compact finding for a research report.

## Interpreting the content
- **Web results** arrive as markdown: numbered results with a title, a URL and a snippet.
  Summarize the facts they state that bear on the topic.
- **Internal entity results** arrive as JSON with `totalCount`, `matchedCategories` and an
  `entities` array; each entity has an `id` and a `properties` map. Mention how many entities
  matched, name the most relevant ones WITH their `id`, and state the properties that matter
  for the topic.

## Rules
- Keep only information relevant to the topic and the clarifications.
- Be factual and concise: 3-8 sentences.
- Never invent facts that are not in the content.
- Do not use self-referential language ("I found...").
"#
        .to_string()
    }

    pub fn summarizer_task(
        content: &str,
        topic: &str,
        clarifications: &str,
        source: SearchSource,
        label: &str,
    ) -> String {
        format!(
            "Topic:\n{topic}\n\nClarifications:\n{}\n\nSource ({source}): {label}\n\n\
             Content:\n<content>\n{content}\n</content>\n\nReturn the summary.",
            Self::clarification_block(clarifications)
        )
    }

    // =========================================================================
    // JUDGE
    // =========================================================================

    pub fn judge_system(max_queries: usize) -> String {
        format!(
            r#"# Research Sufficiency Judge

For context, today's date is {date}.

You decide whether the findings collected so far are enough to write a useful report.

## Policy
- Judge practically: "enough for a useful report", not "complete". Perfect coverage is never required.
- If they are enough, set `sufficient` to true and leave `next_queries` empty.
- Otherwise list the concrete `gaps` and propose at most {max_queries} NEW queries that close them.
- Never repeat a query that was already executed.
- Tag every query with its source: `web` for public information, `entity` for internal records.
- When a finding names an internal entity, a follow-up `entity` query may use that entity's name.
- The closer the current iteration is to the maximum, the more lenient you must be.
"#,
            date = Self::current_date(),
            max_queries = max_queries
        )
    }

    pub fn judge_task(
        topic: &str,
        clarifications: &str,
        findings: &[Finding],
        previous_queries: &[SearchQuery],
        previous_gaps: &[String],
        iteration: usize,
        max_iterations: usize,
    ) -> String {
        let executed = if previous_queries.is_empty() {
            "(none)".to_string()
        } else {
            previous_queries
                .iter()
                .map(|q| format!("- [{}] {}", q.source, q.text))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let gaps = if previous_gaps.is_empty() {
            String::new()
        } else {
            format!(
                "\n\nGaps identified in the previous round:\n{}",
                previous_gaps
                    .iter()
                    .map(|g| format!("- {g}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            )
        };

        format!(
            "Topic:\n{topic}\n\nClarifications:\n{}\n\nCurrent iteration: {iteration} of \
             {max_iterations}\n{}\n\nFindings so far ({count}):\n{}\n\nQueries already \
             executed:\n{executed}{gaps}\n\nDecide whether research is sufficient.",
            Self::clarification_block(clarifications),
            Self::leniency_hint(iteration, max_iterations),
            Self::numbered_findings(findings),
            count = findings.len(),
        )
    }

    /// Whether the judge is close enough to the cap to lean towards stopping.
    pub fn near_cap(iteration: usize, max_iterations: usize) -> bool {
        iteration + 1 >= max_iterations
    }

    fn leniency_hint(iteration: usize, max_iterations: usize) -> &'static str {
        if Self::near_cap(iteration, max_iterations) {
            "This is the final or next-to-final iteration. Set `sufficient` to true unless the \
             findings are empty or entirely off-topic."
        } else {
            "There is room for more iterations; request more only for gaps that matter."
        }
    }

    // =========================================================================
    // REPORT
    // =========================================================================

    pub fn report_system() -> String {
        format!(
            r#"# Research Report Writer

For context, today's date is {date}.

You write the final research report from the collected findings.

## Structure
Use these section markers, in order:
- `## Executive Summary`
- `## Key Findings`
- `## Analysis`
- `## Conclusion`

## Guidelines
- Cite findings inline with their number, e.g. [1], [2].
- Findings from internal entity records must keep their entity identifiers.
- Write in paragraph form; use bullet points sparingly.
- Do NOT write a sources or references list; it is appended automatically.
- Do NOT use self-referential language ("I found...", "I researched...").
"#,
            date = Self::current_date()
        )
    }

    pub fn report_task(topic: &str, clarifications: &str, findings: &[Finding]) -> String {
        let body = if findings.is_empty() {
            "No findings were collected: every search came back empty or failed. Write the \
             report from general domain knowledge, and say plainly in the Executive Summary \
             that it is not backed by retrieved sources."
                .to_string()
        } else {
            format!(
                "Findings ({}):\n{}",
                findings.len(),
                Self::numbered_findings(findings)
            )
        };

        format!(
            "Topic:\n{topic}\n\nClarifications:\n{}\n\n{body}\n\nWrite the report.",
            Self::clarification_block(clarifications)
        )
    }

    fn numbered_findings(findings: &[Finding]) -> String {
        if findings.is_empty() {
            return "(none)".to_string();
        }
        findings
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let refs = if f.references.is_empty() {
                    String::new()
                } else {
                    format!(" (refs: {})", f.references.join(", "))
                };
                format!(
                    "[{}] ({}) {}{}\n{}",
                    i + 1,
                    f.source_kind,
                    f.source,
                    refs,
                    f.summary
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
