//! Report compiler: the single free-form generation call at the end of a run.

use tracing::{info, warn};

use crate::error::ResearchError;
use crate::llm::Generator;
use crate::research::prompts::ResearchPrompts;
use crate::research::state::Finding;
use crate::search::SearchSource;

pub const EXTERNAL_SOURCES_HEADING: &str = "## External Sources";
pub const INTERNAL_RESOURCES_HEADING: &str = "## Internal Resources";

#[derive(Debug, Default, Clone, Copy)]
pub struct ReportCompiler;

impl ReportCompiler {
    pub fn new() -> Self {
        Self
    }

    /// Generate the report body and append the source sections.
    ///
    /// Works with zero findings: the model is told to fall back on general
    /// knowledge. The Internal Resources section appears only when at least
    /// one finding came from the entity store.
    pub async fn compile(
        &self,
        generator: &dyn Generator,
        findings: &[Finding],
        topic: &str,
        clarifications: &str,
    ) -> Result<String, ResearchError> {
        let system = ResearchPrompts::report_system();
        let prompt = ResearchPrompts::report_task(topic, clarifications, findings);

        let body = generator.generate_text(&system, &prompt).await?;
        let body = body.trim();
        if body.is_empty() {
            warn!("Report generation returned no text");
            return Err(ResearchError::EmptyReport);
        }

        let report = format!("{body}{}", source_sections(findings));
        info!(findings = findings.len(), chars = report.len(), "Report compiled");
        Ok(report)
    }
}

/// Build the appended source lists, deduplicated in first-seen order.
pub fn source_sections(findings: &[Finding]) -> String {
    let mut web: Vec<&str> = Vec::new();
    let mut internal: Vec<String> = Vec::new();
    let mut seen_ids: Vec<&str> = Vec::new();

    for f in findings {
        match f.source_kind {
            SearchSource::Web => {
                for url in &f.references {
                    if !web.contains(&url.as_str()) {
                        web.push(url);
                    }
                }
            }
            SearchSource::Entity => {
                for id in &f.references {
                    if !seen_ids.contains(&id.as_str()) {
                        seen_ids.push(id);
                        internal.push(format!("`{id}` ({})", f.source));
                    }
                }
                if f.references.is_empty() {
                    internal.push(f.source.clone());
                }
            }
        }
    }

    let mut out = String::new();
    if !web.is_empty() {
        out.push_str(&format!("\n\n{EXTERNAL_SOURCES_HEADING}\n"));
        for (i, url) in web.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, url));
        }
    }
    if !internal.is_empty() {
        out.push_str(&format!("\n\n{INTERNAL_RESOURCES_HEADING}\n"));
        for line in &internal {
            out.push_str(&format!("- {line}\n"));
        }
    }
    out
}
