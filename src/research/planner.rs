//! Query planner: produces the first batch of (query, source) pairs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::llm::{generate, Generator};
use crate::research::prompts::ResearchPrompts;
use crate::search::{SearchQuery, SearchSource};

/// A query as the model proposes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlannedQuery {
    /// The search text
    pub query: String,
    /// `web` for public information, `entity` for internal records
    pub source: SearchSource,
    /// Optional internal category name (entity queries only)
    #[serde(default)]
    pub category: Option<String>,
}

impl From<PlannedQuery> for SearchQuery {
    fn from(p: PlannedQuery) -> Self {
        let query = SearchQuery {
            text: p.query.trim().to_string(),
            source: p.source,
            category: None,
        };
        match (p.source, p.category) {
            (SearchSource::Entity, Some(c)) if !c.trim().is_empty() => {
                query.with_category(c.trim())
            }
            _ => query,
        }
    }
}

/// Structured output of the planning call.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QueryPlan {
    /// Search queries to run first
    pub queries: Vec<PlannedQuery>,
}

/// Convert model-proposed queries, dropping blanks.
///
/// Duplicates and the per-round cap are left to
/// `ResearchState::fresh_queries`, which drops repeats before it caps.
pub fn to_search_queries(planned: Vec<PlannedQuery>) -> Vec<SearchQuery> {
    planned
        .into_iter()
        .map(SearchQuery::from)
        .filter(|q| !q.text.is_empty())
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct Planner {
    max_queries: usize,
}

impl Planner {
    pub fn new(max_queries: usize) -> Self {
        Self { max_queries }
    }

    /// Plan the first batch. Never fails: on any model error, or an empty
    /// plan, the batch is a single web query equal to the raw topic.
    pub async fn plan(
        &self,
        generator: &dyn Generator,
        topic: &str,
        clarifications: &str,
    ) -> Vec<SearchQuery> {
        let system = ResearchPrompts::planner_system(self.max_queries);
        let prompt = ResearchPrompts::planner_task(topic, clarifications, self.max_queries);

        match generate::<QueryPlan>(generator, "query_plan", &system, &prompt).await {
            Ok(plan) => {
                let queries = to_search_queries(plan.queries);
                if queries.is_empty() {
                    warn!("Planner returned no usable queries, falling back to topic");
                    return Self::fallback(topic);
                }
                info!(count = queries.len(), "Planned initial queries");
                queries
            }
            Err(e) => {
                warn!(error = %e, "Planning failed, falling back to topic");
                Self::fallback(topic)
            }
        }
    }

    pub fn fallback(topic: &str) -> Vec<SearchQuery> {
        vec![SearchQuery::web(topic)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::llm::OutputSchema;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct ScriptedPlanner(Result<Value, ()>);

    #[async_trait]
    impl Generator for ScriptedPlanner {
        async fn generate_structured(
            &self,
            _system: &str,
            _prompt: &str,
            schema: &OutputSchema,
        ) -> Result<Value, GenerationError> {
            assert_eq!(schema.name, "query_plan");
            self.0
                .clone()
                .map_err(|_| GenerationError::Completion("model offline".into()))
        }

        async fn generate_text(&self, _: &str, _: &str) -> Result<String, GenerationError> {
            unreachable!("planner never asks for free text")
        }
    }

    #[tokio::test]
    async fn test_plan_uses_model_output() {
        let generator = ScriptedPlanner(Ok(json!({"queries": [
            {"query": "rust async runtimes", "source": "web"},
            {"query": "payments", "source": "entity", "category": "Service"}
        ]})));

        let queries = Planner::new(5).plan(&generator, "Rust", "").await;
        assert_eq!(
            queries,
            vec![
                SearchQuery::web("rust async runtimes"),
                SearchQuery::entity("payments").with_category("Service"),
            ]
        );
    }

    #[tokio::test]
    async fn test_plan_leaves_capping_to_the_loop() {
        let many: Vec<Value> = (0..9)
            .map(|i| json!({"query": format!("q{i}"), "source": "web"}))
            .collect();
        let generator = ScriptedPlanner(Ok(json!({ "queries": many })));

        let queries = Planner::new(5).plan(&generator, "Rust", "").await;
        assert_eq!(queries.len(), 9);
    }

    #[tokio::test]
    async fn test_plan_failure_falls_back_to_raw_topic() {
        let generator = ScriptedPlanner(Err(()));
        let queries = Planner::new(5).plan(&generator, "TypeScript best practices", "").await;
        assert_eq!(queries, vec![SearchQuery::web("TypeScript best practices")]);
    }

    #[tokio::test]
    async fn test_empty_plan_falls_back_to_raw_topic() {
        let generator = ScriptedPlanner(Ok(json!({"queries": [{"query": "  ", "source": "web"}]})));
        let queries = Planner::new(5).plan(&generator, "Rust", "").await;
        assert_eq!(queries, vec![SearchQuery::web("Rust")]);
    }

    #[test]
    fn test_category_ignored_for_web_queries() {
        let q: SearchQuery = PlannedQuery {
            query: "rust".into(),
            source: SearchSource::Web,
            category: Some("Service".into()),
        }
        .into();
        assert_eq!(q.category, None);
    }
}
