//! End-to-end runs of the research loop against scripted model and
//! search backends.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use dual_source_research::activity::{ActivityCategory, ActivityStatus, MemorySink, RunEvent};
use dual_source_research::error::{BackendError, GenerationError};
use dual_source_research::llm::{Generator, OutputSchema};
use dual_source_research::research::report::{EXTERNAL_SOURCES_HEADING, INTERNAL_RESOURCES_HEADING};
use dual_source_research::research::{
    Clarification, LoopSettings, Phase, ResearchLoop, ResearchRequest, StopReason,
};
use dual_source_research::search::entity::{
    EntityRecord, EntitySearchBackend, EntitySearchRequest, EntitySearchResponse,
};
use dual_source_research::search::web::{WebHit, WebQueryOutcome, WebSearchBackend};
use dual_source_research::search::{
    GatewaySettings, ResultStatus, SearchGateway, SearchQuery, SearchSource,
};

// =============================================================================
// SCRIPTED MODEL
// =============================================================================

/// Answers each call site from a script and records every prompt.
#[derive(Default)]
struct ScriptedModel {
    /// `None` makes planning fail
    plan: Option<Value>,
    fail_summaries: bool,
    /// Popped once per judge call; an empty queue makes judging fail
    verdicts: Mutex<VecDeque<Value>>,
    /// `None` makes the report call fail
    report: Option<String>,
    prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedModel {
    fn new(plan: Option<Value>, verdicts: Vec<Value>, report: Option<&str>) -> Self {
        Self {
            plan,
            verdicts: Mutex::new(verdicts.into()),
            report: report.map(str::to_string),
            ..Default::default()
        }
    }

    fn failing_summaries(mut self) -> Self {
        self.fail_summaries = true;
        self
    }

    fn prompts_for(&self, call: &str) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == call)
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }
}

#[async_trait]
impl Generator for ScriptedModel {
    async fn generate_structured(
        &self,
        _system: &str,
        prompt: &str,
        schema: &OutputSchema,
    ) -> Result<Value, GenerationError> {
        self.prompts
            .lock()
            .unwrap()
            .push((schema.name.clone(), prompt.to_string()));

        let unavailable = || GenerationError::Completion("model unavailable".into());
        match schema.name.as_str() {
            "query_plan" => self.plan.clone().ok_or_else(unavailable),
            "summary" if self.fail_summaries => Err(unavailable()),
            "summary" => Ok(json!({ "summary": format!("Summary of {} prompt bytes", prompt.len()) })),
            "sufficiency" => self.verdicts.lock().unwrap().pop_front().ok_or_else(unavailable),
            other => panic!("unexpected structured call: {other}"),
        }
    }

    async fn generate_text(&self, _system: &str, prompt: &str) -> Result<String, GenerationError> {
        self.prompts
            .lock()
            .unwrap()
            .push(("report".to_string(), prompt.to_string()));
        self.report
            .clone()
            .ok_or_else(|| GenerationError::Completion("context window exceeded".into()))
    }
}

// =============================================================================
// SCRIPTED BACKENDS
// =============================================================================

/// Web backend keyed by query text; unknown queries get zero hits.
#[derive(Default)]
struct StubWeb {
    hits: HashMap<String, Vec<WebHit>>,
    fail: bool,
    calls: Mutex<Vec<String>>,
}

impl StubWeb {
    fn with(mut self, query: &str, url: &str, content: &str) -> Self {
        self.hits.entry(query.to_string()).or_default().push(WebHit {
            title: format!("Page about {query}"),
            url: url.to_string(),
            content: content.to_string(),
        });
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebSearchBackend for StubWeb {
    async fn search_batch(
        &self,
        queries: &[String],
        _max_results: usize,
    ) -> Result<Vec<WebQueryOutcome>, BackendError> {
        self.calls.lock().unwrap().extend(queries.iter().cloned());
        if self.fail {
            return Err(BackendError::Timeout);
        }
        Ok(queries
            .iter()
            .map(|q| WebQueryOutcome {
                query: q.clone(),
                success: true,
                results: self.hits.get(q).cloned().unwrap_or_default(),
                error: None,
            })
            .collect())
    }
}

/// Entity backend with one category; responses keyed by query text.
#[derive(Default)]
struct StubEntity {
    categories: Vec<String>,
    records: HashMap<String, Vec<EntityRecord>>,
    fail: bool,
    calls: Mutex<Vec<EntitySearchRequest>>,
}

impl StubEntity {
    fn with_categories(categories: &[&str]) -> Self {
        Self {
            categories: categories.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    fn with(mut self, query: &str, ids: &[(&str, &str)]) -> Self {
        let records = ids
            .iter()
            .map(|(id, name)| {
                let mut properties = Map::new();
                properties.insert("name".into(), json!(name));
                EntityRecord {
                    id: id.to_string(),
                    category: None,
                    properties,
                }
            })
            .collect();
        self.records.insert(query.to_string(), records);
        self
    }

    fn queried(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.query.clone())
            .collect()
    }
}

#[async_trait]
impl EntitySearchBackend for StubEntity {
    async fn list_categories(&self) -> Result<Vec<String>, BackendError> {
        if self.fail {
            return Err(BackendError::Connection("connection refused".into()));
        }
        Ok(self.categories.clone())
    }

    async fn search(
        &self,
        request: &EntitySearchRequest,
    ) -> Result<EntitySearchResponse, BackendError> {
        self.calls.lock().unwrap().push(request.clone());
        let results = self.records.get(&request.query).cloned().unwrap_or_default();
        Ok(EntitySearchResponse {
            total_count: results.len(),
            matched_categories: if results.is_empty() {
                vec![]
            } else {
                vec![request.category.clone()]
            },
            results,
            next_cursor: None,
        })
    }
}

fn research(
    model: Arc<ScriptedModel>,
    web: Option<Arc<StubWeb>>,
    entity: Option<Arc<StubEntity>>,
    max_iterations: usize,
) -> ResearchLoop {
    let web = web.map(|w| w as Arc<dyn WebSearchBackend>);
    let entity = entity.map(|e| e as Arc<dyn EntitySearchBackend>);
    ResearchLoop::new(
        model,
        SearchGateway::new(web, entity, GatewaySettings::default()),
        LoopSettings {
            max_iterations,
            max_queries_per_round: 5,
        },
    )
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[tokio::test]
async fn test_web_only_run_reports_external_sources_only() {
    let model = Arc::new(ScriptedModel::new(
        Some(json!({"queries": [
            {"query": "TypeScript best practices", "source": "web"},
            {"query": "TypeScript strict mode", "source": "web"},
            {"query": "TypeScript", "source": "entity"}
        ]})),
        vec![json!({"sufficient": true})],
        Some("## Executive Summary\nUse strict mode."),
    ));
    let web = Arc::new(
        StubWeb::default()
            .with("TypeScript best practices", "https://ts.dev/guide", "Prefer unknown over any")
            .with("TypeScript strict mode", "https://ts.dev/strict", "Enable strict"),
    );
    let entity = Arc::new(StubEntity::with_categories(&["Service"]));
    let sink = MemorySink::new();

    let outcome = research(model.clone(), Some(web), Some(entity.clone()), 3)
        .run(ResearchRequest::new("TypeScript best practices"), &sink)
        .await;

    let report = outcome.report().expect("report");
    assert!(report.starts_with("## Executive Summary"));
    assert!(report.contains(EXTERNAL_SOURCES_HEADING));
    assert!(report.contains("https://ts.dev/guide"));
    assert!(report.contains("https://ts.dev/strict"));
    assert!(!report.contains(INTERNAL_RESOURCES_HEADING));

    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.stop_reason, StopReason::Sufficient);
    assert_eq!(outcome.phase, Phase::Done);
    assert_eq!(outcome.findings.len(), 2);
    assert!(outcome.findings.iter().all(|f| f.source_kind == SearchSource::Web));
    // the zero-match entity search still counts as a completed step
    assert_eq!(outcome.completed_steps, 3);
    assert_eq!(entity.queried(), vec!["TypeScript"]);
    assert_eq!(model.prompts_for("summary").len(), 2);
    assert!(outcome.tokens_used > 0);
}

#[tokio::test]
async fn test_entity_follow_up_runs_literal_query() {
    let model = Arc::new(ScriptedModel::new(
        Some(json!({"queries": [{"query": "payment services", "source": "entity"}]})),
        vec![
            json!({
                "sufficient": false,
                "gaps": ["ownership of billing-api"],
                "next_queries": [{"query": "billing-api owners", "source": "entity"}]
            }),
            json!({"sufficient": true}),
        ],
        Some("## Executive Summary\nThree payment services."),
    ));
    let entity = Arc::new(
        StubEntity::with_categories(&["Service"])
            .with(
                "payment services",
                &[("e1", "billing-api"), ("e2", "ledger"), ("e3", "refunds")],
            )
            .with("billing-api owners", &[("e1", "billing-api")]),
    );
    let sink = MemorySink::new();

    let outcome = research(model.clone(), None, Some(entity.clone()), 3)
        .run(ResearchRequest::new("Payment architecture"), &sink)
        .await;

    assert_eq!(entity.queried(), vec!["payment services", "billing-api owners"]);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.stop_reason, StopReason::Sufficient);

    let report = outcome.report().expect("report");
    assert!(report.contains(INTERNAL_RESOURCES_HEADING));
    for id in ["`e1`", "`e2`", "`e3`"] {
        assert_eq!(report.matches(id).count(), 1, "{id} listed once");
    }

    let judge_prompts = model.prompts_for("sufficiency");
    assert_eq!(judge_prompts.len(), 2);
    assert!(judge_prompts[0].contains("Current iteration: 1 of 3"));
    assert!(judge_prompts[1].contains("Current iteration: 2 of 3"));
    assert!(judge_prompts[1].contains("ownership of billing-api"));
    assert!(judge_prompts[1].contains("[entity] payment services"));
    assert_eq!(
        sink.count(ActivityCategory::Analyze, ActivityStatus::Complete),
        2
    );
}

#[tokio::test]
async fn test_planner_failure_searches_raw_topic() {
    let model = Arc::new(ScriptedModel::new(
        None,
        vec![json!({"sufficient": true})],
        Some("Report"),
    ));
    let web = Arc::new(StubWeb::default().with("TypeScript best practices", "https://ts.dev", "x"));

    let outcome = research(model, Some(web.clone()), None, 3)
        .run(ResearchRequest::new("TypeScript best practices"), &MemorySink::new())
        .await;

    assert_eq!(web.calls(), vec!["TypeScript best practices"]);
    assert_eq!(
        outcome.executed_queries,
        vec![SearchQuery::web("TypeScript best practices")]
    );
    assert_eq!(outcome.report(), Some("Report\n\n## External Sources\n1. https://ts.dev\n"));
}

#[tokio::test]
async fn test_failed_summaries_still_reach_judge() {
    let model = Arc::new(
        ScriptedModel::new(
            Some(json!({"queries": [{"query": "rust", "source": "web"}]})),
            vec![json!({"sufficient": true})],
            Some("Report from general knowledge"),
        )
        .failing_summaries(),
    );
    let web = Arc::new(StubWeb::default().with("rust", "https://rust-lang.org", "Rust"));
    let sink = MemorySink::new();

    let outcome = research(model.clone(), Some(web), None, 3)
        .run(ResearchRequest::new("Rust"), &sink)
        .await;

    assert!(outcome.findings.is_empty());
    assert_eq!(model.prompts_for("sufficiency").len(), 1);
    assert!(model.prompts_for("sufficiency")[0].contains("Findings so far (0)"));
    assert_eq!(outcome.report(), Some("Report from general knowledge"));
    assert_eq!(sink.count(ActivityCategory::Summarize, ActivityStatus::Error), 1);
}

#[tokio::test]
async fn test_total_failure_still_ends_with_report() {
    for max_iterations in 1..=5 {
        let model = Arc::new(ScriptedModel::new(None, vec![], Some("Fallback report")));
        let web = Arc::new(StubWeb {
            fail: true,
            ..Default::default()
        });
        let entity = Arc::new(StubEntity {
            fail: true,
            ..Default::default()
        });

        let outcome = research(model, Some(web), Some(entity), max_iterations)
            .run(ResearchRequest::new("Rust"), &MemorySink::new())
            .await;

        assert!(outcome.iterations >= 1);
        assert!(outcome.iterations <= max_iterations);
        assert_eq!(outcome.completed_steps, 0);
        assert_eq!(outcome.report(), Some("Fallback report"));
    }
}

#[tokio::test]
async fn test_iteration_cap_forces_report() {
    let verdicts = (0..5)
        .map(|i| {
            json!({
                "sufficient": false,
                "next_queries": [{"query": format!("angle {i}"), "source": "web"}]
            })
        })
        .collect();
    let model = Arc::new(ScriptedModel::new(
        Some(json!({"queries": [{"query": "start", "source": "web"}]})),
        verdicts,
        Some("Partial report"),
    ));

    let outcome = research(model.clone(), Some(Arc::new(StubWeb::default())), None, 3)
        .run(ResearchRequest::new("Rust"), &MemorySink::new())
        .await;

    assert_eq!(outcome.iterations, 3);
    assert_eq!(outcome.stop_reason, StopReason::IterationCap);
    assert_eq!(model.prompts_for("sufficiency").len(), 3);
    assert_eq!(outcome.report(), Some("Partial report"));
}

#[tokio::test]
async fn test_near_cap_judge_failure_stops_before_hard_cap() {
    let model = Arc::new(ScriptedModel::new(
        Some(json!({"queries": [{"query": "rust", "source": "web"}]})),
        vec![],
        Some("Report"),
    ));

    let outcome = research(model.clone(), Some(Arc::new(StubWeb::default())), None, 3)
        .run(ResearchRequest::new("Rust"), &MemorySink::new())
        .await;

    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.stop_reason, StopReason::Sufficient);
    assert_eq!(
        outcome.executed_queries,
        vec![SearchQuery::web("rust"), SearchQuery::web("Rust overview")]
    );
}

#[tokio::test]
async fn test_repeated_follow_up_ends_loop() {
    let model = Arc::new(ScriptedModel::new(
        Some(json!({"queries": [{"query": "Rust async", "source": "web"}]})),
        vec![json!({
            "sufficient": false,
            "next_queries": [{"query": "  rust ASYNC ", "source": "web"}]
        })],
        Some("Report"),
    ));

    let outcome = research(model, Some(Arc::new(StubWeb::default())), None, 3)
        .run(ResearchRequest::new("Rust"), &MemorySink::new())
        .await;

    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.stop_reason, StopReason::NoNewQueries);
}

#[tokio::test]
async fn test_fresh_follow_up_survives_repeats_listed_first() {
    let mut next_queries: Vec<Value> = (0..5)
        .map(|_| json!({"query": "start", "source": "web"}))
        .collect();
    next_queries.push(json!({"query": "fresh angle", "source": "web"}));
    let model = Arc::new(ScriptedModel::new(
        Some(json!({"queries": [{"query": "start", "source": "web"}]})),
        vec![
            json!({"sufficient": false, "next_queries": next_queries}),
            json!({"sufficient": true}),
        ],
        Some("Report"),
    ));
    let web = Arc::new(StubWeb::default());

    let outcome = research(model, Some(web.clone()), None, 5)
        .run(ResearchRequest::new("Rust"), &MemorySink::new())
        .await;

    assert_eq!(web.calls(), vec!["start", "fresh angle"]);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.stop_reason, StopReason::Sufficient);
}

#[tokio::test]
async fn test_planned_variants_are_searched_once() {
    let model = Arc::new(ScriptedModel::new(
        Some(json!({"queries": [
            {"query": "Rust async", "source": "web"},
            {"query": "rust  ASYNC", "source": "web"}
        ]})),
        vec![json!({"sufficient": true})],
        Some("Report"),
    ));
    let web = Arc::new(
        StubWeb::default()
            .with("Rust async", "https://rust-lang.org/async", "async book")
            .with("rust  ASYNC", "https://rust-lang.org/async", "async book"),
    );

    let outcome = research(model, Some(web.clone()), None, 3)
        .run(ResearchRequest::new("Rust"), &MemorySink::new())
        .await;

    assert_eq!(web.calls(), vec!["Rust async"]);
    assert_eq!(outcome.findings.len(), 1);
    assert_eq!(outcome.executed_queries, vec![SearchQuery::web("Rust async")]);
}

#[tokio::test]
async fn test_planned_batch_is_capped_after_dedup() {
    let mut planned: Vec<Value> = vec![
        json!({"query": "q0", "source": "web"}),
        json!({"query": "Q0", "source": "web"}),
    ];
    planned.extend((1..8).map(|i| json!({"query": format!("q{i}"), "source": "web"})));
    let model = Arc::new(ScriptedModel::new(
        Some(json!({ "queries": planned })),
        vec![json!({"sufficient": true})],
        Some("Report"),
    ));
    let web = Arc::new(StubWeb::default());

    research(model, Some(web.clone()), None, 3)
        .run(ResearchRequest::new("Rust"), &MemorySink::new())
        .await;

    assert_eq!(web.calls(), vec!["q0", "q1", "q2", "q3", "q4"]);
}

#[tokio::test]
async fn test_clarifications_reach_every_prompt() {
    let model = Arc::new(ScriptedModel::new(
        Some(json!({"queries": [{"query": "billing", "source": "web"}]})),
        vec![json!({"sufficient": true})],
        Some("Report"),
    ));
    let web = Arc::new(StubWeb::default().with("billing", "https://example.com", "billing"));
    let request = ResearchRequest::new("Billing")
        .with_clarifications(vec![Clarification::new("Audience?", "Backend engineers")]);

    research(model.clone(), Some(web), None, 3)
        .run(request, &MemorySink::new())
        .await;

    for call in ["query_plan", "summary", "sufficiency", "report"] {
        let prompts = model.prompts_for(call);
        assert!(!prompts.is_empty(), "{call} was called");
        assert!(
            prompts.iter().all(|p| p.contains("Q: Audience?\nA: Backend engineers")),
            "{call} prompt carries clarifications"
        );
    }
}

#[tokio::test]
async fn test_report_failure_is_terminal_error() {
    let model = Arc::new(ScriptedModel::new(
        Some(json!({"queries": [{"query": "rust", "source": "web"}]})),
        vec![json!({"sufficient": true})],
        None,
    ));
    let research = Arc::new(research(model, Some(Arc::new(StubWeb::default())), None, 3));

    let outcome = research
        .run(ResearchRequest::new("Rust"), &MemorySink::new())
        .await;
    assert_eq!(outcome.phase, Phase::DoneWithError);
    assert!(outcome.error().unwrap().contains("context window exceeded"));

    let mut rx = research.start(ResearchRequest::new("Rust"));
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    match events.last() {
        Some(RunEvent::Error(message)) => assert!(message.contains("context window exceeded")),
        other => panic!("expected terminal error, got {other:?}"),
    }
}

// =============================================================================
// GATEWAY PROPERTIES
// =============================================================================

#[tokio::test]
async fn test_gateway_content_is_capped_deterministically() {
    let long = "é".repeat(20_000);
    let web = Arc::new(StubWeb::default().with("big", "https://big.example", &long));
    let gateway = SearchGateway::new(
        Some(web as Arc<dyn WebSearchBackend>),
        None,
        GatewaySettings::default(),
    );

    let first = gateway.search(&SearchQuery::web("big")).await;
    let second = gateway.search(&SearchQuery::web("big")).await;

    assert!(first.content.len() <= 15_000);
    assert_eq!(first.content.len(), second.content.len());
    assert_eq!(first.status, ResultStatus::Ok);
}

#[tokio::test]
async fn test_gateway_reports_missing_categories() {
    let entity = Arc::new(StubEntity::default());
    let gateway = SearchGateway::new(
        None,
        Some(entity as Arc<dyn EntitySearchBackend>),
        GatewaySettings::default(),
    );

    let result = gateway.search(&SearchQuery::entity("anything")).await;

    assert_eq!(result.status, ResultStatus::NoCategories);
    assert_eq!(result.total_count, 0);
    assert!(result.content.contains("\"noCategories\":true"));
}
