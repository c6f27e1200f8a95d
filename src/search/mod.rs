//! # Search Gateway
//!
//! One uniform `search(query) -> SearchResult` over two very different
//! backends: a public batch web-search service and the internal
//! structured-entity store.
//!
//! The gateway never fails. Missing configuration, transport errors and
//! backend-reported failures all come back as a `SearchResult` whose
//! `status` says what happened and whose `content` carries a structured
//! error description, so the summarizer always has a value to look at.
//!
//! Every result's `content` is cut to the configured byte budget before it
//! leaves the gateway.

pub mod entity;
pub mod web;

use futures::future::join_all;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::BackendError;
use entity::{EntityRecord, EntitySearchBackend, EntitySearchRequest, EntitySearchResponse};
use web::{WebHit, WebSearchBackend};

// =============================================================================
// QUERY TYPES
// =============================================================================
/// Which backend a query is routed to.
///
/// # Rust Concept: Serde Enum Renaming
///
/// `rename_all = "lowercase"` lets the model write `"web"` or `"entity"`
/// in its structured output and still land on a typed variant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    /// Public web search
    Web,
    /// Internal structured-entity store
    Entity,
}

impl SearchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchSource::Web => "web",
            SearchSource::Entity => "entity",
        }
    }
}

impl std::fmt::Display for SearchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A query routed to one source. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    pub source: SearchSource,
    /// Explicit entity category; only meaningful for `Entity` queries
    pub category: Option<String>,
}

impl SearchQuery {
    pub fn web(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: SearchSource::Web,
            category: None,
        }
    }

    pub fn entity(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: SearchSource::Entity,
            category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Source plus case- and whitespace-insensitive text.
    pub fn dedup_key(&self) -> (SearchSource, String) {
        let normalized = self
            .text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        (self.source, normalized)
    }
}

// =============================================================================
// SEARCH RESULTS
// =============================================================================
/// How a search call ended.
///
/// # Rust Concept: Enums Carrying Data
///
/// `Failed` holds the error kind and message right in the variant, so a
/// caller that matches on the status gets the details without a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultStatus {
    /// The backend answered (possibly with zero matches)
    Ok,
    /// The backend is not configured; content is a labeled placeholder
    Disabled,
    /// Entity auto-discovery found no categories to search
    NoCategories,
    /// The call failed; content carries the structured error
    Failed { kind: String, message: String },
}

/// Normalized output of one gateway call.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub query: SearchQuery,
    pub title: String,
    /// URL for web results, a descriptive label for entity results
    pub label: String,
    /// Raw, source-specific content, at most `max_content_chars` bytes
    pub content: String,
    pub total_count: usize,
    /// URLs (web) or entity identifiers (entity)
    pub references: Vec<String>,
    pub status: ResultStatus,
}

impl SearchResult {
    /// Whether the backend call itself succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self.status, ResultStatus::Ok | ResultStatus::NoCategories)
    }

    /// Whether there is anything worth summarizing.
    pub fn has_content(&self) -> bool {
        self.status == ResultStatus::Ok && self.total_count > 0 && !self.content.trim().is_empty()
    }

    fn failed(query: &SearchQuery, error: &BackendError, max_bytes: usize) -> Self {
        let content = json!({
            "query": query.text,
            "source": query.source,
            "error": { "kind": error.kind(), "message": error.to_string() },
        })
        .to_string();

        Self {
            query: query.clone(),
            title: format!("{} search failed", query.source),
            label: format!("{}: {}", query.source, query.text),
            content: truncate_content(content, max_bytes),
            total_count: 0,
            references: vec![],
            status: ResultStatus::Failed {
                kind: error.kind().to_string(),
                message: error.to_string(),
            },
        }
    }

    /// Labeled placeholder for a backend that was never configured.
    fn disabled(query: &SearchQuery, what: &'static str, max_bytes: usize) -> Self {
        let error = BackendError::NotConfigured(what);
        let content = json!({
            "query": query.text,
            "source": query.source,
            "disabled": true,
            "message": format!("[{what} disabled] no results were retrieved"),
            "error": { "kind": error.kind(), "message": error.to_string() },
        })
        .to_string();
        Self {
            query: query.clone(),
            title: format!("{what} disabled"),
            label: format!("{}: {}", query.source, query.text),
            content: truncate_content(content, max_bytes),
            total_count: 0,
            references: vec![],
            status: ResultStatus::Disabled,
        }
    }
}

/// Cut `content` to at most `max_bytes` bytes, backing off to the nearest
/// char boundary so the result stays valid UTF-8.
pub fn truncate_content(mut content: String, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content;
    }
    let mut cut = max_bytes;
    while cut > 0 && !content.is_char_boundary(cut) {
        cut -= 1;
    }
    content.truncate(cut);
    content
}

// =============================================================================
// SEARCH GATEWAY
// =============================================================================
/// Gateway limits, taken from `Config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewaySettings {
    pub max_content_chars: usize,
    pub max_discovered_categories: usize,
    pub max_results: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            max_content_chars: 15_000,
            max_discovered_categories: 5,
            max_results: 10,
        }
    }
}

/// Uniform search front over the injected backends.
///
/// A `None` backend is "not configured" and yields a placeholder result.
///
/// # Rust Concept: Trait Objects Behind `Arc`
///
/// `Arc<dyn WebSearchBackend>` lets the CLI plug in the HTTP client while
/// tests plug in a stub. Cloning the gateway only bumps reference counts.
#[derive(Clone)]
pub struct SearchGateway {
    web: Option<Arc<dyn WebSearchBackend>>,
    entity: Option<Arc<dyn EntitySearchBackend>>,
    settings: GatewaySettings,
}

impl SearchGateway {
    pub fn new(
        web: Option<Arc<dyn WebSearchBackend>>,
        entity: Option<Arc<dyn EntitySearchBackend>>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            web,
            entity,
            settings,
        }
    }

    /// Run one query against its backend. Never fails.
    pub async fn search(&self, query: &SearchQuery) -> SearchResult {
        info!(query = %query.text, source = %query.source, "Dispatching search");
        let result = match query.source {
            SearchSource::Web => self.search_web(query).await,
            SearchSource::Entity => self.search_entity(query).await,
        };
        debug!(
            query = %query.text,
            status = ?result.status,
            total = result.total_count,
            bytes = result.content.len(),
            "Search finished"
        );
        result
    }

    // -------------------------------------------------------------------------
    // Web
    // -------------------------------------------------------------------------

    async fn search_web(&self, query: &SearchQuery) -> SearchResult {
        let max = self.settings.max_content_chars;
        let Some(backend) = &self.web else {
            warn!("Web search requested but no backend is configured");
            return SearchResult::disabled(query, "Web search", max);
        };

        let batch = [query.text.clone()];
        let outcomes = match backend.search_batch(&batch, self.settings.max_results).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(query = %query.text, error = %e, "Web search failed");
                return SearchResult::failed(query, &e, max);
            }
        };

        let Some(outcome) = outcomes.into_iter().next() else {
            let e = BackendError::Parse("batch response contained no entries".to_string());
            return SearchResult::failed(query, &e, max);
        };

        if !outcome.success {
            let message = outcome
                .error
                .unwrap_or_else(|| "unspecified failure".to_string());
            warn!(query = %query.text, error = %message, "Web search reported failure");
            return SearchResult::failed(query, &BackendError::Backend(message), max);
        }

        let hits: Vec<WebHit> = outcome
            .results
            .into_iter()
            .take(self.settings.max_results)
            .collect();

        SearchResult {
            query: query.clone(),
            title: hits
                .first()
                .map(|h| h.title.clone())
                .unwrap_or_else(|| query.text.clone()),
            label: hits
                .first()
                .map(|h| h.url.clone())
                .unwrap_or_else(|| format!("web: {}", query.text)),
            content: truncate_content(web::format_hits(&query.text, &hits), max),
            total_count: hits.len(),
            references: hits.iter().map(|h| h.url.clone()).collect(),
            status: ResultStatus::Ok,
        }
    }

    // -------------------------------------------------------------------------
    // Entity
    // -------------------------------------------------------------------------

    async fn search_entity(&self, query: &SearchQuery) -> SearchResult {
        let max = self.settings.max_content_chars;
        let Some(backend) = &self.entity else {
            warn!("Entity search requested but no backend is configured");
            return SearchResult::disabled(query, "Entity search", max);
        };

        // An explicit category stays scoped to that category.
        if let Some(category) = &query.category {
            let request = EntitySearchRequest {
                query: query.text.clone(),
                category: category.clone(),
                limit: self.settings.max_results,
                auto_discover: false,
            };
            return match backend.search(&request).await {
                Ok(response) => self.entity_result(query, response, vec![category.clone()]),
                Err(e) => {
                    warn!(query = %query.text, category = %category, error = %e, "Entity search failed");
                    SearchResult::failed(query, &e, max)
                }
            };
        }

        let categories = match backend.list_categories().await {
            Ok(categories) => categories,
            Err(e) => {
                warn!(error = %e, "Entity category discovery failed");
                return SearchResult::failed(query, &e, max);
            }
        };

        if categories.is_empty() {
            info!(query = %query.text, "Entity store has no categories");
            return self.no_categories(query);
        }

        let searched: Vec<String> = categories
            .into_iter()
            .take(self.settings.max_discovered_categories)
            .collect();
        debug!(categories = ?searched, "Auto-discovered entity categories");

        let calls = searched.iter().map(|category| {
            let request = EntitySearchRequest {
                query: query.text.clone(),
                category: category.clone(),
                limit: self.settings.max_results,
                auto_discover: true,
            };
            async move { (category.clone(), backend.search(&request).await) }
        });

        let mut union = EntitySearchResponse::default();
        let mut seen_ids = HashSet::new();
        let mut succeeded = 0usize;
        let mut last_error = None;

        for (category, outcome) in join_all(calls).await {
            match outcome {
                Ok(response) => {
                    succeeded += 1;
                    union.total_count += response.total_count;
                    for matched in response.matched_categories {
                        if !union.matched_categories.contains(&matched) {
                            union.matched_categories.push(matched);
                        }
                    }
                    for mut record in response.results {
                        if union.results.len() >= self.settings.max_results {
                            break;
                        }
                        if record.category.is_none() {
                            record.category = Some(category.clone());
                        }
                        if seen_ids.insert(record.id.clone()) {
                            union.results.push(record);
                        }
                    }
                }
                // Failing categories drop out of the union silently.
                Err(e) => {
                    warn!(category = %category, error = %e, "Entity category search failed");
                    last_error = Some(e);
                }
            }
        }

        if succeeded == 0 {
            if let Some(e) = last_error {
                return SearchResult::failed(query, &e, max);
            }
        }

        self.entity_result(query, union, searched)
    }

    fn no_categories(&self, query: &SearchQuery) -> SearchResult {
        let content = json!({
            "query": query.text,
            "totalCount": 0,
            "matchedCategories": [],
            "entities": [],
            "noCategories": true,
            "message": "No entity categories are available to search",
        })
        .to_string();

        SearchResult {
            query: query.clone(),
            title: format!("Entity search: {}", query.text),
            label: "Internal entities: no categories".to_string(),
            content: truncate_content(content, self.settings.max_content_chars),
            total_count: 0,
            references: vec![],
            status: ResultStatus::NoCategories,
        }
    }

    fn entity_result(
        &self,
        query: &SearchQuery,
        response: EntitySearchResponse,
        searched: Vec<String>,
    ) -> SearchResult {
        let references: Vec<String> = response.results.iter().map(|r| r.id.clone()).collect();
        let label = if response.matched_categories.is_empty() {
            format!("Internal entities: {}", searched.join(", "))
        } else {
            format!("Internal entities: {}", response.matched_categories.join(", "))
        };
        let total_count = response.total_count.max(response.results.len());

        SearchResult {
            query: query.clone(),
            title: format!("Entity search: {}", query.text),
            label,
            content: truncate_content(
                entity_content(&query.text, &response, &searched),
                self.settings.max_content_chars,
            ),
            total_count,
            references,
            status: ResultStatus::Ok,
        }
    }
}

// =============================================================================
// CONTENT FORMATTING
// =============================================================================
/// Serialize an entity listing the way the summarizer expects it.
fn entity_content(query: &str, response: &EntitySearchResponse, searched: &[String]) -> String {
    let entities: Vec<serde_json::Value> = response
        .results
        .iter()
        .map(|EntityRecord { id, category, properties }| {
            json!({ "id": id, "category": category, "properties": properties })
        })
        .collect();

    json!({
        "query": query,
        "totalCount": response.total_count.max(response.results.len()),
        "matchedCategories": response.matched_categories,
        "searchedCategories": searched,
        "entities": entities,
    })
    .to_string()
}
