//! Batch web-search backend.
//!
//! The service takes a batch of query strings and answers with one
//! success/failure entry per query. Some deployments wrap that payload in
//! an extra named field (`{"data": {...}}`); one such layer is unwrapped.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::BackendError;

/// Field names a backend may use to wrap the real payload.
const ENVELOPE_FIELDS: &[&str] = &["data", "result", "response", "output"];

/// One web page returned for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, alias = "snippet", alias = "text")]
    pub content: String,
}

/// Per-query entry of a batch response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebQueryOutcome {
    #[serde(default)]
    pub query: String,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub results: Vec<WebHit>,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_success() -> bool {
    true
}

/// A batch web-search service.
#[async_trait]
pub trait WebSearchBackend: Send + Sync {
    async fn search_batch(
        &self,
        queries: &[String],
        max_results: usize,
    ) -> Result<Vec<WebQueryOutcome>, BackendError>;
}

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    queries: &'a [String],
    max_results: usize,
}

/// HTTP client for the batch web-search service.
pub struct HttpWebSearch {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpWebSearch {
    pub fn new(client: Client, endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl WebSearchBackend for HttpWebSearch {
    async fn search_batch(
        &self,
        queries: &[String],
        max_results: usize,
    ) -> Result<Vec<WebQueryOutcome>, BackendError> {
        debug!(endpoint = %self.endpoint, batch = queries.len(), "Calling web search");

        let mut request = self.client.post(&self.endpoint).json(&BatchRequest {
            queries,
            max_results,
        });
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await.map_err(BackendError::from_transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status.as_u16(), body));
        }

        let body: Value = response.json().await.map_err(BackendError::from_transport)?;
        parse_batch_response(body)
    }
}

/// Strip at most one envelope layer.
fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if !map.contains_key("results") => {
            for field in ENVELOPE_FIELDS {
                if matches!(map.get(*field), Some(Value::Object(_) | Value::Array(_))) {
                    if let Some(inner) = map.remove(*field) {
                        return inner;
                    }
                }
            }
            Value::Object(map)
        }
        other => other,
    }
}

/// Decode a batch response: either a bare array of outcomes or an object
/// with a `results` array, optionally inside one envelope.
pub fn parse_batch_response(body: Value) -> Result<Vec<WebQueryOutcome>, BackendError> {
    let payload = unwrap_envelope(body);
    let entries = match payload {
        Value::Array(items) => Value::Array(items),
        Value::Object(mut map) => map
            .remove("results")
            .ok_or_else(|| BackendError::Parse("missing `results` field".to_string()))?,
        other => {
            return Err(BackendError::Parse(format!(
                "unexpected response shape: {other}"
            )))
        }
    };
    serde_json::from_value(entries).map_err(|e| BackendError::Parse(e.to_string()))
}

/// Render hits as markdown for the summarizer.
pub fn format_hits(query: &str, hits: &[WebHit]) -> String {
    if hits.is_empty() {
        return format!("No web results found for: {query}");
    }
    let body = hits
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{}. **{}**\n   URL: {}\n   {}\n", i + 1, h.title, h.url, h.content))
        .collect::<Vec<_>>()
        .join("\n");
    format!("## Web Results for: {query}\n\n{body}")
}
