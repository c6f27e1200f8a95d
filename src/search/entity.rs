//! Internal structured-entity store backend.
//!
//! Entities are grouped into categories (object types). The store offers
//! a category listing and a search call scoped to one category. The
//! gateway picks the category: either the caller's explicit one, or each
//! of the first few categories found by auto-discovery.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::BackendError;

// =============================================================================
// WIRE TYPES
// =============================================================================
/// One search call against the entity store.
///
/// # Rust Concept: Plain data across an async seam
///
/// The request owns its strings, so a backend can hold `&request` across
/// `.await` points without borrowing from the gateway's query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySearchRequest {
    pub query: String,
    pub category: String,
    pub limit: usize,
    /// True when `category` was chosen by auto-discovery rather than the caller
    pub auto_discover: bool,
}

/// A matched entity: identifier plus its property map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySearchResponse {
    #[serde(default)]
    pub total_count: usize,
    #[serde(default)]
    pub matched_categories: Vec<String>,
    #[serde(default)]
    pub results: Vec<EntityRecord>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

// =============================================================================
// BACKEND TRAIT
// =============================================================================
/// The entity store.
#[async_trait]
pub trait EntitySearchBackend: Send + Sync {
    /// Names of the known categories.
    async fn list_categories(&self) -> Result<Vec<String>, BackendError>;

    async fn search(
        &self,
        request: &EntitySearchRequest,
    ) -> Result<EntitySearchResponse, BackendError>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CategoryListing {
    Wrapped { categories: Vec<String> },
    Bare(Vec<String>),
}

// =============================================================================
// HTTP BACKEND
// =============================================================================
/// HTTP client for the entity store.
///
/// - `GET  {base}/categories`
/// - `POST {base}/categories/{category}/search`
pub struct HttpEntitySearch {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpEntitySearch {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {key}")),
            None => request,
        }
    }

    fn search_url(&self, category: &str) -> String {
        format!(
            "{}/categories/{}/search",
            self.base_url,
            urlencoding::encode(category)
        )
    }

    async fn send<T: DeserializeOwned + Send>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, BackendError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(BackendError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status.as_u16(), body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))
    }
}

#[async_trait]
impl EntitySearchBackend for HttpEntitySearch {
    async fn list_categories(&self) -> Result<Vec<String>, BackendError> {
        let url = format!("{}/categories", self.base_url);
        debug!(url = %url, "Listing entity categories");

        let listing: CategoryListing = self.send(self.client.get(&url)).await?;
        Ok(match listing {
            CategoryListing::Wrapped { categories } => categories,
            CategoryListing::Bare(categories) => categories,
        })
    }

    async fn search(
        &self,
        request: &EntitySearchRequest,
    ) -> Result<EntitySearchResponse, BackendError> {
        let url = self.search_url(&request.category);
        debug!(url = %url, query = %request.query, "Searching entity store");

        self.send(self.client.post(&url).json(request)).await
    }
}
