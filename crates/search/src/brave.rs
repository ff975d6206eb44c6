//! Brave Search API provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use rowboat_shared::{Result, RowboatError, SearchHit};

use crate::{classify_status, classify_transport, SearchProvider, USER_AGENT};

const DEFAULT_BASE_URL: &str = "https://api.search.brave.com";

/// Brave web search client.
#[derive(Debug)]
pub struct BraveSearch {
    client: Client,
    api_key: String,
    base_url: String,
}

// ---------------------------------------------------------------------------
// Response shapes (subset of the Brave API)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
}

impl BraveSearch {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RowboatError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.into(),
        })
    }

    /// Override the API endpoint (for integration tests with mock servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl SearchProvider for BraveSearch {
    #[instrument(skip_all, fields(query = %query, count))]
    async fn search(&self, query: &str, count: usize) -> Result<Vec<SearchHit>> {
        let url = format!("{}/res/v1/web/search", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("X-Subscription-Token", &self.api_key)
            .header("Accept", "application/json")
            .query(&[("q", query), ("count", &count.to_string())])
            .send()
            .await
            .map_err(|e| classify_transport(e, "brave search"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, "brave search"));
        }

        let body: BraveResponse = response
            .json()
            .await
            .map_err(|e| RowboatError::Search(format!("brave search: invalid response: {e}")))?;

        let hits: Vec<SearchHit> = body
            .web
            .map(|web| web.results)
            .unwrap_or_default()
            .into_iter()
            .take(count)
            .map(|r| SearchHit {
                url: r.url,
                title: r.title,
                snippet: r.description,
            })
            .collect();

        debug!(hits = hits.len(), "brave search complete");
        Ok(hits)
    }

    fn name(&self) -> &'static str {
        "brave"
    }
}
