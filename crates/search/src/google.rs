//! Google Programmable Search (Custom Search JSON API) provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use rowboat_shared::{Result, RowboatError, SearchHit};

use crate::{classify_status, classify_transport, SearchProvider, USER_AGENT};

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";

/// Google custom search client.
#[derive(Debug)]
pub struct GoogleSearch {
    client: Client,
    api_key: String,
    /// Programmable search engine ID.
    cx: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    #[serde(default)]
    items: Vec<GoogleItem>,
}

#[derive(Debug, Deserialize)]
struct GoogleItem {
    link: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

impl GoogleSearch {
    pub fn new(api_key: String, cx: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RowboatError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            cx,
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
impl SearchProvider for GoogleSearch {
    #[instrument(skip_all, fields(query = %query, count))]
    async fn search(&self, query: &str, count: usize) -> Result<Vec<SearchHit>> {
        let url = format!("{}/customsearch/v1", self.base_url);

        // The API caps num at 10
        let num = count.min(10).to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.cx.as_str()),
                ("q", query),
                ("num", &num),
            ])
            .send()
            .await
            .map_err(|e| classify_transport(e, "google search"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, "google search"));
        }

        let body: GoogleResponse = response
            .json()
            .await
            .map_err(|e| RowboatError::Search(format!("google search: invalid response: {e}")))?;

        let hits: Vec<SearchHit> = body
            .items
            .into_iter()
            .take(count)
            .map(|item| SearchHit {
                url: item.link,
                title: item.title,
                snippet: item.snippet,
            })
            .collect();

        debug!(hits = hits.len(), "google search complete");
        Ok(hits)
    }

    fn name(&self) -> &'static str {
        "google"
    }
}
