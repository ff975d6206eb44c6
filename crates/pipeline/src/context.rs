//! Shared per-run context handed to every row worker.

use rowboat_llm::{GenerateRequest, ModelProvider};
use rowboat_search::{PageFetcher, SearchProvider};
use rowboat_shared::{JobConfig, Result, SearchHit};

use crate::limiter::RateLimiterRegistry;
use crate::retry::RetryPolicy;

/// Rate limiter bucket names, one per external service class.
pub const SERVICE_SEARCH: &str = "search";
pub const SERVICE_FETCH: &str = "fetch";
pub const SERVICE_MODEL: &str = "model";

/// Everything a row worker needs: the resolved job config, the external
/// capabilities, and the shared admission/retry machinery. Constructed once
/// per run and shared behind an `Arc`.
pub struct PipelineContext {
    pub config: JobConfig,
    pub search: Box<dyn SearchProvider>,
    pub fetcher: Box<dyn PageFetcher>,
    pub model: Box<dyn ModelProvider>,
    pub limiters: RateLimiterRegistry,
    pub retry: RetryPolicy,
}

impl PipelineContext {
    pub fn new(
        config: JobConfig,
        search: Box<dyn SearchProvider>,
        fetcher: Box<dyn PageFetcher>,
        model: Box<dyn ModelProvider>,
    ) -> Self {
        let mut limiters = RateLimiterRegistry::new();
        limiters.register(
            SERVICE_SEARCH,
            config.search.burst,
            config.search.rate_per_sec,
        );
        limiters.register(SERVICE_FETCH, config.search.burst, config.search.fetch_rate_per_sec);
        limiters.register(SERVICE_MODEL, config.model.burst, config.model.rate_per_sec);

        let retry = RetryPolicy::from_limits(&config.limits);

        Self {
            config,
            search,
            fetcher,
            model,
            limiters,
            retry,
        }
    }

    /// One rate-limited, retried search call.
    pub async fn call_search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let count = self.config.search.results;
        self.retry
            .execute("search", move || async move {
                self.limiters.acquire(SERVICE_SEARCH).await;
                self.search.search(query, count).await
            })
            .await
    }

    /// One rate-limited, retried page fetch.
    pub async fn call_fetch(&self, url: &str) -> Result<String> {
        self.retry
            .execute("fetch", move || async move {
                self.limiters.acquire(SERVICE_FETCH).await;
                self.fetcher.fetch_text(url).await
            })
            .await
    }

    /// One rate-limited, retried model call.
    pub async fn call_model(&self, system: &str, user: &str) -> Result<String> {
        let request = GenerateRequest {
            system: system.to_string(),
            user: user.to_string(),
            max_tokens: self.config.model.max_tokens,
            temperature: self.config.model.temperature,
        };
        let request = &request;
        self.retry
            .execute("model", move || async move {
                self.limiters.acquire(SERVICE_MODEL).await;
                self.model.generate(request).await
            })
            .await
    }
}
