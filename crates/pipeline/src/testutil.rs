//! Fake capabilities and config builders shared across pipeline tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use rowboat_llm::{GenerateRequest, ModelProvider};
use rowboat_search::{PageFetcher, SearchProvider};
use rowboat_shared::{JobConfig, Result, Row, RowboatError, SearchHit};

use crate::context::PipelineContext;

// ---------------------------------------------------------------------------
// Fake search
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct FakeSearch {
    hits: Vec<SearchHit>,
    pub calls: Arc<AtomicUsize>,
    /// Queries containing this substring fail permanently.
    pub fail_on: Option<String>,
    /// Every call fails with a transient error.
    pub always_transient: bool,
}

impl FakeSearch {
    pub fn with_hits(n: usize) -> Self {
        let hits = (0..n)
            .map(|i| SearchHit {
                url: format!("https://example.com/doc{i}"),
                title: format!("Doc {i}"),
                snippet: format!("Snippet {i}"),
            })
            .collect();
        Self {
            hits,
            calls: Arc::new(AtomicUsize::new(0)),
            fail_on: None,
            always_transient: false,
        }
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    async fn search(&self, query: &str, count: usize) -> Result<Vec<SearchHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_transient {
            return Err(RowboatError::Network("fake outage".into()));
        }
        if let Some(marker) = &self.fail_on {
            if query.contains(marker.as_str()) {
                return Err(RowboatError::Search("fake permanent failure".into()));
            }
        }
        Ok(self.hits.iter().take(count).cloned().collect())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

// ---------------------------------------------------------------------------
// Fake fetcher
// ---------------------------------------------------------------------------

pub(crate) struct FakeFetcher {
    pub calls: Arc<AtomicUsize>,
    pub fail: bool,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
        }
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RowboatError::Search(format!("fake fetch failure: {url}")));
        }
        Ok(format!("Extracted text for {url}"))
    }
}

// ---------------------------------------------------------------------------
// Fake model
// ---------------------------------------------------------------------------

/// Replays a script of responses; the last one repeats once exhausted.
#[derive(Debug)]
pub(crate) struct FakeModel {
    script: Mutex<(Vec<String>, usize)>,
    pub calls: Arc<AtomicUsize>,
    /// Simulated latency per call.
    pub delay_ms: u64,
}

impl FakeModel {
    pub fn scripted(responses: &[&str]) -> Self {
        Self {
            script: Mutex::new((responses.iter().map(|s| s.to_string()).collect(), 0)),
            calls: Arc::new(AtomicUsize::new(0)),
            delay_ms: 0,
        }
    }

    pub fn always(response: &str) -> Self {
        Self::scripted(&[response])
    }
}

#[async_trait]
impl ModelProvider for FakeModel {
    async fn generate(&self, _request: &GenerateRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        let mut guard = self.script.lock().expect("script lock");
        let (responses, index) = &mut *guard;
        if responses.is_empty() {
            return Err(RowboatError::Model("empty fake script".into()));
        }
        let response = responses[(*index).min(responses.len() - 1)].clone();
        *index += 1;
        Ok(response)
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

// ---------------------------------------------------------------------------
// Config and rows
// ---------------------------------------------------------------------------

const BASE_JOB: &str = r#"
input_csv = "in.csv"
query_column = "company"

[prompt]
user = "What industry is {{company}} in?"

[model]
name = "test-model"
rate_per_sec = 1000.0
burst = 100

[search]
engine = "brave"
results = 3
fetch_top = 2
rate_per_sec = 1000.0
burst = 100
fetch_rate_per_sec = 1000.0

[limits]
concurrency = 2
max_attempts = 3
max_reprompts = 2
row_timeout_secs = 30
retry_base_ms = 1
retry_max_delay_ms = 5

[[schema.fields]]
name = "industry"
type = "enum"
required = true
options = ["SaaS", "Fintech", "Other"]
"#;

/// A fast-limits job config; `extra` TOML appends sections the base omits
/// (e.g. `[research]`, `[cache]`).
pub(crate) fn job_config(extra: &str) -> JobConfig {
    let combined = format!("{BASE_JOB}\n{extra}");
    let config: JobConfig = toml::from_str(&combined).expect("test job config");
    config.validate().expect("valid test job config");
    config
}

pub(crate) fn test_row(index: usize, company: &str) -> Row {
    Row::new(index, vec![("company".into(), company.into())])
}

pub(crate) fn make_ctx(
    config: JobConfig,
    search: FakeSearch,
    fetcher: FakeFetcher,
    model: FakeModel,
) -> PipelineContext {
    PipelineContext::new(config, Box::new(search), Box::new(fetcher), Box::new(model))
}
