//! Search providers and page-text extraction.
//!
//! This crate provides:
//! - [`SearchProvider`] — Web search behind a common trait (Brave, Google)
//! - [`PageFetcher`] / [`PageExtractor`] — Full-text retrieval for search hits
//!
//! Rate limiting and retries live in the pipeline layer; providers here make
//! exactly one HTTP call per invocation and classify failures so the caller
//! can decide what is worth retrying.

pub mod brave;
pub mod extract;
pub mod google;

use async_trait::async_trait;
use reqwest::StatusCode;

use rowboat_shared::{Result, RowboatError, SearchHit};

pub use brave::BraveSearch;
pub use extract::PageExtractor;
pub use google::GoogleSearch;

/// User-Agent string for outbound requests.
pub(crate) const USER_AGENT: &str = concat!("Rowboat/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A web search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync + std::fmt::Debug {
    /// Run one query, returning up to `count` hits.
    async fn search(&self, query: &str, count: usize) -> Result<Vec<SearchHit>>;

    /// Provider name for logs.
    fn name(&self) -> &'static str;
}

/// Full-text retrieval for a single URL.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch a page and return its extracted plain text.
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Credentials resolved from the environment by the caller.
#[derive(Debug, Clone)]
pub struct SearchCredentials {
    /// Provider API key.
    pub api_key: String,
    /// Google programmable search engine ID (Google only).
    pub google_cx: Option<String>,
}

/// Build a provider for the configured engine name.
pub fn provider_for(engine: &str, credentials: SearchCredentials) -> Result<Box<dyn SearchProvider>> {
    match engine {
        "brave" => Ok(Box::new(BraveSearch::new(credentials.api_key)?)),
        "google" => {
            let cx = credentials.google_cx.ok_or_else(|| {
                RowboatError::config("google search requires a programmable search engine ID")
            })?;
            Ok(Box::new(GoogleSearch::new(credentials.api_key, cx)?))
        }
        other => Err(RowboatError::config(format!(
            "unknown search engine '{other}' (expected 'brave' or 'google')"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Map an HTTP status to the error class the retry layer keys on.
/// 429 is throttling, 5xx is transient, everything else is a hard
/// provider error.
pub(crate) fn classify_status(status: StatusCode, context: &str) -> RowboatError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        RowboatError::Throttled(format!("{context}: HTTP 429"))
    } else if status.is_server_error() {
        RowboatError::Network(format!("{context}: HTTP {status}"))
    } else {
        RowboatError::Search(format!("{context}: HTTP {status}"))
    }
}

/// Map a transport-level reqwest error. Timeouts and connection failures
/// are transient.
pub(crate) fn classify_transport(err: reqwest::Error, context: &str) -> RowboatError {
    RowboatError::Network(format!("{context}: {err}"))
}
