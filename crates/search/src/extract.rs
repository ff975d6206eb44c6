//! Page fetching and plain-text extraction for search hits.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html};
use tracing::{debug, instrument};
use url::Url;

use rowboat_shared::{Result, RowboatError};

use crate::{classify_status, classify_transport, PageFetcher, USER_AGENT};

/// Tags whose subtree never contributes evidence text.
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "svg", "nav", "header", "footer", "iframe",
];

/// Default character budget per fetched page.
const DEFAULT_MAX_CHARS: usize = 12_000;

/// HTTP fetcher + HTML-to-text extractor for evidence pages.
pub struct PageExtractor {
    client: Client,
    max_chars: usize,
}

impl PageExtractor {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RowboatError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_chars: DEFAULT_MAX_CHARS,
        })
    }

    /// Override the per-page character budget.
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }
}

#[async_trait]
impl PageFetcher for PageExtractor {
    #[instrument(skip_all, fields(url = %url))]
    async fn fetch_text(&self, url: &str) -> Result<String> {
        let parsed = Url::parse(url)
            .map_err(|e| RowboatError::Search(format!("invalid result URL '{url}': {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(RowboatError::Search(format!(
                "unsupported URL scheme '{}'",
                parsed.scheme()
            )));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_transport(e, url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, url));
        }

        let body = response
            .text()
            .await
            .map_err(|e| RowboatError::Network(format!("{url}: body read failed: {e}")))?;

        let text = extract_text(&body);
        debug!(chars = text.len(), "page extracted");
        Ok(truncate_chars(&text, self.max_chars))
    }
}

/// Strip markup and page chrome, returning whitespace-normalized text.
fn extract_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut raw = String::new();
    collect_text(doc.root_element(), &mut raw);

    // Collapse runs of whitespace left behind by removed elements
    let mut out = String::with_capacity(raw.len());
    let mut last_was_space = true;
    for ch in raw.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out.trim_end().to_string()
}

/// Depth-first text collection, skipping non-content subtrees.
fn collect_text(element: ElementRef, out: &mut String) {
    for child in element.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            if SKIPPED_TAGS.contains(&child_el.value().name()) {
                continue;
            }
            collect_text(child_el, out);
        } else if let Some(text) = child.value().as_text() {
            out.push_str(text);
            out.push(' ');
        }
    }
}

/// Truncate on a char boundary, marking the cut.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated} [truncated]")
}
