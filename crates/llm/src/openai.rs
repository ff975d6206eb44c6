//! OpenAI-compatible chat-completions client (OpenRouter, OpenAI, local
//! inference servers).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use rowboat_shared::{Result, RowboatError};

use crate::{GenerateRequest, ModelProvider};

/// User-Agent string for outbound requests.
const USER_AGENT: &str = concat!("Rowboat/", env!("CARGO_PKG_VERSION"));

/// Chat-completions client against any OpenAI-compatible `base_url`.
#[derive(Debug)]
pub struct OpenAiCompatible {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

// ---------------------------------------------------------------------------
// Wire types (subset of the chat-completions schema)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

impl OpenAiCompatible {
    pub fn new(base_url: String, api_key: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| RowboatError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatible {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate(&self, request: &GenerateRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RowboatError::Network(format!("model call failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RowboatError::Model(format!("invalid completion response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RowboatError::Model("completion returned no choices".into()))?;

        debug!(chars = choice.message.content.len(), "completion received");
        Ok(choice.message.content)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// 429 is throttling, 5xx is transient, other 4xx is a hard model error.
fn classify_status(status: StatusCode, detail: &str) -> RowboatError {
    let snippet: String = detail.trim().chars().take(200).collect();
    let detail = if snippet.is_empty() {
        String::new()
    } else {
        format!(": {snippet}")
    };
    if status == StatusCode::TOO_MANY_REQUESTS {
        RowboatError::Throttled(format!("model: HTTP 429{detail}"))
    } else if status.is_server_error() {
        RowboatError::Network(format!("model: HTTP {status}{detail}"))
    } else {
        RowboatError::Model(format!("model: HTTP {status}{detail}"))
    }
}
