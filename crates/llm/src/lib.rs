//! Hosted model providers and prompt assembly.
//!
//! [`ModelProvider`] abstracts a chat-completion endpoint; [`prompt`] builds
//! the evidence-grounded prompts sent through it. One HTTP call per
//! invocation; retry policy is the pipeline's concern.

pub mod openai;
pub mod prompt;

use async_trait::async_trait;

use rowboat_shared::{ModelConfig, Result, RowboatError};

pub use openai::OpenAiCompatible;

/// One generation request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: Option<u32>,
    pub temperature: f32,
}

/// A hosted chat-completion backend.
#[async_trait]
pub trait ModelProvider: Send + Sync + std::fmt::Debug {
    /// Run one completion, returning the raw assistant text.
    async fn generate(&self, request: &GenerateRequest) -> Result<String>;

    /// Provider name for logs.
    fn name(&self) -> &'static str;
}

/// Build a provider for the configured model backend.
pub fn provider_for(config: &ModelConfig, api_key: String) -> Result<Box<dyn ModelProvider>> {
    match config.provider.as_str() {
        // Any OpenAI-compatible chat endpoint (OpenRouter, OpenAI, local)
        "openai" | "openrouter" => Ok(Box::new(OpenAiCompatible::new(
            config.base_url.clone(),
            api_key,
            config.name.clone(),
        )?)),
        other => Err(RowboatError::config(format!(
            "unknown model provider '{other}' (expected 'openai' or 'openrouter')"
        ))),
    }
}
