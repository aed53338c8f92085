//! LLM client contract and HTTP clients.
//!
//! The pipeline only ever sees the [`LLM`] trait. Clients are built by the
//! caller (see [`Provider`]) and handed in already configured.

mod claude;
mod error;
mod openai;
mod provider;

pub use claude::ClaudeClient;
pub use error::LLMError;
pub use openai::OpenAIClient;
pub use provider::Provider;

use std::sync::Arc;

use async_trait::async_trait;

/// Trait for Large Language Model providers.
///
/// # Supported Providers
///
/// - **OpenAI-compatible** (default): OpenAI, Azure, Ollama, vLLM, OpenRouter, etc.
/// - **Anthropic**: Claude models via the Messages API
///
/// # Example
///
/// ```ignore
/// use graphsec_core::llm::{Provider, LLM};
///
/// let llm = Provider::from_env()?;
/// let text = llm.complete("Summarize this file", 512).await?;
/// ```
#[async_trait]
pub trait LLM: Send + Sync {
    /// Complete a prompt, generating at most `max_tokens`.
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, LLMError>;

    /// Complete a prompt with a system message.
    async fn complete_with_system(
        &self,
        system: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, LLMError>;
}

#[async_trait]
impl LLM for Box<dyn LLM> {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, LLMError> {
        (**self).complete(prompt, max_tokens).await
    }

    async fn complete_with_system(
        &self,
        system: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, LLMError> {
        (**self).complete_with_system(system, prompt, max_tokens).await
    }
}

#[async_trait]
impl LLM for Arc<dyn LLM> {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, LLMError> {
        (**self).complete(prompt, max_tokens).await
    }

    async fn complete_with_system(
        &self,
        system: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, LLMError> {
        (**self).complete_with_system(system, prompt, max_tokens).await
    }
}

/// Extract a JSON object from a model response, stripping markdown fences
/// and any prose around the outermost braces.
pub fn extract_json(response: &str) -> &str {
    let trimmed = response.trim();

    let unfenced = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.trim_end_matches("```").trim()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim_end_matches("```").trim()
    } else {
        trimmed
    };

    match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if end > start => &unfenced[start..=end],
        _ => unfenced,
    }
}
