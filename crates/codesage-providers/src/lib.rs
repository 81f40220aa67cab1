//! LLM provider abstractions for codesage.
//!
//! Three provider families are supported, chosen once at startup through
//! the [`LlmBackend`] tagged variant:
//! - `Cloud`: an Anthropic-style messages API authenticated by API key
//! - `Local`: an Ollama-style chat API on a local or LAN host
//! - `Mock`: a deterministic generator for development and tests

pub mod anthropic;
pub mod backend;
pub mod error;
pub mod mock;
pub mod ollama;
pub mod retry;

pub use anthropic::AnthropicProvider;
pub use backend::{resolve_provider, LlmBackend, ResolvedProvider};
pub use error::ProviderError;
pub use mock::MockProvider;
pub use ollama::OllamaProvider;
pub use retry::{retry, RetryPolicy, Retryable};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn new(role: MessageRole, content: String) -> Self {
        Self { role, content }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content.into())
    }
}

/// A completion request sent to a provider.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// System prompt, sent out-of-band where the API supports it
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    /// Build a single-turn request.
    pub fn single(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            messages: vec![Message::user(prompt)],
            max_tokens: None,
            temperature: None,
        }
    }

    /// The most recent user message, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
    }
}

/// Token accounting returned by providers that report it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A completed (non-streaming) response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: Usage,
    pub model: String,
}

/// Common interface of every LLM provider.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Send a single completion request. Implementations make exactly one
    /// attempt; retry policy belongs to the caller.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Verify the provider is reachable and its model is available.
    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn name(&self) -> &str;

    fn model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_request_shape() {
        let request = CompletionRequest::single("be terse", "hello");
        assert_eq!(request.system.as_deref(), Some("be terse"));
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.last_user_message(), Some("hello"));
    }

    #[test]
    fn test_message_role_as_str() {
        assert_eq!(MessageRole::System.as_str(), "system");
        assert_eq!(MessageRole::User.as_str(), "user");
        assert_eq!(MessageRole::Assistant.as_str(), "assistant");
    }
}
