//! Cloud provider speaking the Anthropic messages API.
//!
//! Requests carry the API key in `x-api-key` and pin the protocol with the
//! `anthropic-version` header. The system prompt is sent out-of-band in the
//! top-level `system` field rather than as a message.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::{CompletionRequest, CompletionResponse, LLMProvider, MessageRole, ProviderError, Usage};

const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic messages API provider.
#[derive(Clone)]
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    api_version: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(
        api_key: String,
        model: String,
        base_url: String,
        api_version: String,
        max_tokens: Option<u32>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::Configuration("cloud API key is empty".into()));
        }
        url::Url::parse(&base_url)
            .map_err(|e| ProviderError::Configuration(format!("invalid base URL {}: {}", base_url, e)))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        debug!(
            "Initialized Anthropic provider with model: {}, base_url: {}",
            model, base_url
        );

        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version,
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        })
    }

    fn create_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
        });

        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }

        body
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    model: String,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        debug!(
            "Processing Anthropic completion request with {} messages",
            request.messages.len()
        );

        let body = self.create_request_body(&request);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body: error_text,
            });
        }

        let parsed: AnthropicResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse Anthropic response: {}", e))
        })?;

        let content: String = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        let usage = Usage {
            prompt_tokens: parsed.usage.input_tokens,
            completion_tokens: parsed.usage.output_tokens,
            total_tokens: parsed.usage.input_tokens + parsed.usage.output_tokens,
        };

        debug!(
            "Anthropic completion successful: {} tokens generated",
            usage.completion_tokens
        );

        Ok(CompletionResponse {
            content,
            usage,
            model: parsed.model,
        })
    }

    /// Look the configured model up in the models API.
    async fn health_check(&self) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1/models/{}", self.base_url, self.model))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        match response.status().as_u16() {
            200..=299 => Ok(()),
            404 => Err(ProviderError::Configuration(format!(
                "model '{}' is not available",
                self.model
            ))),
            401 | 403 => Err(ProviderError::Configuration(
                "cloud API key was rejected".to_string(),
            )),
            status => Err(ProviderError::Api {
                status,
                body: response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string()),
            }),
        }
    }

    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: String) -> AnthropicProvider {
        AnthropicProvider::new(
            "test-key".to_string(),
            "claude-test".to_string(),
            base_url,
            "2023-06-01".to_string(),
            Some(512),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_key_is_configuration_error() {
        let result = AnthropicProvider::new(
            "  ".to_string(),
            "m".to_string(),
            "https://api.anthropic.com".to_string(),
            "2023-06-01".to_string(),
            None,
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(ProviderError::Configuration(_))));
    }

    #[test]
    fn test_request_body_moves_system_out_of_messages() {
        let provider = provider("https://api.anthropic.com".to_string());
        let request = CompletionRequest {
            system: Some("json only".to_string()),
            messages: vec![
                Message::new(MessageRole::System, "ignored".to_string()),
                Message::user("analyze this"),
            ],
            max_tokens: None,
            temperature: Some(0.2),
        };

        let body = provider.create_request_body(&request);
        assert_eq!(body["model"], "claude-test");
        assert_eq!(body["system"], "json only");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn test_complete_sends_version_and_key_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", "2023-06-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "claude-test",
                "content": [{"type": "text", "text": "{\"summary\": \"ok\"}"}],
                "usage": {"input_tokens": 10, "output_tokens": 4}
            })))
            .mount(&server)
            .await;

        let response = provider(server.uri())
            .complete(CompletionRequest::single("sys", "hi"))
            .await
            .unwrap();

        assert_eq!(response.content, "{\"summary\": \"ok\"}");
        assert_eq!(response.usage.total_tokens, 14);
    }

    #[tokio::test]
    async fn test_server_error_maps_to_transient_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = provider(server.uri())
            .complete(CompletionRequest::single("sys", "hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Api { status: 529, .. }));
    }

    #[tokio::test]
    async fn test_health_check_looks_up_model() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models/claude-test"))
            .and(header("x-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "claude-test",
                "type": "model"
            })))
            .mount(&server)
            .await;

        assert!(provider(server.uri()).health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_health_check_unknown_model_is_configuration_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models/claude-test"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let err = provider(server.uri()).health_check().await.unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(ref m) if m.contains("claude-test")));
    }
}
