use std::time::Duration;

use async_trait::async_trait;
use codesage_config::EmbeddingSettings;
use codesage_providers::{retry, RetryPolicy};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{check_dimensions, EmbeddingError, EmbeddingProvider};

/// Wire format spoken by the embedding endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingDialect {
    /// `{model, prompt}` -> `{embedding}` (Ollama `/api/embeddings`)
    Legacy,
    /// `{model, input}` -> `{data: [{embedding}]}`
    OpenAi,
}

impl EmbeddingDialect {
    /// Legacy when the URL path ends in `/api/embeddings`, OpenAI-compatible otherwise.
    pub fn from_url(url: &Url) -> Self {
        if url.path().trim_end_matches('/').ends_with("/api/embeddings") {
            Self::Legacy
        } else {
            Self::OpenAi
        }
    }
}

#[derive(Serialize)]
struct LegacyRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct LegacyResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
}

/// HTTP embedding client with per-call retry.
pub struct HttpEmbeddings {
    client: Client,
    url: Url,
    model: String,
    api_key: Option<String>,
    dialect: EmbeddingDialect,
    dimensions: usize,
    retry: RetryPolicy,
}

impl HttpEmbeddings {
    pub fn new(settings: &EmbeddingSettings, dimensions: usize) -> Result<Self, EmbeddingError> {
        let url = Url::parse(&settings.url).map_err(|e| {
            EmbeddingError::Configuration(format!("invalid embedding URL {}: {}", settings.url, e))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| EmbeddingError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        let dialect = EmbeddingDialect::from_url(&url);
        debug!(
            "Initialized embedding client: url={}, model={}, dialect={:?}",
            url, settings.model, dialect
        );

        Ok(Self {
            client,
            url,
            model: settings.model.clone(),
            api_key: settings.api_key.clone().filter(|k| !k.trim().is_empty()),
            dialect,
            dimensions,
            retry: RetryPolicy::from_embeddings(settings),
        })
    }

    pub fn dialect(&self) -> EmbeddingDialect {
        self.dialect
    }

    async fn request_once(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut request = self.client.post(self.url.clone());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        request = match self.dialect {
            EmbeddingDialect::Legacy => request.json(&LegacyRequest {
                model: &self.model,
                prompt: text,
            }),
            EmbeddingDialect::OpenAi => request.json(&OpenAiRequest {
                model: &self.model,
                input: text,
            }),
        };

        let response = request
            .send()
            .await
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let vector = match self.dialect {
            EmbeddingDialect::Legacy => {
                response
                    .json::<LegacyResponse>()
                    .await
                    .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?
                    .embedding
            }
            EmbeddingDialect::OpenAi => response
                .json::<OpenAiResponse>()
                .await
                .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?
                .data
                .into_iter()
                .next()
                .map(|d| d.embedding)
                .ok_or_else(|| EmbeddingError::InvalidResponse("empty data array".to_string()))?,
        };

        check_dimensions(vector, self.dimensions)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        retry(&self.retry, "embedding request", || self.request_once(text)).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
