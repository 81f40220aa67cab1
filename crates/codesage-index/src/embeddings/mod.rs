//! Embedding provider trait and implementations.
//!
//! This module defines the interface for turning chunk text into vectors and
//! provides an HTTP client for the two common wire dialects plus a
//! deterministic offline embedder.

mod http;
mod mock;

pub use http::{EmbeddingDialect, HttpEmbeddings};
pub use mock::MockEmbeddings;

use async_trait::async_trait;
use codesage_providers::Retryable;
use thiserror::Error;

/// Errors that can occur during embedding generation.
#[derive(Error, Debug, Clone)]
pub enum EmbeddingError {
    #[error("embedding API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding configuration error: {0}")]
    Configuration(String),
}

impl Retryable for EmbeddingError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Trait for embedding providers.
///
/// Every vector returned has exactly [`dimensions`](Self::dimensions) elements.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed several texts, preserving order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Get the number of dimensions
    fn dimensions(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Reject vectors whose length differs from the configured dimension.
pub(crate) fn check_dimensions(vector: Vec<f32>, expected: usize) -> Result<Vec<f32>, EmbeddingError> {
    if vector.is_empty() {
        return Err(EmbeddingError::InvalidResponse("empty embedding".to_string()));
    }
    if vector.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_dimensions() {
        assert!(check_dimensions(vec![0.1, 0.2], 2).is_ok());
        assert!(matches!(
            check_dimensions(vec![0.1], 2),
            Err(EmbeddingError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            check_dimensions(Vec::new(), 2),
            Err(EmbeddingError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_transient_classification() {
        assert!(EmbeddingError::Network("reset".into()).is_transient());
        assert!(EmbeddingError::Api { status: 503, body: String::new() }.is_transient());
        assert!(!EmbeddingError::Api { status: 400, body: String::new() }.is_transient());
        assert!(!EmbeddingError::DimensionMismatch { expected: 3, actual: 2 }.is_transient());
    }
}
