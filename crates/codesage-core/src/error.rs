//! Pipeline error taxonomy.

use codesage_config::ConfigError;
use codesage_index::{ChunkerError, ScanError, StoreError};
use codesage_providers::ProviderError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CodesageError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("analysis failed: {0}")]
    Analysis(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl CodesageError {
    /// Short machine-readable category.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Validation(_) => "validation",
            Self::Analysis(_) => "analysis",
            Self::Storage(_) => "storage",
            Self::NotFound(_) => "not_found",
        }
    }
}

impl From<ConfigError> for CodesageError {
    fn from(e: ConfigError) -> Self {
        Self::Configuration(e.to_string())
    }
}

impl From<StoreError> for CodesageError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => Self::ServiceUnavailable(msg),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<ScanError> for CodesageError {
    fn from(e: ScanError) -> Self {
        match e {
            ScanError::NotFound(path) => {
                Self::Validation(format!("path does not exist: {}", path.display()))
            }
            other => Self::Configuration(other.to_string()),
        }
    }
}

impl From<ChunkerError> for CodesageError {
    fn from(e: ChunkerError) -> Self {
        Self::Configuration(e.to_string())
    }
}

impl From<ProviderError> for CodesageError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Configuration(msg) => Self::Configuration(msg),
            other => Self::Analysis(other.to_string()),
        }
    }
}

/// Pipeline stage where a per-item failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Read,
    Chunk,
    Analyze,
    Embed,
}

/// A file- or chunk-level failure collected during a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<usize>,
    pub stage: Stage,
    pub message: String,
}

impl ItemError {
    pub fn file(path: impl Into<String>, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            start_line: None,
            stage,
            message: message.into(),
        }
    }

    pub fn chunk(
        path: impl Into<String>,
        start_line: usize,
        stage: Stage,
        message: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            start_line: Some(start_line),
            stage,
            message: message.into(),
        }
    }
}
