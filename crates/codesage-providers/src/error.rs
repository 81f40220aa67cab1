use thiserror::Error;

use crate::retry::Retryable;

/// Errors returned by LLM providers.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ProviderError {
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl Retryable for ProviderError {
    /// Network failures, rate limits and 5xx responses are worth retrying.
    fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse(_) | Self::Configuration(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Network("reset".into()).is_transient());
        assert!(ProviderError::Api { status: 503, body: String::new() }.is_transient());
        assert!(ProviderError::Api { status: 429, body: String::new() }.is_transient());
        assert!(!ProviderError::Api { status: 401, body: String::new() }.is_transient());
        assert!(!ProviderError::InvalidResponse("bad".into()).is_transient());
        assert!(!ProviderError::Configuration("no key".into()).is_transient());
    }

    #[test]
    fn test_display_includes_status() {
        let err = ProviderError::Api {
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(err.to_string(), "API error (500): boom");
    }
}
