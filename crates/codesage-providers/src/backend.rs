//! Provider selection.
//!
//! The provider is chosen exactly once from the settings snapshot and then
//! handed around explicitly. Order of preference: a configured cloud key,
//! then a configured local endpoint, then the deterministic mock. A
//! candidate is only selected once it answers a health check, so an
//! unreachable service or a missing model surfaces at startup.

use std::sync::Arc;
use std::time::Duration;

use codesage_config::LlmSettings;
use tracing::{info, warn};

use crate::{AnthropicProvider, LLMProvider, MockProvider, OllamaProvider, ProviderError};

/// Which provider family serves LLM requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmBackend {
    Cloud {
        api_key: String,
        base_url: String,
        model: String,
    },
    Local {
        url: String,
        model: String,
    },
    Mock,
}

impl LlmBackend {
    /// Pick the preferred backend from settings without contacting anything.
    pub fn resolve(settings: &LlmSettings) -> Self {
        Self::candidates(settings)
            .into_iter()
            .next()
            .unwrap_or(Self::Mock)
    }

    /// Every configured backend in preference order, always ending in `Mock`.
    pub fn candidates(settings: &LlmSettings) -> Vec<Self> {
        if settings.mock {
            return vec![Self::Mock];
        }

        let mut candidates = Vec::new();
        if let Some(key) = settings.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            candidates.push(Self::Cloud {
                api_key: key.clone(),
                base_url: settings.base_url.clone(),
                model: settings.model.clone(),
            });
        }
        if let Some(url) = settings.local_url.as_ref().filter(|u| !u.trim().is_empty()) {
            candidates.push(Self::Local {
                url: url.clone(),
                model: settings.local_model.clone(),
            });
        }
        candidates.push(Self::Mock);
        candidates
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cloud { .. } => "cloud",
            Self::Local { .. } => "local",
            Self::Mock => "mock",
        }
    }

    /// Construct the provider for this backend.
    pub fn build(&self, settings: &LlmSettings) -> Result<Arc<dyn LLMProvider>, ProviderError> {
        let timeout = Duration::from_millis(settings.timeout_ms);
        match self {
            Self::Cloud {
                api_key,
                base_url,
                model,
            } => Ok(Arc::new(AnthropicProvider::new(
                api_key.clone(),
                model.clone(),
                base_url.clone(),
                settings.api_version.clone(),
                Some(settings.max_tokens),
                timeout,
            )?)),
            Self::Local { url, model } => Ok(Arc::new(OllamaProvider::new(
                url.clone(),
                model.clone(),
                Some(settings.max_tokens),
                timeout,
            )?)),
            Self::Mock => Ok(Arc::new(MockProvider::new())),
        }
    }
}

/// The backend actually in use plus its provider.
#[derive(Clone)]
pub struct ResolvedProvider {
    pub backend: LlmBackend,
    pub provider: Arc<dyn LLMProvider>,
    /// Configuration problems met while falling back
    pub warnings: Vec<String>,
}

impl std::fmt::Debug for ResolvedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedProvider")
            .field("backend", &self.backend.kind())
            .field("model", &self.provider.model())
            .field("warnings", &self.warnings)
            .finish()
    }
}

/// Upper bound on a single startup health check.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Build and health-check each candidate in turn and keep the first that
/// passes. A failing preferred backend becomes a warning; nothing is fatal
/// because `Mock` always passes.
pub async fn resolve_provider(settings: &LlmSettings) -> ResolvedProvider {
    let mut warnings = Vec::new();
    for backend in LlmBackend::candidates(settings) {
        match connect(&backend, settings).await {
            Ok(provider) => {
                info!(
                    "Using {} LLM backend (model: {})",
                    backend.kind(),
                    provider.model()
                );
                return ResolvedProvider {
                    backend,
                    provider,
                    warnings,
                };
            }
            Err(e) => {
                warn!("{} LLM backend unavailable: {}", backend.kind(), e);
                warnings.push(format!("{} backend: {}", backend.kind(), e));
            }
        }
    }

    ResolvedProvider {
        backend: LlmBackend::Mock,
        provider: Arc::new(MockProvider::new()),
        warnings,
    }
}

async fn connect(
    backend: &LlmBackend,
    settings: &LlmSettings,
) -> Result<Arc<dyn LLMProvider>, ProviderError> {
    let provider = backend.build(settings)?;
    if *backend == LlmBackend::Mock {
        return Ok(provider);
    }
    let limit = HEALTH_CHECK_TIMEOUT.min(Duration::from_millis(settings.timeout_ms));
    match tokio::time::timeout(limit, provider.health_check()).await {
        Ok(Ok(())) => Ok(provider),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(ProviderError::Network(format!(
            "health check timed out after {} ms",
            limit.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_no_configuration_resolves_to_mock() {
        let settings = LlmSettings::default();
        assert_eq!(LlmBackend::resolve(&settings), LlmBackend::Mock);
    }

    #[test]
    fn test_cloud_key_wins_over_local() {
        let settings = LlmSettings {
            api_key: Some("sk-test".to_string()),
            local_url: Some("http://localhost:11434".to_string()),
            ..Default::default()
        };
        let candidates = LlmBackend::candidates(&settings);
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].kind(), "cloud");
        assert_eq!(candidates[1].kind(), "local");
        assert_eq!(candidates[2], LlmBackend::Mock);
    }

    #[test]
    fn test_blank_key_is_ignored() {
        let settings = LlmSettings {
            api_key: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(LlmBackend::resolve(&settings), LlmBackend::Mock);
    }

    #[test]
    fn test_mock_flag_overrides_everything() {
        let settings = LlmSettings {
            api_key: Some("sk-test".to_string()),
            mock: true,
            ..Default::default()
        };
        assert_eq!(LlmBackend::candidates(&settings), vec![LlmBackend::Mock]);
    }

    fn local_settings(url: String) -> LlmSettings {
        LlmSettings {
            local_url: Some(url),
            local_model: "llama3".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_invalid_cloud_url_falls_back_with_warning() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"models": [{"name": "llama3:latest"}]})),
            )
            .mount(&server)
            .await;

        let settings = LlmSettings {
            api_key: Some("sk-test".to_string()),
            base_url: "::not a url::".to_string(),
            ..local_settings(server.uri())
        };
        let resolved = resolve_provider(&settings).await;
        assert_eq!(resolved.backend.kind(), "local");
        assert_eq!(resolved.warnings.len(), 1);
        assert!(resolved.warnings[0].starts_with("cloud backend"));
    }

    #[tokio::test]
    async fn test_unreachable_local_backend_falls_back_to_mock() {
        let server = MockServer::start().await;
        let url = server.uri();
        drop(server);

        let resolved = resolve_provider(&local_settings(url)).await;
        assert_eq!(resolved.backend, LlmBackend::Mock);
        assert_eq!(resolved.provider.name(), "mock");
        assert_eq!(resolved.warnings.len(), 1);
        assert!(resolved.warnings[0].starts_with("local backend"));
    }

    #[tokio::test]
    async fn test_missing_local_model_falls_back_to_mock() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"models": [{"name": "mistral:7b"}]})),
            )
            .mount(&server)
            .await;

        let resolved = resolve_provider(&local_settings(server.uri())).await;
        assert_eq!(resolved.backend, LlmBackend::Mock);
        assert!(resolved.warnings[0].contains("llama3"));
    }

    #[tokio::test]
    async fn test_mock_flag_skips_health_checks() {
        let settings = LlmSettings {
            mock: true,
            local_url: Some("http://127.0.0.1:9".to_string()),
            ..Default::default()
        };
        let resolved = resolve_provider(&settings).await;
        assert_eq!(resolved.backend, LlmBackend::Mock);
        assert!(resolved.warnings.is_empty());
    }
}
