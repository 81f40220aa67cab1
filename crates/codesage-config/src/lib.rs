//! Configuration management for codesage.
//!
//! Settings are resolved once into an immutable [`Settings`] snapshot from
//! `CODESAGE_`-prefixed environment variables (sections separated by `__`,
//! e.g. `CODESAGE_QDRANT__URL`) layered over built-in defaults.

use std::collections::HashMap;
use std::path::PathBuf;

use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CODESAGE";

/// Errors raised while building or validating settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Vector index connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantSettings {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
    /// Vector dimension; every stored embedding must have exactly this length
    pub dimension: usize,
    /// Name of the vector slot inside each point
    pub vector_name: String,
    pub upsert_batch_size: usize,
    pub scroll_page_size: usize,
    pub init_retries: u32,
    pub init_backoff_ms: u64,
}

impl Default for QdrantSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            api_key: None,
            collection: "codesage-chunks".to_string(),
            dimension: 768,
            vector_name: "code".to_string(),
            upsert_batch_size: 64,
            scroll_page_size: 256,
            init_retries: 3,
            init_backoff_ms: 500,
        }
    }
}

/// LLM provider settings.
///
/// A cloud key takes precedence over a local URL; with neither configured
/// (or with `mock` set) the deterministic mock provider is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub api_version: String,
    pub local_url: Option<String>,
    pub local_model: String,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub exponential_backoff: bool,
    pub mock: bool,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-3-5-sonnet-latest".to_string(),
            api_version: "2023-06-01".to_string(),
            local_url: None,
            local_model: "llama3".to_string(),
            max_tokens: 4096,
            timeout_ms: 60_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            exponential_backoff: true,
            mock: false,
        }
    }
}

/// Embedding endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Full endpoint URL; the path selects the request dialect
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434/api/embeddings".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key: None,
            timeout_ms: 30_000,
            max_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

/// Line-window chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            overlap: 20,
        }
    }
}

/// Directory scanning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub max_depth: usize,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub max_file_size: u64,
    pub respect_gitignore: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            max_depth: 10,
            include_patterns: default_include_patterns(),
            exclude_patterns: default_exclude_patterns(),
            max_file_size: 1024 * 1024,
            respect_gitignore: true,
        }
    }
}

/// Default include globs: common source and config file types.
pub fn default_include_patterns() -> Vec<String> {
    vec![
        "**/*.{js,jsx,ts,tsx,mjs,cjs}".to_string(),
        "**/*.{py,rs,go,java,kt,rb,php,swift,scala}".to_string(),
        "**/*.{c,h,cpp,hpp,cc,cs}".to_string(),
        "**/*.{sh,sql,md,json,yaml,yml,toml}".to_string(),
    ]
}

/// Default exclude globs: dependency, build and VCS directories.
pub fn default_exclude_patterns() -> Vec<String> {
    vec![
        "**/node_modules/**".to_string(),
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/dist/**".to_string(),
        "**/build/**".to_string(),
        "**/__pycache__/**".to_string(),
        "**/.venv/**".to_string(),
        "**/vendor/**".to_string(),
        "**/*.min.js".to_string(),
        "**/*.lock".to_string(),
        "**/package-lock.json".to_string(),
    ]
}

/// Optional capability switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSettings {
    pub git_analysis: bool,
    pub local_embeddings: bool,
    pub advanced_preprocessing: bool,
    /// External packer invoked when advanced pre-processing is on
    pub preprocessor_command: String,
    pub cache_dir: Option<String>,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            git_analysis: true,
            local_embeddings: true,
            advanced_preprocessing: false,
            preprocessor_command: "repomix".to_string(),
            cache_dir: None,
        }
    }
}

/// Pipeline tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Maximum in-flight provider calls during a batch
    pub concurrency: usize,
    /// Codebases with fewer files than this are analyzed synchronously
    pub sync_file_threshold: usize,
    /// A single file below this size is analyzed synchronously
    pub sync_size_threshold: u64,
    pub query_limit: usize,
    pub score_threshold: f32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            sync_file_threshold: 50,
            sync_size_threshold: 512 * 1024,
            query_limit: 10,
            score_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Immutable configuration snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub qdrant: QdrantSettings,
    pub llm: LlmSettings,
    pub embeddings: EmbeddingSettings,
    pub chunking: ChunkingSettings,
    pub scan: ScanSettings,
    pub features: FeatureSettings,
    pub pipeline: PipelineSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::build(environment())
    }

    /// Load settings from an explicit variable map instead of the process
    /// environment. Keys use the same `CODESAGE_SECTION__FIELD` form.
    pub fn from_env_map(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::build(environment().source(Some(vars)))
    }

    fn build(env: Environment) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(env)
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunking.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunking.chunk_size must be > 0".into()));
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.overlap, self.chunking.chunk_size
            )));
        }
        if self.qdrant.dimension == 0 {
            return Err(ConfigError::Invalid("qdrant.dimension must be > 0".into()));
        }
        if self.pipeline.concurrency == 0 {
            return Err(ConfigError::Invalid("pipeline.concurrency must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.pipeline.score_threshold) {
            return Err(ConfigError::Invalid(
                "pipeline.score_threshold must be within 0.0..=1.0".into(),
            ));
        }
        Ok(())
    }

    /// Directory for cached pre-processed codebase representations.
    pub fn cache_dir(&self) -> PathBuf {
        match &self.features.cache_dir {
            Some(dir) => PathBuf::from(shellexpand::tilde(dir).into_owned()),
            None => dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("codesage"),
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("scan.include_patterns")
        .with_list_parse_key("scan.exclude_patterns")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.chunking.chunk_size, 100);
        assert_eq!(settings.chunking.overlap, 20);
        assert_eq!(settings.qdrant.collection, "codesage-chunks");
        assert!(settings.features.git_analysis);
    }

    #[test]
    fn test_env_map_overrides_nested_fields() {
        let settings = Settings::from_env_map(vars(&[
            ("CODESAGE_QDRANT__URL", "http://qdrant:6334"),
            ("CODESAGE_QDRANT__DIMENSION", "384"),
            ("CODESAGE_CHUNKING__CHUNK_SIZE", "50"),
            ("CODESAGE_CHUNKING__OVERLAP", "10"),
            ("CODESAGE_LLM__MOCK", "true"),
        ]))
        .unwrap();

        assert_eq!(settings.qdrant.url, "http://qdrant:6334");
        assert_eq!(settings.qdrant.dimension, 384);
        assert_eq!(settings.chunking.chunk_size, 50);
        assert_eq!(settings.chunking.overlap, 10);
        assert!(settings.llm.mock);
        // untouched sections keep defaults
        assert_eq!(settings.pipeline.concurrency, 4);
    }

    #[test]
    fn test_env_map_parses_pattern_lists() {
        let settings = Settings::from_env_map(vars(&[(
            "CODESAGE_SCAN__INCLUDE_PATTERNS",
            "**/*.js,**/*.ts",
        )]))
        .unwrap();

        assert_eq!(
            settings.scan.include_patterns,
            vec!["**/*.js".to_string(), "**/*.ts".to_string()]
        );
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        let result = Settings::from_env_map(vars(&[
            ("CODESAGE_CHUNKING__CHUNK_SIZE", "10"),
            ("CODESAGE_CHUNKING__OVERLAP", "10"),
        ]));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut settings = Settings::default();
        settings.pipeline.concurrency = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_cache_dir_expands_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.features.cache_dir = Some(dir.path().to_string_lossy().to_string());
        assert_eq!(settings.cache_dir(), dir.path());
    }

    #[test]
    fn test_settings_serialize_to_json() {
        let json = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(json["qdrant"]["vector_name"], "code");
        assert_eq!(json["pipeline"]["query_limit"], 10);
    }
}
