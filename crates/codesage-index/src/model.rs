//! Persistent data model: chunk identity, analysis results and stored records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Deterministic identity of a chunk.
///
/// Derived from `(relative_path, start_line, end_line)` only, so the same
/// window of the same file always maps to the same point and re-analysis
/// overwrites instead of duplicating. Rendered as a UUID string because the
/// vector index only accepts UUIDs or integers as point ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    pub fn new(relative_path: &str, start_line: usize, end_line: usize) -> Self {
        let normalized = relative_path.replace('\\', "/");
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hasher.update([0u8]);
        hasher.update((start_line as u64).to_le_bytes());
        hasher.update((end_line as u64).to_le_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(Uuid::from_bytes(bytes).to_string())
    }

    /// Wrap an id read back from the index.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which prompt template an analysis used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    #[default]
    Semantic,
    Documentation,
    Complexity,
    Comprehensive,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Documentation => "documentation",
            Self::Complexity => "complexity",
            Self::Comprehensive => "comprehensive",
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "semantic" => Ok(Self::Semantic),
            "documentation" => Ok(Self::Documentation),
            "complexity" => Ok(Self::Complexity),
            "comprehensive" => Ok(Self::Comprehensive),
            other => Err(format!(
                "unknown analysis type '{}' (expected semantic, documentation, complexity or comprehensive)",
                other
            )),
        }
    }
}

/// A named code element reported by the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub description: String,
}

/// Structured LLM analysis of one chunk (or an aggregate of several).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// Scores are on a 1-10 scale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_quality: Option<f32>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub analysis_type: AnalysisType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub language: String,
    /// Set when the provider answered but the body could not be parsed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisResult {
    pub fn empty(analysis_type: AnalysisType, language: &str) -> Self {
        Self {
            summary: String::new(),
            purpose: String::new(),
            entities: Vec::new(),
            complexity: None,
            quality: None,
            documentation_quality: None,
            suggestions: Vec::new(),
            analysis_type,
            timestamp: Utc::now(),
            language: language.to_string(),
            error: None,
        }
    }

    /// A low-confidence result carrying an explicit error marker.
    pub fn degraded(analysis_type: AnalysisType, language: &str, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::empty(analysis_type, language)
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

/// Metadata stored with each point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPayload {
    /// Root path of the analyzed codebase
    pub source_path: String,
    /// Absolute path of the file the chunk came from
    pub file_path: String,
    /// Path relative to `source_path`, as used for the chunk id
    #[serde(default)]
    pub relative_path: String,
    pub language: String,
    pub start_line: usize,
    pub end_line: usize,
    pub code_snippet: String,
    pub analysis: AnalysisResult,
    pub timestamp: DateTime<Utc>,
}

/// The unit of persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunkRecord {
    pub id: ChunkId,
    /// Absent when embeddings were unavailable
    pub vector: Option<Vec<f32>>,
    pub payload: ChunkPayload,
}

/// A search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: ChunkId,
    pub score: f32,
    pub payload: ChunkPayload,
}

/// Equality filters on payload fields. All set fields must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadFilter {
    pub source_path: Option<String>,
    pub file_path: Option<String>,
    pub language: Option<String>,
}

impl PayloadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source_path(mut self, source_path: impl Into<String>) -> Self {
        self.source_path = Some(source_path.into());
        self
    }

    pub fn with_file_path(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.source_path.is_none() && self.file_path.is_none() && self.language.is_none()
    }

    /// (payload key, expected value) pairs for every set field.
    pub fn conditions(&self) -> Vec<(&'static str, &str)> {
        let mut conditions = Vec::new();
        if let Some(v) = &self.source_path {
            conditions.push(("sourcePath", v.as_str()));
        }
        if let Some(v) = &self.file_path {
            conditions.push(("filePath", v.as_str()));
        }
        if let Some(v) = &self.language {
            conditions.push(("language", v.as_str()));
        }
        conditions
    }

    pub fn matches(&self, payload: &ChunkPayload) -> bool {
        self.source_path.as_deref().map_or(true, |v| payload.source_path == v)
            && self.file_path.as_deref().map_or(true, |v| payload.file_path == v)
            && self.language.as_deref().map_or(true, |v| payload.language == v)
    }
}
