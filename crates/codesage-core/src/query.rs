//! Natural-language retrieval and code extraction over the chunk store.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use codesage_index::{ChunkStore, EmbeddingProvider, PayloadFilter, SearchHit, SearchOptions};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::analyzer::{extract_json_object, Analyzer};
use crate::error::CodesageError;
use crate::prompts;

/// Candidates handed to the LLM for extraction.
const EXTRACTION_CANDIDATES: usize = 5;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryRequest {
    pub query: String,
    /// Restrict the search to one codebase
    pub codebase_path: Option<String>,
    pub language: Option<String>,
    pub limit: Option<usize>,
    pub score_threshold: Option<f32>,
    /// Skip answer synthesis when true
    pub no_synthesis: bool,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    fn filter(&self) -> Option<PayloadFilter> {
        let mut filter = PayloadFilter::new();
        if let Some(path) = &self.codebase_path {
            filter = filter.with_source_path(path.clone());
        }
        if let Some(language) = &self.language {
            filter = filter.with_language(language.clone());
        }
        (!filter.is_empty()).then_some(filter)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub id: String,
    pub score: f32,
    pub file_path: String,
    pub relative_path: String,
    pub language: String,
    pub start_line: usize,
    pub end_line: usize,
    pub code_snippet: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub summary: String,
}

impl From<&SearchHit> for QueryResult {
    fn from(hit: &SearchHit) -> Self {
        let p = &hit.payload;
        Self {
            id: hit.id.to_string(),
            score: hit.score,
            file_path: p.file_path.clone(),
            relative_path: p.relative_path.clone(),
            language: p.language.clone(),
            start_line: p.start_line,
            end_line: p.end_line,
            code_snippet: p.code_snippet.clone(),
            summary: p.analysis.summary.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub query: String,
    pub results: Vec<QueryResult>,
    pub synthesized_answer: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Markdown,
    Text,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "markdown",
            Self::Text => "text",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "markdown" | "md" => Ok(Self::Markdown),
            "text" | "plain" => Ok(Self::Text),
            other => Err(format!(
                "unknown output format '{}' (expected json, markdown or text)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractRequest {
    pub query: String,
    pub codebase_path: Option<String>,
    /// Kind of element wanted: function, class, ...
    #[serde(rename = "type")]
    pub element_type: String,
    pub format: OutputFormat,
}

impl Default for ExtractRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            codebase_path: None,
            element_type: "function".to_string(),
            format: OutputFormat::Json,
        }
    }
}

impl ExtractRequest {
    /// Bias the embedding toward the requested element kind.
    pub fn augmented_query(&self) -> String {
        format!("{} (looking for a {} definition)", self.query, self.element_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractResponse {
    /// Always serialized; `null` means nothing qualified
    pub extracted_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub format: OutputFormat,
    pub candidates: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ExtractResponse {
    fn nothing(format: OutputFormat, candidates: usize, reason: impl Into<String>) -> Self {
        Self {
            extracted_content: None,
            location: None,
            confidence: None,
            reason: Some(reason.into()),
            format,
            candidates,
            warnings: Vec::new(),
        }
    }
}

pub struct QueryEngine {
    store: Arc<ChunkStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    analyzer: Arc<Analyzer>,
    default_limit: usize,
    default_threshold: f32,
}

impl QueryEngine {
    pub fn new(
        store: Arc<ChunkStore>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        analyzer: Arc<Analyzer>,
        default_limit: usize,
        default_threshold: f32,
    ) -> Self {
        Self {
            store,
            embedder,
            analyzer,
            default_limit: default_limit.max(1),
            default_threshold,
        }
    }

    async fn retrieve(
        &self,
        text: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>, CodesageError> {
        let embedder = self.embedder.as_ref().ok_or_else(|| {
            CodesageError::ServiceUnavailable(
                "semantic search needs an embedding provider and none is enabled".to_string(),
            )
        })?;
        let vector = embedder
            .embed(text)
            .await
            .map_err(|e| CodesageError::ServiceUnavailable(format!("query embedding failed: {}", e)))?;
        Ok(self.store.search(vector, options).await?)
    }

    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, CodesageError> {
        if request.query.trim().is_empty() {
            return Err(CodesageError::Validation("query must not be empty".to_string()));
        }

        let options = SearchOptions {
            limit: request.limit.unwrap_or(self.default_limit).max(1),
            score_threshold: request.score_threshold.unwrap_or(self.default_threshold),
            filter: request.filter(),
        };
        let hits = self.retrieve(&request.query, &options).await?;
        info!("Query '{}' matched {} chunks", request.query, hits.len());

        let mut warnings = Vec::new();
        let synthesized_answer = if hits.is_empty() || request.no_synthesis {
            None
        } else {
            match self
                .analyzer
                .complete(prompts::SYNTHESIS_SYSTEM, prompts::synthesis(&request.query, &hits))
                .await
            {
                Ok(answer) => Some(answer.trim().to_string()),
                Err(e) => {
                    warn!("Answer synthesis failed: {}", e);
                    warnings.push(format!("answer synthesis unavailable: {}", e));
                    None
                }
            }
        };

        Ok(QueryResponse {
            query: request.query.clone(),
            results: hits.iter().map(QueryResult::from).collect(),
            synthesized_answer,
            warnings,
        })
    }

    pub async fn extract(&self, request: &ExtractRequest) -> Result<ExtractResponse, CodesageError> {
        if request.query.trim().is_empty() {
            return Err(CodesageError::Validation("query must not be empty".to_string()));
        }

        let options = SearchOptions {
            limit: EXTRACTION_CANDIDATES,
            score_threshold: self.default_threshold,
            filter: request
                .codebase_path
                .as_ref()
                .map(|p| PayloadFilter::new().with_source_path(p.clone())),
        };
        let hits = self.retrieve(&request.augmented_query(), &options).await?;
        if hits.is_empty() {
            return Ok(ExtractResponse::nothing(
                request.format,
                0,
                format!("No indexed code matched '{}'", request.query),
            ));
        }

        let prompt = prompts::extraction(
            &request.query,
            &request.element_type,
            request.format.as_str(),
            &hits,
        );
        let mut response = match self.analyzer.complete(prompts::EXTRACTION_SYSTEM, prompt).await {
            Ok(raw) => match parse_extraction(&raw) {
                Some(parsed) => parsed.into_response(request.format, hits.len()),
                None => best_candidate(&hits, request.format, "extraction answer was not valid JSON"),
            },
            Err(e) => {
                warn!("Extraction via LLM failed, returning best match: {}", e);
                best_candidate(&hits, request.format, &format!("LLM extraction unavailable: {}", e))
            }
        };

        if let (Some(code), Some(location)) = (&response.extracted_content, &response.location) {
            let language = hits
                .iter()
                .find(|h| h.payload.file_path == location.file_path)
                .unwrap_or(&hits[0])
                .payload
                .language
                .clone();
            response.extracted_content = Some(render(code, location, &language, request.format));
        }
        debug!(
            "Extraction for '{}' returned {}",
            request.query,
            if response.extracted_content.is_some() { "content" } else { "nothing" }
        );
        Ok(response)
    }
}

struct ParsedExtraction {
    content: Option<String>,
    location: Option<Location>,
    confidence: Option<f32>,
    reason: Option<String>,
}

impl ParsedExtraction {
    fn into_response(self, format: OutputFormat, candidates: usize) -> ExtractResponse {
        match self.content {
            Some(content) => ExtractResponse {
                extracted_content: Some(content),
                location: self.location,
                confidence: self.confidence.map(|c| c.clamp(0.0, 1.0)),
                reason: self.reason,
                format,
                candidates,
                warnings: Vec::new(),
            },
            None => ExtractResponse::nothing(
                format,
                candidates,
                self.reason
                    .unwrap_or_else(|| "No candidate matched the requested element".to_string()),
            ),
        }
    }
}

fn parse_extraction(raw: &str) -> Option<ParsedExtraction> {
    let value: Value = serde_json::from_str(extract_json_object(raw)?).ok()?;
    let object = value.as_object()?;
    let location = object.get("location").and_then(|loc| {
        Some(Location {
            file_path: loc.get("filePath")?.as_str()?.to_string(),
            start_line: loc.get("startLine")?.as_u64()? as usize,
            end_line: loc.get("endLine")?.as_u64()? as usize,
        })
    });
    Some(ParsedExtraction {
        content: object
            .get("extractedContent")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string),
        location,
        confidence: object.get("confidence").and_then(Value::as_f64).map(|c| c as f32),
        reason: object.get("reason").and_then(Value::as_str).map(str::to_string),
    })
}

fn best_candidate(hits: &[SearchHit], format: OutputFormat, note: &str) -> ExtractResponse {
    let top = &hits[0];
    ExtractResponse {
        extracted_content: Some(top.payload.code_snippet.clone()),
        location: Some(Location {
            file_path: top.payload.file_path.clone(),
            start_line: top.payload.start_line,
            end_line: top.payload.end_line,
        }),
        confidence: Some(top.score.clamp(0.0, 1.0)),
        reason: Some("Highest-scoring search result".to_string()),
        format,
        candidates: hits.len(),
        warnings: vec![note.to_string()],
    }
}

fn render(code: &str, location: &Location, language: &str, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => json!({
            "code": code,
            "filePath": location.file_path,
            "startLine": location.start_line,
            "endLine": location.end_line,
            "language": language,
        })
        .to_string(),
        OutputFormat::Markdown => format!(
            "### {} (lines {}-{})\n\n```{}\n{}\n```\n",
            location.file_path, location.start_line, location.end_line, language, code
        ),
        OutputFormat::Text => code.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("Markdown".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_augmented_query_mentions_type() {
        let request = ExtractRequest {
            query: "parse the config".into(),
            element_type: "class".into(),
            ..Default::default()
        };
        assert_eq!(request.augmented_query(), "parse the config (looking for a class definition)");
    }

    #[test]
    fn test_parse_extraction_null_content() {
        let parsed = parse_extraction(r#"{"extractedContent": null, "reason": "none fit"}"#).unwrap();
        let response = parsed.into_response(OutputFormat::Text, 3);
        assert!(response.extracted_content.is_none());
        assert_eq!(response.reason.as_deref(), Some("none fit"));

        let json = serde_json::to_value(&response).unwrap();
        assert!(json["extractedContent"].is_null());
    }

    #[test]
    fn test_render_formats() {
        let location = Location {
            file_path: "/repo/a.js".into(),
            start_line: 3,
            end_line: 5,
        };
        let json: Value =
            serde_json::from_str(&render("f()", &location, "javascript", OutputFormat::Json)).unwrap();
        assert_eq!(json["startLine"], 3);
        assert_eq!(json["language"], "javascript");

        let md = render("f()", &location, "javascript", OutputFormat::Markdown);
        assert!(md.contains("```javascript\nf()\n```"));
        assert_eq!(render("f()", &location, "javascript", OutputFormat::Text), "f()");
    }

    #[test]
    fn test_filter_only_when_scoped() {
        assert!(QueryRequest::new("q").filter().is_none());
        let mut request = QueryRequest::new("q");
        request.codebase_path = Some("/repo".into());
        assert_eq!(request.filter().unwrap().source_path.as_deref(), Some("/repo"));
    }
}
