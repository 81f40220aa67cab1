//! LLM-backed chunk analysis.
//!
//! A provider answer that cannot be parsed is never an error: it becomes a
//! degraded [`AnalysisResult`] carrying an error marker. Only provider
//! failures that survive every retry surface as [`CodesageError`].

use std::sync::Arc;

use codesage_index::{AnalysisResult, AnalysisType, CodeChunk, Entity};
use codesage_providers::{retry, CompletionRequest, LLMProvider, ProviderError, RetryPolicy};
use futures_util::stream::{self, StreamExt};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::CodesageError;
use crate::prompts;

pub struct Analyzer {
    provider: Arc<dyn LLMProvider>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl Analyzer {
    pub fn new(provider: Arc<dyn LLMProvider>, retry: RetryPolicy, concurrency: usize) -> Self {
        Self {
            provider,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    pub fn provider(&self) -> &Arc<dyn LLMProvider> {
        &self.provider
    }

    /// One completion with retry. Terminal failures carry the last provider message.
    pub async fn complete(&self, system: &str, prompt: String) -> Result<String, CodesageError> {
        let request = CompletionRequest::single(system, prompt);
        let response = retry(&self.retry, "LLM completion", || {
            self.provider.complete(request.clone())
        })
        .await
        .map_err(|e| match e {
            ProviderError::Configuration(msg) => CodesageError::Configuration(msg),
            other => CodesageError::Analysis(format!("{} request failed: {}", self.provider.name(), other)),
        })?;
        Ok(response.content)
    }

    pub async fn analyze(
        &self,
        chunk: &CodeChunk,
        analysis_type: AnalysisType,
    ) -> Result<AnalysisResult, CodesageError> {
        debug!(
            "Analyzing {}:{}-{} ({})",
            chunk.relative_path, chunk.start_line, chunk.end_line, analysis_type
        );
        let raw = self
            .complete(prompts::ANALYSIS_SYSTEM, prompts::chunk_analysis(chunk, analysis_type))
            .await?;
        let result = parse_analysis(&raw, analysis_type, &chunk.language);
        if let Some(error) = &result.error {
            warn!(
                "Unparsable analysis for {}:{}: {}",
                chunk.relative_path, chunk.start_line, error
            );
        }
        Ok(result)
    }

    /// Analyze chunks with bounded concurrency. Output order matches input order.
    pub async fn analyze_batch(
        &self,
        chunks: &[CodeChunk],
        analysis_type: AnalysisType,
    ) -> Vec<Result<AnalysisResult, CodesageError>> {
        let futures: Vec<_> = chunks
            .iter()
            .map(|chunk| self.analyze(chunk, analysis_type))
            .collect();
        stream::iter(futures)
            .buffered(self.concurrency)
            .collect()
            .await
    }

    /// Analyze several chunks and merge them into one result.
    pub async fn analyze_multiple(
        &self,
        chunks: &[CodeChunk],
        analysis_type: AnalysisType,
    ) -> Result<AnalysisResult, CodesageError> {
        let language = common_language(chunks);
        let mut results = Vec::with_capacity(chunks.len());
        let mut first_error = None;
        for outcome in self.analyze_batch(chunks, analysis_type).await {
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if results.is_empty() => Err(e),
            _ => Ok(aggregate(&results, analysis_type, &language)),
        }
    }

    /// Analyze a packed whole-codebase document.
    pub async fn analyze_codebase(
        &self,
        source_path: &str,
        packed: &str,
        analysis_type: AnalysisType,
    ) -> Result<AnalysisResult, CodesageError> {
        let raw = self
            .complete(
                prompts::ANALYSIS_SYSTEM,
                prompts::codebase_analysis(source_path, packed, analysis_type),
            )
            .await?;
        Ok(parse_analysis(&raw, analysis_type, "mixed"))
    }
}

fn common_language(chunks: &[CodeChunk]) -> String {
    match chunks.first() {
        Some(first) if chunks.iter().all(|c| c.language == first.language) => first.language.clone(),
        Some(_) => "mixed".to_string(),
        None => "unknown".to_string(),
    }
}

/// The outermost `{ ... }` span of a response, tolerating prose or fences around it.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Parse a provider answer, degrading instead of failing.
pub fn parse_analysis(raw: &str, analysis_type: AnalysisType, language: &str) -> AnalysisResult {
    let Some(json) = extract_json_object(raw) else {
        return AnalysisResult::degraded(analysis_type, language, "no JSON object in response");
    };
    let object = match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(object)) => object,
        Ok(_) => {
            return AnalysisResult::degraded(analysis_type, language, "response is not a JSON object")
        }
        Err(e) => {
            return AnalysisResult::degraded(analysis_type, language, format!("invalid JSON: {}", e))
        }
    };

    let mut result = AnalysisResult::empty(analysis_type, language);
    result.summary = string_field(&object, "summary");
    result.purpose = string_field(&object, "purpose");
    result.entities = object
        .get("entities")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_entity).collect())
        .unwrap_or_default();
    result.complexity = score_field(&object, "complexity");
    result.quality = score_field(&object, "quality");
    result.documentation_quality = score_field(&object, "documentationQuality");
    result.suggestions = object
        .get("suggestions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|s| s.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    result
}

fn string_field(object: &Map<String, Value>, key: &str) -> String {
    object
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Scores may arrive as numbers or numeric strings; clamped to 1-10.
fn score_field(object: &Map<String, Value>, key: &str) -> Option<f32> {
    let value = object.get(key)?;
    let score = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Some((score as f32).clamp(1.0, 10.0))
}

fn parse_entity(value: &Value) -> Option<Entity> {
    match value {
        Value::String(name) => Some(Entity {
            name: name.clone(),
            kind: String::new(),
            description: String::new(),
        }),
        Value::Object(object) => {
            let name = object.get("name")?.as_str()?.to_string();
            Some(Entity {
                name,
                kind: string_field(object, "type"),
                description: string_field(object, "description"),
            })
        }
        _ => None,
    }
}

fn average(values: impl Iterator<Item = f32>) -> Option<f32> {
    let (sum, count) = values.fold((0.0f32, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f32)
}

/// Merge results: entities unioned by name (first wins), scores averaged over
/// the results that reported them, suggestions concatenated.
pub fn aggregate(
    results: &[AnalysisResult],
    analysis_type: AnalysisType,
    language: &str,
) -> AnalysisResult {
    let mut merged = AnalysisResult::empty(analysis_type, language);

    let mut summaries: Vec<&str> = Vec::new();
    for result in results {
        if !result.summary.is_empty() && !summaries.contains(&result.summary.as_str()) {
            summaries.push(&result.summary);
        }
        for entity in &result.entities {
            if !merged.entities.iter().any(|e| e.name == entity.name) {
                merged.entities.push(entity.clone());
            }
        }
        merged.suggestions.extend(result.suggestions.iter().cloned());
    }
    merged.summary = summaries.join(" ");
    merged.purpose = results
        .iter()
        .map(|r| r.purpose.as_str())
        .find(|p| !p.is_empty())
        .unwrap_or_default()
        .to_string();

    merged.complexity = average(results.iter().filter_map(|r| r.complexity));
    merged.quality = average(results.iter().filter_map(|r| r.quality));
    merged.documentation_quality = average(results.iter().filter_map(|r| r.documentation_quality));

    if !results.is_empty() && results.iter().all(AnalysisResult::is_degraded) {
        merged.error = Some("every aggregated analysis was degraded".to_string());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use codesage_providers::{CompletionResponse, MockProvider, Usage};
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays canned answers in order; the last one repeats.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<String, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<String, ProviderError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            };
            next.map(|content| CompletionResponse {
                content,
                usage: Usage::default(),
                model: "scripted".to_string(),
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_millis(1), false)
    }

    fn chunk(rel: &str, start: usize, text: &str) -> CodeChunk {
        CodeChunk {
            file_path: PathBuf::from(format!("/repo/{}", rel)),
            relative_path: rel.to_string(),
            language: "javascript".to_string(),
            start_line: start,
            end_line: start + text.lines().count().saturating_sub(1),
            text: text.to_string(),
            is_function: false,
            is_class: false,
            symbol: None,
        }
    }

    #[tokio::test]
    async fn test_mock_provider_semantic_analysis() {
        let analyzer = Analyzer::new(Arc::new(MockProvider::new()), fast_retry(), 2);
        let result = analyzer
            .analyze(
                &chunk("src/utils.js", 0, "function formatDate(d) {\n  return d;\n}"),
                AnalysisType::Semantic,
            )
            .await
            .unwrap();

        assert!(!result.is_degraded());
        assert_eq!(result.entities[0].name, "formatDate");
        assert_eq!(result.language, "javascript");
        assert!(result.summary.contains("src/utils.js"));
    }

    #[tokio::test]
    async fn test_unparsable_body_degrades() {
        let provider = ScriptedProvider::new(vec![Ok("Sorry, I cannot help with that.".into())]);
        let analyzer = Analyzer::new(Arc::new(provider), fast_retry(), 1);
        let result = analyzer
            .analyze(&chunk("a.js", 0, "x()"), AnalysisType::Semantic)
            .await
            .unwrap();

        assert!(result.is_degraded());
        assert!(result.entities.is_empty());
        assert!(result.summary.is_empty());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Network("reset".into())),
            Err(ProviderError::Api { status: 503, body: "busy".into() }),
            Ok(r#"{"summary": "ok"}"#.into()),
        ]));
        let analyzer = Analyzer::new(provider.clone(), fast_retry(), 1);
        let result = analyzer
            .analyze(&chunk("a.js", 0, "x()"), AnalysisType::Semantic)
            .await
            .unwrap();

        assert_eq!(result.summary, "ok");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_last_message() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::Api {
            status: 500,
            body: "upstream exploded".into(),
        })]));
        let analyzer = Analyzer::new(provider.clone(), fast_retry(), 1);
        let err = analyzer
            .analyze(&chunk("a.js", 0, "x()"), AnalysisType::Semantic)
            .await
            .unwrap_err();

        assert!(matches!(err, CodesageError::Analysis(ref m) if m.contains("upstream exploded")));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_parse_tolerates_fences_and_string_scores() {
        let raw = "Here you go:\n```json\n{\"summary\": \"s\", \"complexity\": \"12\", \"quality\": 0, \"entities\": [\"helper\", {\"name\": \"Cache\", \"type\": \"class\"}]}\n```";
        let result = parse_analysis(raw, AnalysisType::Comprehensive, "rust");
        assert!(!result.is_degraded());
        assert_eq!(result.complexity, Some(10.0));
        assert_eq!(result.quality, Some(1.0));
        assert_eq!(result.entities.len(), 2);
        assert_eq!(result.entities[1].kind, "class");
    }

    #[test]
    fn test_parse_invalid_json_degrades() {
        let result = parse_analysis("{\"summary\": ", AnalysisType::Semantic, "rust");
        assert!(result.is_degraded());
        let result = parse_analysis("{not json}", AnalysisType::Semantic, "rust");
        assert!(result.error.unwrap().starts_with("invalid JSON"));
    }

    #[test]
    fn test_aggregate_rules() {
        let mut a = AnalysisResult::empty(AnalysisType::Comprehensive, "js");
        a.entities = vec![Entity {
            name: "run".into(),
            kind: "function".into(),
            description: "first".into(),
        }];
        a.complexity = Some(4.0);
        a.suggestions = vec!["split".into()];

        let mut b = AnalysisResult::empty(AnalysisType::Comprehensive, "js");
        b.entities = vec![
            Entity {
                name: "run".into(),
                kind: "function".into(),
                description: "second".into(),
            },
            Entity {
                name: "stop".into(),
                kind: "function".into(),
                description: String::new(),
            },
        ];
        b.complexity = Some(8.0);
        b.quality = Some(6.0);
        b.suggestions = vec!["split".into()];

        let merged = aggregate(&[a, b], AnalysisType::Comprehensive, "js");
        assert_eq!(merged.entities.len(), 2);
        assert_eq!(merged.entities[0].description, "first");
        assert_eq!(merged.complexity, Some(6.0));
        assert_eq!(merged.quality, Some(6.0));
        assert_eq!(merged.documentation_quality, None);
        assert_eq!(merged.suggestions, vec!["split", "split"]);
        assert!(!merged.is_degraded());
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let analyzer = Analyzer::new(Arc::new(MockProvider::new()), fast_retry(), 3);
        let chunks: Vec<CodeChunk> = ["alpha", "beta", "gamma", "delta"]
            .iter()
            .map(|name| chunk(&format!("{}.js", name), 0, &format!("function {}() {{}}", name)))
            .collect();

        let results = analyzer.analyze_batch(&chunks, AnalysisType::Semantic).await;
        let names: Vec<String> = results
            .into_iter()
            .map(|r| r.unwrap().entities[0].name.clone())
            .collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma", "delta"]);
    }

    #[tokio::test]
    async fn test_analyze_multiple_merges() {
        let analyzer = Analyzer::new(Arc::new(MockProvider::new()), fast_retry(), 2);
        let chunks = vec![
            chunk("a.js", 0, "function one() {}"),
            chunk("a.js", 80, "function two() {}\nfunction one() {}"),
        ];
        let merged = analyzer
            .analyze_multiple(&chunks, AnalysisType::Semantic)
            .await
            .unwrap();
        let names: Vec<&str> = merged.entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two"]);
        assert_eq!(merged.language, "javascript");
    }
}
