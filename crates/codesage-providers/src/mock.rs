//! Deterministic mock provider.
//!
//! Used when no real provider is configured. The mock reads the prompt
//! markers in [`markers`] to decide which response shape to produce and
//! derives its content from the code embedded in the prompt, so identical
//! prompts always yield identical responses.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::debug;

use crate::{CompletionRequest, CompletionResponse, LLMProvider, ProviderError, Usage};

/// Line prefixes shared between prompt templates and the mock provider.
pub mod markers {
    pub const ANALYSIS_TYPE: &str = "Analysis type:";
    pub const FILE: &str = "File:";
    pub const LANGUAGE: &str = "Language:";
    pub const QUESTION: &str = "Question:";
    pub const EXTRACTION_TARGET: &str = "Extraction target:";
    pub const SOURCE: &str = "Source:";
}

/// Ordered entity patterns: (regex, entity type).
static ENTITY_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (
            r"(?m)^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)",
            "function",
        ),
        (
            r"(?m)^\s*(?:export\s+)?(?:default\s+)?class\s+([A-Za-z_$][\w$]*)",
            "class",
        ),
        (
            r"(?m)^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*=\s*(?:async\s*)?(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*=>",
            "function",
        ),
        (r"(?m)^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)", "function"),
        (r"(?m)^\s*class\s+([A-Za-z_]\w*)\s*[:(]", "class"),
        (
            r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?fn\s+([A-Za-z_]\w*)",
            "function",
        ),
        (
            r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait)\s+([A-Za-z_]\w*)",
            "type",
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, kind)| Regex::new(pattern).ok().map(|re| (re, kind)))
    .collect()
});

static BRANCH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:if|for|while|case|catch|except|elif|match)\b|&&|\|\|").expect("static regex")
});

static SOURCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^Source:\s*(\S+?):(\d+)-(\d+)").expect("static regex")
});

/// A deterministic stand-in for a real LLM.
#[derive(Debug, Clone, Default)]
pub struct MockProvider;

impl MockProvider {
    pub fn new() -> Self {
        Self
    }

    fn respond(&self, prompt: &str) -> String {
        if prompt.contains(markers::EXTRACTION_TARGET) {
            extraction_response(prompt)
        } else if prompt.contains(markers::QUESTION) {
            synthesis_response(prompt)
        } else {
            let analysis_type =
                marker_value(prompt, markers::ANALYSIS_TYPE).unwrap_or_else(|| "semantic".to_string());
            analysis_response(prompt, &analysis_type)
        }
    }
}

#[async_trait]
impl LLMProvider for MockProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let prompt = request.last_user_message().unwrap_or_default();
        debug!("Mock provider answering prompt of {} bytes", prompt.len());
        let content = self.respond(prompt);
        let completion_tokens = (content.len() / 4) as u32;
        let prompt_tokens = (prompt.len() / 4) as u32;

        Ok(CompletionResponse {
            content,
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            model: "mock".to_string(),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock"
    }
}

/// Value following `marker` on its own line.
fn marker_value(prompt: &str, marker: &str) -> Option<String> {
    prompt
        .lines()
        .find_map(|line| line.trim().strip_prefix(marker))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Contents of every fenced code block, in order.
fn code_blocks(prompt: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in prompt.lines() {
        if line.trim_start().starts_with("```") {
            match current.take() {
                Some(lines) => blocks.push(lines.join("\n")),
                None => current = Some(Vec::new()),
            }
        } else if let Some(lines) = current.as_mut() {
            lines.push(line);
        }
    }
    blocks
}

fn entities_in(code: &str) -> Vec<(String, &'static str)> {
    let mut found: Vec<(String, &'static str)> = Vec::new();
    for (pattern, kind) in ENTITY_PATTERNS.iter() {
        for caps in pattern.captures_iter(code) {
            if let Some(name) = caps.get(1) {
                let name = name.as_str().to_string();
                if !found.iter().any(|(n, _)| *n == name) {
                    found.push((name, *kind));
                }
            }
        }
    }
    found
}

fn complexity_of(code: &str) -> u32 {
    let branches = BRANCH_PATTERN.find_iter(code).count() as u32;
    (1 + branches / 2).clamp(1, 10)
}

fn documentation_quality_of(code: &str) -> u32 {
    let lines: Vec<&str> = code.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return 1;
    }
    let comments = lines
        .iter()
        .filter(|l| {
            let t = l.trim_start();
            t.starts_with("//")
                || t.starts_with('#')
                || t.starts_with("/*")
                || t.starts_with('*')
                || t.starts_with("\"\"\"")
        })
        .count();
    let ratio = comments as f32 / lines.len() as f32;
    ((1.0 + ratio * 20.0).round() as u32).clamp(1, 10)
}

fn analysis_response(prompt: &str, analysis_type: &str) -> String {
    let code = code_blocks(prompt).into_iter().next().unwrap_or_default();
    let file = marker_value(prompt, markers::FILE).unwrap_or_else(|| "unknown file".to_string());
    let language = marker_value(prompt, markers::LANGUAGE).unwrap_or_else(|| "text".to_string());
    let entities = entities_in(&code);
    let line_count = code.lines().count();
    let complexity = complexity_of(&code);
    let doc_quality = documentation_quality_of(&code);

    let summary = if entities.is_empty() {
        format!("{} lines of {} from {}", line_count, language, file)
    } else {
        let names: Vec<&str> = entities.iter().map(|(n, _)| n.as_str()).collect();
        format!(
            "{} code from {} defining {}",
            language,
            file,
            names.join(", ")
        )
    };
    let entity_values: Vec<serde_json::Value> = entities
        .iter()
        .map(|(name, kind)| {
            json!({
                "name": name,
                "type": kind,
                "description": format!("{} {} declared in {}", kind, name, file),
            })
        })
        .collect();

    let mut suggestions = Vec::new();
    if doc_quality < 4 {
        suggestions.push("Add comments describing the intent of this code".to_string());
    }
    if complexity > 6 {
        suggestions.push("Split branching logic into smaller functions".to_string());
    }

    let value = match analysis_type {
        "documentation" => json!({
            "summary": summary,
            "documentationQuality": doc_quality,
            "missingDocumentation": entities.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>(),
            "suggestions": suggestions,
        }),
        "complexity" => json!({
            "summary": summary,
            "complexity": complexity,
            "hotspots": entities.iter().map(|(n, _)| n.clone()).take(3).collect::<Vec<_>>(),
            "suggestions": suggestions,
        }),
        "comprehensive" => json!({
            "summary": summary,
            "purpose": format!("Implements {} behaviour in {}", language, file),
            "entities": entity_values,
            "complexity": complexity,
            "quality": 7,
            "documentationQuality": doc_quality,
            "suggestions": suggestions,
        }),
        _ => json!({
            "summary": summary,
            "purpose": format!("Implements {} behaviour in {}", language, file),
            "entities": entity_values,
            "suggestions": suggestions,
        }),
    };
    value.to_string()
}

fn synthesis_response(prompt: &str) -> String {
    let question = marker_value(prompt, markers::QUESTION).unwrap_or_default();
    let sources: Vec<String> = SOURCE_PATTERN
        .captures_iter(prompt)
        .map(|c| format!("{} (lines {}-{})", &c[1], &c[2], &c[3]))
        .collect();

    match sources.first() {
        None => format!("No indexed code was relevant to \"{}\".", question),
        Some(first) => format!(
            "The most relevant code for \"{}\" is in {}. {} fragment(s) were considered: {}.",
            question,
            first,
            sources.len(),
            sources.join(", ")
        ),
    }
}

fn extraction_response(prompt: &str) -> String {
    let target = marker_value(prompt, markers::EXTRACTION_TARGET).unwrap_or_else(|| "code".to_string());
    let source = SOURCE_PATTERN.captures(prompt);
    let block = code_blocks(prompt).into_iter().next();

    match (source, block) {
        (Some(source), Some(code)) => json!({
            "extractedContent": code,
            "location": {
                "filePath": &source[1],
                "startLine": source[2].parse::<u64>().unwrap_or(0),
                "endLine": source[3].parse::<u64>().unwrap_or(0),
            },
            "confidence": 0.6,
            "reason": format!("First candidate matching {}", target),
        })
        .to_string(),
        _ => json!({
            "extractedContent": null,
            "reason": format!("No candidate {} was provided", target),
        })
        .to_string(),
    }
}
