//! Prompt templates.
//!
//! Every template carries the line markers from
//! [`codesage_providers::mock::markers`] so the offline provider can answer
//! them deterministically.

use codesage_index::{AnalysisType, CodeChunk, SearchHit};
use codesage_providers::mock::markers;

/// Upper bound on the packed codebase text sent for an overview.
pub const MAX_OVERVIEW_CHARS: usize = 120_000;

pub const ANALYSIS_SYSTEM: &str = "You are an expert software engineer who analyzes source code. \
Respond with a single valid JSON object and nothing else: no prose, no markdown fences.";

pub const SYNTHESIS_SYSTEM: &str = "You answer questions about a codebase using only the code \
fragments provided. Cite file paths and line ranges. If the fragments do not answer the question, say so.";

pub const EXTRACTION_SYSTEM: &str = "You extract exactly one code element from the candidates \
provided. Respond with a single valid JSON object and nothing else.";

fn response_shape(analysis_type: AnalysisType) -> &'static str {
    match analysis_type {
        AnalysisType::Semantic => {
            r#"{"summary": string, "purpose": string, "entities": [{"name": string, "type": string, "description": string}], "suggestions": [string]}"#
        }
        AnalysisType::Documentation => {
            r#"{"summary": string, "documentationQuality": number 1-10, "missingDocumentation": [string], "suggestions": [string]}"#
        }
        AnalysisType::Complexity => {
            r#"{"summary": string, "complexity": number 1-10, "hotspots": [string], "suggestions": [string]}"#
        }
        AnalysisType::Comprehensive => {
            r#"{"summary": string, "purpose": string, "entities": [{"name": string, "type": string, "description": string}], "complexity": number 1-10, "quality": number 1-10, "documentationQuality": number 1-10, "suggestions": [string]}"#
        }
    }
}

fn task(analysis_type: AnalysisType) -> &'static str {
    match analysis_type {
        AnalysisType::Semantic => "Describe what this code does, why it exists and which entities it defines.",
        AnalysisType::Documentation => "Assess how well this code is documented and what is missing.",
        AnalysisType::Complexity => "Assess the complexity of this code and point out hotspots.",
        AnalysisType::Comprehensive => {
            "Describe this code, its entities, complexity, quality and documentation."
        }
    }
}

pub fn chunk_analysis(chunk: &CodeChunk, analysis_type: AnalysisType) -> String {
    format!(
        "{} {}\n{} {}\n{} {}\nLines: {}-{}\n\n{}\nReturn JSON with this shape:\n{}\n\n```{}\n{}\n```\n\nRespond with JSON only.",
        markers::ANALYSIS_TYPE,
        analysis_type,
        markers::FILE,
        chunk.relative_path,
        markers::LANGUAGE,
        chunk.language,
        chunk.start_line,
        chunk.end_line,
        task(analysis_type),
        response_shape(analysis_type),
        chunk.language,
        chunk.text,
    )
}

pub fn codebase_analysis(source_path: &str, packed: &str, analysis_type: AnalysisType) -> String {
    let packed = truncate_chars(packed, MAX_OVERVIEW_CHARS);
    format!(
        "{} {}\n{} {}\n{} mixed\n\nThe text below is an entire codebase packed into one document. \
{} Summarize the codebase as a whole.\nReturn JSON with this shape:\n{}\n\n```text\n{}\n```\n\nRespond with JSON only.",
        markers::ANALYSIS_TYPE,
        analysis_type,
        markers::FILE,
        source_path,
        markers::LANGUAGE,
        task(analysis_type),
        response_shape(analysis_type),
        packed,
    )
}

fn push_sources(prompt: &mut String, hits: &[SearchHit]) {
    for hit in hits {
        let p = &hit.payload;
        prompt.push_str(&format!(
            "{} {}:{}-{} (score {:.2})\n",
            markers::SOURCE,
            p.file_path,
            p.start_line,
            p.end_line,
            hit.score
        ));
        if !p.analysis.summary.is_empty() {
            prompt.push_str(&format!("Summary: {}\n", p.analysis.summary));
        }
        prompt.push_str(&format!("```{}\n{}\n```\n\n", p.language, p.code_snippet));
    }
}

pub fn synthesis(question: &str, hits: &[SearchHit]) -> String {
    let mut prompt = format!("{} {}\n\nRelevant code fragments:\n\n", markers::QUESTION, question);
    push_sources(&mut prompt, hits);
    prompt.push_str("Answer the question using only these fragments.");
    prompt
}

pub fn extraction(query: &str, element_type: &str, format: &str, hits: &[SearchHit]) -> String {
    let mut prompt = format!(
        "{} {}\n{} {}\nOutput format: {}\n\nCandidates:\n\n",
        markers::EXTRACTION_TARGET,
        element_type,
        markers::QUESTION,
        query,
        format
    );
    push_sources(&mut prompt, hits);
    prompt.push_str(
        r#"Return JSON with this shape: {"extractedContent": string or null, "location": {"filePath": string, "startLine": number, "endLine": number}, "confidence": number 0-1, "reason": string}. Use null for extractedContent when no candidate qualifies."#,
    );
    prompt
}

/// Longest prefix of at most `max` chars.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn chunk() -> CodeChunk {
        CodeChunk {
            file_path: PathBuf::from("/repo/src/utils.js"),
            relative_path: "src/utils.js".to_string(),
            language: "javascript".to_string(),
            start_line: 0,
            end_line: 2,
            text: "function add(a, b) {\n  return a + b;\n}".to_string(),
            is_function: true,
            is_class: false,
            symbol: Some("add".to_string()),
        }
    }

    #[test]
    fn test_chunk_prompt_carries_markers_and_code() {
        let prompt = chunk_analysis(&chunk(), AnalysisType::Complexity);
        assert!(prompt.contains("Analysis type: complexity"));
        assert!(prompt.contains("File: src/utils.js"));
        assert!(prompt.contains("```javascript\nfunction add(a, b)"));
        assert!(prompt.contains("\"complexity\": number 1-10"));
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
