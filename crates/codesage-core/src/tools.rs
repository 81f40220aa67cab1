//! Tool surface over the enhancer.
//!
//! Routes `analyze | query | extract | status` calls, validates their
//! arguments before any I/O, and wraps every outcome in a uniform envelope:
//! `{success, message?, error?, errorType?, operationId?, timestamp, ...}`.
//! No error crosses this boundary unwrapped.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use codesage_index::AnalysisType;

use crate::enhancer::{resolve_codebase_path, AnalyzeOptions, AnalyzeOutcome, ProgressiveEnhancer};
use crate::error::CodesageError;
use crate::query::{ExtractRequest, OutputFormat, QueryRequest};

/// Names of every tool this module serves.
pub const TOOL_NAMES: &[&str] = &["analyze", "query", "extract", "status"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

/// Route a tool call and return its envelope.
pub async fn dispatch_tool(call: &ToolCall, enhancer: &ProgressiveEnhancer) -> Value {
    debug!("Dispatching tool: {}", call.tool);

    let outcome = match call.tool.as_str() {
        "analyze" => execute_analyze(&call.args, enhancer).await,
        "query" => execute_query(&call.args, enhancer).await,
        "extract" => execute_extract(&call.args, enhancer).await,
        "status" => execute_status(&call.args, enhancer).await,
        other => Err(CodesageError::Validation(format!(
            "unknown tool '{}' (expected one of: {})",
            other,
            TOOL_NAMES.join(", ")
        ))),
    };

    match outcome {
        Ok(fields) => envelope(fields),
        Err(e) => {
            warn!("Tool {} failed: {}", call.tool, e);
            failure(&e)
        }
    }
}

fn envelope(fields: Map<String, Value>) -> Value {
    let mut body = Map::new();
    body.insert("success".into(), Value::Bool(true));
    body.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
    for (key, value) in fields {
        body.insert(key, value);
    }
    Value::Object(body)
}

fn failure(error: &CodesageError) -> Value {
    json!({
        "success": false,
        "error": error.to_string(),
        "errorType": error.kind(),
        "timestamp": Utc::now().to_rfc3339(),
    })
}

/// Merge a serializable value's fields into an envelope map.
fn fields_of<T: Serialize>(value: &T) -> Result<Map<String, Value>, CodesageError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => {
            let mut map = Map::new();
            map.insert("result".into(), other);
            Ok(map)
        }
        Err(e) => Err(CodesageError::Analysis(format!("cannot serialize result: {}", e))),
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, CodesageError> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| CodesageError::Validation(format!("missing required parameter '{}'", key)))
}

fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

fn flag(args: &Value, key: &str) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(false)
}

async fn execute_analyze(
    args: &Value,
    enhancer: &ProgressiveEnhancer,
) -> Result<Map<String, Value>, CodesageError> {
    let path = required_str(args, "codebasePath")?;
    let analysis_type = match optional_str(args, "analysisType") {
        Some(raw) => raw.parse::<AnalysisType>().map_err(CodesageError::Validation)?,
        None => AnalysisType::default(),
    };
    resolve_codebase_path(path)?;

    let options = AnalyzeOptions {
        analysis_type,
        include_git: flag(args, "includeGit"),
        force: flag(args, "force"),
        update_existing: flag(args, "updateExisting"),
        wait: flag(args, "wait"),
    };

    match enhancer.analyze(path, options).await? {
        AnalyzeOutcome::Completed(report) => {
            let mut fields = fields_of(&report)?;
            fields.insert(
                "message".into(),
                json!(format!(
                    "Analyzed {} files ({} chunks)",
                    report.files_analyzed, report.chunks_analyzed
                )),
            );
            Ok(fields)
        }
        AnalyzeOutcome::Started {
            operation_id,
            source_path,
            files,
        } => {
            let mut fields = Map::new();
            fields.insert(
                "message".into(),
                json!(format!(
                    "Analysis of {} files started in the background",
                    files
                )),
            );
            fields.insert("operationId".into(), json!(operation_id));
            fields.insert("sourcePath".into(), json!(source_path));
            fields.insert("status".into(), json!("running"));
            Ok(fields)
        }
    }
}

async fn execute_query(
    args: &Value,
    enhancer: &ProgressiveEnhancer,
) -> Result<Map<String, Value>, CodesageError> {
    let query = required_str(args, "query")?;
    let codebase_path = optional_str(args, "codebasePath");
    if let Some(path) = codebase_path {
        resolve_codebase_path(path)?;
    }

    let request = QueryRequest {
        query: query.to_string(),
        codebase_path: codebase_path.map(str::to_string),
        language: optional_str(args, "language").map(str::to_string),
        limit: args.get("limit").and_then(Value::as_u64).map(|n| n as usize),
        score_threshold: args
            .get("scoreThreshold")
            .and_then(Value::as_f64)
            .map(|t| t as f32),
        no_synthesis: flag(args, "noSynthesis"),
    };
    if let Some(threshold) = request.score_threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(CodesageError::Validation(
                "scoreThreshold must be within 0.0..=1.0".to_string(),
            ));
        }
    }

    let response = enhancer.query(request).await?;
    let mut fields = fields_of(&response)?;
    fields.insert(
        "message".into(),
        json!(format!("Found {} relevant chunks", response.results.len())),
    );
    Ok(fields)
}

async fn execute_extract(
    args: &Value,
    enhancer: &ProgressiveEnhancer,
) -> Result<Map<String, Value>, CodesageError> {
    let query = required_str(args, "query")?;
    let codebase_path = required_str(args, "codebasePath")?;
    let format = match optional_str(args, "format") {
        Some(raw) => raw.parse::<OutputFormat>().map_err(CodesageError::Validation)?,
        None => OutputFormat::default(),
    };
    resolve_codebase_path(codebase_path)?;

    let request = ExtractRequest {
        query: query.to_string(),
        codebase_path: Some(codebase_path.to_string()),
        element_type: optional_str(args, "type").unwrap_or("function").to_string(),
        format,
    };
    let response = enhancer.extract(request).await?;
    let mut fields = fields_of(&response)?;
    if response.extracted_content.is_none() {
        fields.insert("message".into(), json!("Nothing matching was found"));
    }
    Ok(fields)
}

async fn execute_status(
    args: &Value,
    enhancer: &ProgressiveEnhancer,
) -> Result<Map<String, Value>, CodesageError> {
    let operation_id = required_str(args, "operationId")?;
    let operation = enhancer.status(operation_id).await?;
    let mut fields = fields_of(&operation)?;
    // `error` is reserved for failures of the call itself
    if let Some(error) = fields.remove("error") {
        fields.insert("operationError".into(), error);
    }
    fields.insert("operationId".into(), json!(operation.id));
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_envelope_shape() {
        let value = failure(&CodesageError::Validation("missing required parameter 'query'".into()));
        assert_eq!(value["success"], false);
        assert_eq!(value["errorType"], "validation");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_required_str_rejects_blank() {
        let args = json!({"query": "  ", "codebasePath": "/repo"});
        assert!(required_str(&args, "query").is_err());
        assert!(required_str(&args, "missing").is_err());
        assert_eq!(required_str(&args, "codebasePath").unwrap(), "/repo");
    }

    #[test]
    fn test_envelope_merges_fields() {
        let mut fields = Map::new();
        fields.insert("results".into(), json!([]));
        let value = envelope(fields);
        assert_eq!(value["success"], true);
        assert!(value["results"].is_array());
    }
}
