//! Structured synthesis output and response-shape validation

use crate::error::PipelineError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Implementation produced for one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    /// Input validation descriptor, e.g. `z.object({ id: z.string() })`
    pub input_type: String,
    /// Handler (query) or execute (mutation) body
    pub function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimistic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub pseudocode: String,
    #[serde(default)]
    pub function_name: String,
    /// Produced by the local template instead of the backend
    #[serde(default)]
    pub fallback: bool,
}

/// Wire shape expected from the backend
#[derive(Debug, Deserialize)]
struct ArtifactResponse {
    input_type: String,
    function: String,
    #[serde(default)]
    optimistic: Option<String>,
    #[serde(default)]
    validate: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    pseudocode: Option<String>,
    #[serde(default)]
    function_name: Option<String>,
}

static CODE_FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*\n?(.*?)\n?```").ok());

/// Pull the JSON payload out of a chat reply: a fenced block if present,
/// otherwise the outermost `{ ... }` span.
pub fn extract_json(content: &str) -> &str {
    let content = content.trim();
    let fenced = CODE_FENCE
        .as_ref()
        .and_then(|re| re.captures(content))
        .and_then(|c| c.get(1));
    if let Some(inner) = fenced {
        return inner.as_str().trim();
    }
    match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => content,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Validate a backend reply and turn it into an artifact.
///
/// `default_name` is used when the reply does not suggest a function name.
pub fn parse_artifact(content: &str, default_name: &str) -> Result<GeneratedArtifact, PipelineError> {
    let json = extract_json(content);
    let response: ArtifactResponse = serde_json::from_str(json)
        .map_err(|e| PipelineError::SynthesisShape(format!("{} in {:.80}", e, json)))?;

    if response.input_type.trim().is_empty() {
        return Err(PipelineError::SynthesisShape("`input_type` is empty".into()));
    }
    if response.function.trim().is_empty() {
        return Err(PipelineError::SynthesisShape("`function` is empty".into()));
    }

    Ok(GeneratedArtifact {
        input_type: response.input_type.trim().to_string(),
        function: response.function.trim().to_string(),
        optimistic: non_empty(response.optimistic),
        validate: non_empty(response.validate),
        notes: response.notes.unwrap_or_default().trim().to_string(),
        pseudocode: response.pseudocode.unwrap_or_default().trim().to_string(),
        function_name: non_empty(response.function_name).unwrap_or_else(|| default_name.to_string()),
        fallback: false,
    })
}
