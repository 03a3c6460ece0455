//! Operation synthesis with a templated fallback

use super::artifact::{extract_json, parse_artifact, GeneratedArtifact};
use super::prompt::{build_prompt, function_name_for, CONNECTION_TEST_PROMPT};
use super::provider::LlmProvider;
use crate::error::PipelineError;
use crate::operations::{Operation, OperationKind, SchemaDefinition};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct Synthesizer {
    provider: Arc<dyn LlmProvider>,
}

impl Synthesizer {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Produce an artifact for `operation`.
    ///
    /// Transport and shape failures fall back to a template stub. Only when
    /// that stub cannot be built either (no tables to target) is an error
    /// returned.
    pub async fn synthesize(
        &self,
        operation: &Operation,
        schema: &SchemaDefinition,
        configuration_rules: Option<&str>,
    ) -> Result<GeneratedArtifact, PipelineError> {
        let prompt = build_prompt(operation, schema, configuration_rules);
        let default_name = function_name_for(&operation.name);

        info!(
            operation = %operation.id(),
            provider = %self.provider.id(),
            model = self.provider.model_name(),
            "Requesting synthesis"
        );

        let result = match self.provider.complete(&prompt.system, &prompt.user).await {
            Ok(content) => {
                debug!(preview = %content.chars().take(200).collect::<String>(), "Synthesis reply");
                parse_artifact(&content, &default_name)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(artifact) => Ok(artifact),
            Err(e) => {
                warn!(operation = %operation.id(), error = %e, "Synthesis failed, using fallback template");
                fallback_artifact(operation, schema, &e.to_string()).ok_or_else(|| {
                    PipelineError::SynthesisUnavailable {
                        operation: operation.name.clone(),
                        reason: format!("{} and the schema has no tables for a fallback", e),
                    }
                })
            }
        }
    }
}

fn zod_for(type_description: &str) -> &'static str {
    match type_description.trim().to_lowercase().as_str() {
        "string" => "z.string()",
        "number" => "z.number()",
        "boolean" => "z.boolean()",
        "array" => "z.array(z.any())",
        _ => "z.any()",
    }
}

fn input_descriptor(operation: &Operation) -> String {
    if operation.parameters.is_empty() {
        return "z.object({})".to_string();
    }
    let fields: Vec<String> = operation
        .parameters
        .iter()
        .map(|(name, ty)| format!("{}: {}", name, zod_for(ty)))
        .collect();
    format!("z.object({{ {} }})", fields.join(", "))
}

/// Deterministic stub targeting the table whose name best matches the prompt.
/// `None` when the schema has no tables.
pub fn fallback_artifact(
    operation: &Operation,
    schema: &SchemaDefinition,
    reason: &str,
) -> Option<GeneratedArtifact> {
    let table = schema.best_table_for(&operation.prompt)?;
    let name = &table.name;

    let function = match operation.kind {
        OperationKind::Query => format!(
            "async ({{ input, ctx }}) => {{\n  const rows = await ctx.db.select().from(ctx.schema.{name})\n  return rows\n}}"
        ),
        OperationKind::Mutation => format!(
            "async (corsair, data) => {{\n  const [row] = await corsair.db\n    .insert(corsair.schema.{name})\n    .values(data)\n    .returning()\n  return row\n}}"
        ),
    };

    Some(GeneratedArtifact {
        input_type: input_descriptor(operation),
        function,
        optimistic: None,
        validate: None,
        notes: format!("Template stub for table `{}` ({})", name, reason),
        pseudocode: String::new(),
        function_name: function_name_for(&operation.name),
        fallback: true,
    })
}

/// Reply to the connection probe
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionProbe {
    pub message: String,
    pub timestamp: String,
}

/// Send the connection probe and check the reply shape
pub async fn probe_connection(provider: &dyn LlmProvider) -> Result<ConnectionProbe, PipelineError> {
    let content = provider
        .complete("Respond with JSON only.", CONNECTION_TEST_PROMPT)
        .await?;
    serde_json::from_str(extract_json(&content))
        .map_err(|e| PipelineError::SynthesisShape(format!("probe reply is not {{message, timestamp}}: {}", e)))
}
