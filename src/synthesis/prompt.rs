//! Synthesis instructions sent to the backend

use crate::operations::{Operation, OperationKind, SchemaDefinition};

/// System + user message pair for one chat completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisPrompt {
    pub system: String,
    pub user: String,
}

/// Probe used by `test-llm`
pub const CONNECTION_TEST_PROMPT: &str = r#"You are a helpful assistant. Respond with valid JSON only.

Return a JSON object with two fields:
- message: A short greeting message
- timestamp: The current ISO timestamp

Example:
{
  "message": "Hello! LLM connection successful.",
  "timestamp": "2024-01-01T12:00:00Z"
}"#;

const RESPONSE_FORMAT: &str = r#"## Response Format
Return a JSON object with these exact keys and nothing else:
```json
{
  "input_type": "z.object({ ... })",
  "function": "...",
  "optimistic": "...",
  "validate": "...",
  "notes": "Brief description",
  "pseudocode": "Step-by-step logic",
  "function_name": "camelCaseName"
}
```"#;

/// camelCase identifier derived from an operation phrase
pub fn function_name_for(phrase: &str) -> String {
    let mut out = String::new();
    for (i, word) in phrase
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .enumerate()
    {
        let lower = word.to_lowercase();
        if i == 0 {
            out.push_str(&lower);
        } else {
            let mut chars = lower.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

fn describe_schema(schema: &SchemaDefinition) -> String {
    if schema.is_empty() {
        "No schema information available.".to_string()
    } else {
        schema.describe()
    }
}

fn describe_parameters(operation: &Operation) -> String {
    if operation.parameters.is_empty() {
        return "- (none declared)".to_string();
    }
    operation
        .parameters
        .iter()
        .map(|(name, ty)| format!("- `{}`: {}", name, ty))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the instruction for one operation
pub fn build_prompt(
    operation: &Operation,
    schema: &SchemaDefinition,
    configuration_rules: Option<&str>,
) -> SynthesisPrompt {
    let name = &operation.name;
    let function_name = function_name_for(name);

    let shape = match operation.kind {
        OperationKind::Query => format!(
            r#"## Required Output
A read-only query handler.

- `input_type`: Zod schema for the parameters, e.g. `z.object({{ artistId: z.string() }})`
- `function`: `async ({{ input, ctx }}) => {{ ... }}` using Drizzle ORM with `ctx.db` and `ctx.schema`
- `optimistic` and `validate`: leave empty
- Return the selected rows; never mutate data
- Signature name: `{function_name}`"#
        ),
        OperationKind::Mutation => format!(
            r#"## Required Output
A mutation object with four members:

- `input_type`: Zod object schema with every field required for "{name}"
- `function`: the execute body, `async (corsair, data) => {{ ... }}`, using `corsair.db` and `corsair.schema`
- `optimistic`: `(corsair, data) => ({{ ... }})` returning an immediate UI preview; use `id: `temp_${{Date.now()}}`` for creates
- `validate`: `async (corsair, data) => {{ ... }}` throwing when permissions or business rules fail
- Decide whether this is a CREATE, UPDATE or DELETE and which tables are involved
- Signature name: `{function_name}`"#
        ),
    };

    let rules = match configuration_rules.map(str::trim).filter(|r| !r.is_empty()) {
        Some(rules) => format!("\n## Additional Rules\n{}\n", rules),
        None => String::new(),
    };

    let system = format!(
        "You generate TypeScript data operations for a Drizzle ORM backend. \
         Reply with a single JSON object.\n\n{}",
        RESPONSE_FORMAT
    );

    let user = format!(
        r#"# {kind} Generation Request

## Operation Details
- **Type**: {kind}
- **Name**: "{name}"
- **Prompt**: "{prompt}"

## Parameters
{params}

## Database Schema
{schema}
{shape}
{rules}
Generate the complete {lower_kind} for "{name}"."#,
        kind = capitalize(operation.kind.as_str()),
        lower_kind = operation.kind,
        name = name,
        prompt = operation.prompt,
        params = describe_parameters(operation),
        schema = describe_schema(schema),
        shape = shape,
        rules = rules,
    );

    SynthesisPrompt { system, user }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
