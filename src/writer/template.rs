//! Source templates for generated operation files

use crate::operations::OperationKind;
use crate::synthesis::GeneratedArtifact;
use serde::{Deserialize, Serialize};

pub const DEFAULT_OPTIMISTIC: &str = "(corsair, data) => ({ ...data, id: `temp_${Date.now()}` })";

pub const DEFAULT_VALIDATE: &str = "async (corsair, data) => {\n  if (!corsair.currentUser) throw new Error('Authentication required')\n}";

/// Import specifiers used by the templates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateOptions {
    pub zod_import: String,
    pub procedure_import: String,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            zod_import: "zod".to_string(),
            procedure_import: "../trpc/procedures".to_string(),
        }
    }
}

/// Ensure the input descriptor is a zod schema expression
pub fn normalize_input(input: &str) -> String {
    let input = input.trim().trim_end_matches(';').trim();
    if input.is_empty() {
        return "z.object({})".to_string();
    }
    if input.starts_with("z.") {
        return input.to_string();
    }
    if input.starts_with('{') {
        return format!("z.object({})", input);
    }
    format!("z.object({{ {} }})", input)
}

/// Fix common handler signature slips
///
/// Query handlers receive one destructured `{ input, ctx }` argument.
pub fn normalize_handler(kind: OperationKind, handler: &str) -> String {
    let handler = handler.trim().trim_end_matches(';').trim();
    if kind == OperationKind::Query {
        for (from, to) in [
            ("async (input, ctx)", "async ({ input, ctx })"),
            ("async (ctx)", "async ({ ctx })"),
            ("(input, ctx)", "async ({ input, ctx })"),
            ("(ctx)", "async ({ ctx })"),
        ] {
            if let Some(rest) = handler.strip_prefix(from) {
                return format!("{}{}", to, rest);
            }
        }
    }
    if handler.starts_with('(') {
        return format!("async {}", handler);
    }
    handler.to_string()
}

/// Indent every line after the first by `indent`
fn indent_continuation(text: &str, indent: &str) -> String {
    let mut lines = text.lines();
    let mut out = lines.next().unwrap_or_default().to_string();
    for line in lines {
        out.push('\n');
        if !line.trim().is_empty() {
            out.push_str(indent);
        }
        out.push_str(line);
    }
    out
}

pub fn render_query(variable: &str, artifact: &GeneratedArtifact, options: &TemplateOptions) -> String {
    format!(
        "import {{ z }} from '{zod}'\nimport {{ procedure }} from '{procedure}'\n\nexport const {variable} = procedure\n  .input({input})\n  .query({handler})\n",
        zod = options.zod_import,
        procedure = options.procedure_import,
        input = indent_continuation(&normalize_input(&artifact.input_type), "  "),
        handler = indent_continuation(&normalize_handler(OperationKind::Query, &artifact.function), "  "),
    )
}

pub fn render_mutation(variable: &str, artifact: &GeneratedArtifact, options: &TemplateOptions) -> String {
    let optimistic = artifact
        .optimistic
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_OPTIMISTIC);
    let validate = artifact
        .validate
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_VALIDATE);

    format!(
        "import {{ z }} from '{zod}'\n\nexport const {variable} = {{\n  input: {input},\n  execute: {execute},\n  optimistic: {optimistic},\n  validate: {validate},\n}}\n",
        zod = options.zod_import,
        input = indent_continuation(&normalize_input(&artifact.input_type), "  "),
        execute = indent_continuation(&normalize_handler(OperationKind::Mutation, &artifact.function), "  "),
        optimistic = indent_continuation(optimistic.trim(), "  "),
        validate = indent_continuation(&normalize_handler(OperationKind::Mutation, validate), "  "),
    )
}

pub fn render(kind: OperationKind, variable: &str, artifact: &GeneratedArtifact, options: &TemplateOptions) -> String {
    match kind {
        OperationKind::Query => render_query(variable, artifact, options),
        OperationKind::Mutation => render_mutation(variable, artifact, options),
    }
}
