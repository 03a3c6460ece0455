//! Operation declarations in application code
//!
//! An operation is declared by calling one of the configured hooks with the
//! phrase as the first argument and an optional parameter object:
//!
//! ```text
//! const { data } = useOpgenQuery("get albums by artist", { artistId: id as string })
//! await opgen.mutate("increment artist popularity by 10", { artistId })
//! ```

use super::helpers::{get_text, line_of, named_children, property_key, string_value, unwrap_expression, visit};
use super::{SourceLanguage, SourceParser};
use crate::operations::{Operation, OperationKind};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Directories never scanned for declarations
pub const IGNORED_DIRS: &[&str] = &["node_modules", ".git", "dist", "build", ".next", "target"];

/// Call names that declare an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarationHooks {
    pub query: Vec<String>,
    pub mutation: Vec<String>,
}

impl DeclarationHooks {
    fn kind_of(&self, callee: &str) -> Option<OperationKind> {
        if self.query.iter().any(|h| h == callee) {
            Some(OperationKind::Query)
        } else if self.mutation.iter().any(|h| h == callee) {
            Some(OperationKind::Mutation)
        } else {
            None
        }
    }
}

/// True for a parseable source file outside ignored directories
pub fn is_source_file(path: &Path) -> bool {
    if SourceLanguage::from_path(path).is_none() {
        return false;
    }
    !path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|s| IGNORED_DIRS.contains(&s))
    })
}

fn callee_name<'a>(call: &tree_sitter::Node<'a>, source: &'a str) -> Option<&'a str> {
    let function = call.child_by_field_name("function")?;
    match function.kind() {
        "identifier" => get_text(&function, source),
        "member_expression" => function
            .child_by_field_name("property")
            .and_then(|p| get_text(&p, source)),
        _ => None,
    }
}

/// Rough type of a parameter value
fn describe_value(node: tree_sitter::Node, source: &str) -> String {
    match node.kind() {
        "as_expression" | "satisfies_expression" => node
            .named_child(1)
            .and_then(|t| get_text(&t, source))
            .map(str::to_string)
            .unwrap_or_else(|| "unknown".into()),
        "string" | "template_string" => "string".into(),
        "number" => "number".into(),
        "true" | "false" => "boolean".into(),
        "array" => "array".into(),
        "object" => "object".into(),
        "parenthesized_expression" => describe_value(unwrap_expression(node), source),
        _ => "unknown".into(),
    }
}

fn parameters_of(args: &[tree_sitter::Node], source: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    let Some(object) = args.get(1).map(|n| unwrap_expression(*n)) else {
        return params;
    };
    if object.kind() != "object" {
        return params;
    }
    for member in named_children(&object) {
        match member.kind() {
            "pair" => {
                if let (Some(key), Some(value)) = (property_key(&member, source), member.child_by_field_name("value")) {
                    params.insert(key, describe_value(value, source));
                }
            }
            "shorthand_property_identifier" => {
                if let Some(name) = get_text(&member, source) {
                    params.insert(name.to_string(), "unknown".into());
                }
            }
            _ => {}
        }
    }
    params
}

/// Declarations in one file, in source order
pub fn declarations_in_source(
    parser: &mut SourceParser,
    path: &Path,
    source: &str,
    hooks: &DeclarationHooks,
) -> Result<Vec<Operation>> {
    let tree = parser.parse_path(path, source)?;
    let root = tree.root_node();
    if let Some(err) = super::helpers::first_error(&root) {
        anyhow::bail!(err);
    }

    let mut found = Vec::new();
    visit(root, &mut |node| {
        if node.kind() != "call_expression" {
            return;
        }
        let Some(kind) = callee_name(&node, source).and_then(|c| hooks.kind_of(c)) else {
            return;
        };
        let Some(args) = node.child_by_field_name("arguments") else {
            return;
        };
        let args = named_children(&args);
        let Some(name) = args.first().and_then(|a| string_value(a, source)) else {
            return;
        };
        let name = name.trim().to_string();
        if name.is_empty() {
            return;
        }

        let mut operation = Operation::new(kind, name).with_source(path, line_of(&node));
        operation.parameters = parameters_of(&args, source);
        found.push(operation);
    });
    Ok(found)
}

/// Scan every source file under `root`.
///
/// Files that fail to read or parse are skipped with a warning. Returns the
/// declarations grouped by file.
pub fn scan_declarations(
    parser: &mut SourceParser,
    root: &Path,
    hooks: &DeclarationHooks,
) -> Result<BTreeMap<PathBuf, Vec<Operation>>> {
    if !root.is_dir() {
        return Err(anyhow::anyhow!("source root {} is not a directory", root.display()));
    }

    let mut by_file = BTreeMap::new();
    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !e
                    .file_name()
                    .to_str()
                    .is_some_and(|name| IGNORED_DIRS.contains(&name))
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        if !is_source_file(path) {
            continue;
        }
        let content = match std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))
        {
            Ok(c) => c,
            Err(e) => {
                warn!("{:#}", e);
                continue;
            }
        };
        match declarations_in_source(parser, path, &content, hooks) {
            Ok(ops) if !ops.is_empty() => {
                by_file.insert(path.to_path_buf(), ops);
            }
            Ok(_) => {}
            Err(e) => warn!(file = %path.display(), error = %e, "Skipping unparseable file"),
        }
    }
    Ok(by_file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hooks() -> DeclarationHooks {
        DeclarationHooks {
            query: vec!["useOpgenQuery".into()],
            mutation: vec!["useOpgenMutation".into(), "mutate".into()],
        }
    }

    #[test]
    fn test_declarations_with_parameters() {
        let src = r#"
export function Page({ id }: { id: string }) {
  const { data } = useOpgenQuery("get albums by artist", { artistId: id as string, limit: 10 })
  const bump = () => opgen.mutate('increment artist popularity by 10', { artistId: id, tags: [] })
  return <div>{data}</div>
}
"#;
        let mut parser = SourceParser::new().unwrap();
        let ops = declarations_in_source(&mut parser, Path::new("app/page.tsx"), src, &hooks()).unwrap();
        assert_eq!(ops.len(), 2);

        assert_eq!(ops[0].kind, OperationKind::Query);
        assert_eq!(ops[0].name, "get albums by artist");
        assert_eq!(ops[0].line_number, 3);
        assert_eq!(ops[0].parameters["artistId"], "string");
        assert_eq!(ops[0].parameters["limit"], "number");

        assert_eq!(ops[1].kind, OperationKind::Mutation);
        assert_eq!(ops[1].parameters["artistId"], "unknown");
        assert_eq!(ops[1].parameters["tags"], "array");
    }

    #[test]
    fn test_dynamic_names_and_other_calls_ignored() {
        let src = "useOpgenQuery(name); useOpgenQuery(`a ${b}`); other('x'); useOpgenQuery('  ')";
        let mut parser = SourceParser::new().unwrap();
        let ops = declarations_in_source(&mut parser, Path::new("a.ts"), src, &hooks()).unwrap();
        assert!(ops.is_empty());
    }

    #[test]
    fn test_is_source_file() {
        assert!(is_source_file(Path::new("/p/src/app.tsx")));
        assert!(!is_source_file(Path::new("/p/node_modules/x/index.ts")));
        assert!(!is_source_file(Path::new("/p/.next/server/page.js")));
        assert!(!is_source_file(Path::new("/p/README.md")));
    }

    #[test]
    fn test_scan_skips_ignored_and_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::write(root.join("src/a.ts"), "useOpgenQuery('get all artists')").unwrap();
        std::fs::write(root.join("src/broken.ts"), "useOpgenQuery('x' {").unwrap();
        std::fs::write(root.join("node_modules/pkg/b.ts"), "useOpgenQuery('hidden')").unwrap();

        let mut parser = SourceParser::new().unwrap();
        let found = scan_declarations(&mut parser, root, &hooks()).unwrap();
        assert_eq!(found.len(), 1);
        let ops = &found[&root.join("src/a.ts")];
        assert_eq!(ops[0].name, "get all artists");
    }
}
