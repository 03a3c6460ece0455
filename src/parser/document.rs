//! Parsed model of a registry source file
//!
//! A registry file is a handful of imports plus top-level object literals
//! (`export const queries = { 'get all artists': queriesModule.getAllArtists }`).
//! The document keeps byte ranges for each piece so edits are computed from
//! the syntax tree, never by searching text. Every edit re-parses its output
//! and checks that the intended change is present exactly once.

use super::helpers::{
    get_text, line_of, named_children, property_key, string_value, unwrap_expression,
};
use super::{SourceLanguage, SourceParser};
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use tree_sitter::Node;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDecl {
    /// `X` in `import * as X from '...'`
    pub namespace: Option<String>,
    pub source: String,
    pub line: usize,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub key: String,
    /// Raw value text
    pub value: String,
    /// Members of an object-valued entry; string literals are unquoted
    pub fields: Option<BTreeMap<String, String>>,
    pub line: usize,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralMap {
    /// Declared variable name
    pub name: String,
    pub line: usize,
    /// Byte offset of `{`
    pub open: usize,
    /// Byte offset of `}`
    pub close: usize,
    pub entries: Vec<MapEntry>,
}

impl LiteralMap {
    pub fn entry(&self, key: &str) -> Option<&MapEntry> {
        self.entries.iter().find(|e| e.key == key)
    }
}

#[derive(Debug, Clone)]
pub struct RegistryDocument {
    source: String,
    imports: Vec<ImportDecl>,
    maps: Vec<LiteralMap>,
}

/// Normalize a module specifier so `./queries`, `./queries/` and
/// `./queries/index.ts` compare equal
pub fn normalize_specifier(specifier: &str) -> String {
    let mut s = specifier.trim().trim_end_matches('/').to_string();
    for ext in [".ts", ".tsx", ".js", ".mjs"] {
        if let Some(stripped) = s.strip_suffix(ext) {
            s = stripped.to_string();
            break;
        }
    }
    if let Some(stripped) = s.strip_suffix("/index") {
        s = stripped.to_string();
    }
    s
}

fn quote_key(key: &str) -> String {
    format!("\"{}\"", key.replace('\\', "\\\\").replace('"', "\\\""))
}

impl RegistryDocument {
    /// Parse a registry file. Fails on syntax errors.
    pub fn parse(parser: &mut SourceParser, source: &str) -> Result<Self> {
        let tree = parser.parse(SourceLanguage::TypeScript, source)?;
        let root = tree.root_node();
        if let Some(err) = super::helpers::first_error(&root) {
            bail!(err);
        }

        let mut imports = Vec::new();
        let mut maps = Vec::new();
        let mut cursor = root.walk();
        for stmt in root.named_children(&mut cursor) {
            match stmt.kind() {
                "import_statement" => {
                    if let Some(import) = extract_import(&stmt, source) {
                        imports.push(import);
                    }
                }
                "lexical_declaration" | "variable_declaration" => {
                    extract_maps(&stmt, source, &mut maps);
                }
                "export_statement" => {
                    if let Some(decl) = stmt.child_by_field_name("declaration") {
                        if matches!(decl.kind(), "lexical_declaration" | "variable_declaration") {
                            extract_maps(&decl, source, &mut maps);
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            source: source.to_string(),
            imports,
            maps,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn imports(&self) -> &[ImportDecl] {
        &self.imports
    }

    pub fn maps(&self) -> &[LiteralMap] {
        &self.maps
    }

    pub fn map(&self, name: &str) -> Option<&LiteralMap> {
        self.maps.iter().find(|m| m.name == name)
    }

    pub fn has_entry(&self, map: &str, key: &str) -> bool {
        self.map(map).is_some_and(|m| m.entry(key).is_some())
    }

    /// Namespace bound to `specifier` by an existing `import * as X` statement
    pub fn namespace_for(&self, specifier: &str) -> Option<&str> {
        let wanted = normalize_specifier(specifier);
        self.imports
            .iter()
            .filter(|i| normalize_specifier(&i.source) == wanted)
            .find_map(|i| i.namespace.as_deref())
    }

    /// Add `import * as {namespace} from '{specifier}'` after the last import
    pub fn with_namespace_import(
        &self,
        parser: &mut SourceParser,
        namespace: &str,
        specifier: &str,
    ) -> Result<Self> {
        let statement = format!("import * as {} from '{}'", namespace, specifier);
        let source = match self.imports.last() {
            Some(last) => {
                let mut s = self.source.clone();
                s.insert_str(last.end, &format!("\n{}", statement));
                s
            }
            None => format!("{}\n\n{}", statement, self.source),
        };

        let doc = Self::parse(parser, &source).context("import insertion produced invalid source")?;
        if doc.namespace_for(specifier) != Some(namespace) {
            bail!("import of {} not found after insertion", specifier);
        }
        Ok(doc)
    }

    /// Append `"key": value` to the literal map `map_name`
    pub fn with_entry(
        &self,
        parser: &mut SourceParser,
        map_name: &str,
        key: &str,
        value: &str,
    ) -> Result<Self> {
        let map = self
            .map(map_name)
            .with_context(|| format!("object literal `{}` not found", map_name))?;
        if map.entry(key).is_some() {
            bail!("entry \"{}\" already exists in `{}`", key, map_name);
        }

        let entry = format!("{}: {}", quote_key(key), value);
        let mut source = self.source.clone();

        match map.entries.last() {
            Some(last) => {
                let mut indent = self.indent_before(last.start);
                if last.line == map.line {
                    indent = format!("{}    ", self.indent_before(map_start_of_line(&self.source, map.open)));
                }
                let rest = &self.source[last.end..map.close];
                let comma = rest
                    .char_indices()
                    .find(|(_, c)| !c.is_whitespace())
                    .filter(|(_, c)| *c == ',')
                    .map(|(i, _)| last.end + i);
                match comma {
                    Some(pos) => source.insert_str(pos + 1, &format!("\n{}{},", indent, entry)),
                    None => source.insert_str(last.end, &format!(",\n{}{}", indent, entry)),
                }
            }
            None => {
                let base = self.indent_before(map_start_of_line(&self.source, map.open));
                let inner = &self.source[map.open + 1..map.close];
                if inner.trim().is_empty() {
                    source.replace_range(
                        map.open + 1..map.close,
                        &format!("\n{}    {}\n{}", base, entry, base),
                    );
                } else {
                    source.insert_str(map.open + 1, &format!("\n{}    {},", base, entry));
                }
            }
        }

        let doc = Self::parse(parser, &source).context("entry insertion produced invalid source")?;
        let count = doc
            .map(map_name)
            .map(|m| m.entries.iter().filter(|e| e.key == key).count())
            .unwrap_or(0);
        if count != 1 {
            bail!("expected one \"{}\" entry in `{}` after insertion, found {}", key, map_name, count);
        }
        Ok(doc)
    }

    /// Leading whitespace of the line containing `offset`
    fn indent_before(&self, offset: usize) -> String {
        let line_start = self.source[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
        self.source[line_start..offset]
            .chars()
            .take_while(|c| *c == ' ' || *c == '\t')
            .collect()
    }
}

/// Offset of the first non-blank character on the line containing `offset`
fn map_start_of_line(source: &str, offset: usize) -> usize {
    let line_start = source[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let indent = source[line_start..]
        .chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .count();
    line_start + indent
}

fn extract_import(stmt: &Node, source: &str) -> Option<ImportDecl> {
    let source_node = stmt.child_by_field_name("source")?;
    let specifier = string_value(&source_node, source)?;

    let mut namespace = None;
    for child in named_children(stmt) {
        if child.kind() != "import_clause" {
            continue;
        }
        for part in named_children(&child) {
            if part.kind() == "namespace_import" {
                namespace = named_children(&part)
                    .into_iter()
                    .find(|n| n.kind() == "identifier")
                    .and_then(|n| get_text(&n, source))
                    .map(str::to_string);
            }
        }
    }

    Some(ImportDecl {
        namespace,
        source: specifier,
        line: line_of(stmt),
        start: stmt.start_byte(),
        end: stmt.end_byte(),
    })
}

fn extract_maps(decl: &Node, source: &str, maps: &mut Vec<LiteralMap>) {
    for declarator in named_children(decl) {
        if declarator.kind() != "variable_declarator" {
            continue;
        }
        let Some(name) = declarator
            .child_by_field_name("name")
            .and_then(|n| get_text(&n, source))
        else {
            continue;
        };
        let Some(value) = declarator.child_by_field_name("value") else {
            continue;
        };
        let object = unwrap_expression(value);
        if object.kind() != "object" {
            continue;
        }
        maps.push(LiteralMap {
            name: name.to_string(),
            line: line_of(&declarator),
            open: object.start_byte(),
            close: object.end_byte().saturating_sub(1),
            entries: extract_entries(&object, source),
        });
    }
}

fn extract_entries(object: &Node, source: &str) -> Vec<MapEntry> {
    let mut entries = Vec::new();
    for member in named_children(object) {
        let (key, value_node) = match member.kind() {
            "pair" => match (property_key(&member, source), member.child_by_field_name("value")) {
                (Some(key), Some(value)) => (key, value),
                _ => continue,
            },
            "shorthand_property_identifier" => match get_text(&member, source) {
                Some(name) => (name.to_string(), member),
                None => continue,
            },
            _ => continue,
        };

        let value_node = unwrap_expression(value_node);
        let fields = (value_node.kind() == "object").then(|| {
            let mut fields = BTreeMap::new();
            for field in named_children(&value_node) {
                if field.kind() != "pair" {
                    continue;
                }
                let (Some(k), Some(v)) = (property_key(&field, source), field.child_by_field_name("value")) else {
                    continue;
                };
                let text = string_value(&v, source)
                    .or_else(|| get_text(&v, source).map(str::to_string))
                    .unwrap_or_default();
                fields.insert(k, text);
            }
            fields
        });

        entries.push(MapEntry {
            key,
            value: get_text(&value_node, source).unwrap_or_default().to_string(),
            fields,
            line: line_of(&member),
            start: member.start_byte(),
            end: member.end_byte(),
        });
    }
    entries
}
