//! Table schema extraction
//!
//! Recognizes table builders of the form
//! `const albums = pgTable("albums", { id: text("id").primaryKey(), ... })`
//! and `schema.table("albums", { ... })`. Column builders are call chains:
//! the innermost call names the type, outer member calls are modifiers.

use super::helpers::{get_text, named_children, property_key, string_value, unwrap_expression, visit};
use super::{SourceLanguage, SourceParser};
use crate::operations::{Column, ColumnReference, SchemaDefinition, Table};
use anyhow::Result;
use std::collections::HashMap;
use tree_sitter::Node;

/// Column plus an unresolved `references(() => var.column)` target
struct ParsedColumn {
    column: Column,
    reference: Option<(String, String)>,
}

fn is_table_builder(function: &Node, source: &str) -> bool {
    match function.kind() {
        "identifier" => get_text(function, source).is_some_and(|name| name.ends_with("Table")),
        "member_expression" => function
            .child_by_field_name("property")
            .and_then(|p| get_text(&p, source))
            .is_some_and(|p| p == "table"),
        _ => false,
    }
}

fn call_arguments<'a>(call: &Node<'a>) -> Vec<Node<'a>> {
    call.child_by_field_name("arguments")
        .map(|a| named_children(&a))
        .unwrap_or_default()
}

/// `() => albums.id` or `() => { return albums.id }`
fn reference_target(arg: &Node, source: &str) -> Option<(String, String)> {
    let arrow = unwrap_expression(*arg);
    if arrow.kind() != "arrow_function" {
        return None;
    }
    let mut body = arrow.child_by_field_name("body")?;
    if body.kind() == "statement_block" {
        let ret = named_children(&body)
            .into_iter()
            .find(|n| n.kind() == "return_statement")?;
        body = ret.named_child(0)?;
    }
    let member = unwrap_expression(body);
    if member.kind() != "member_expression" {
        return None;
    }
    let object = get_text(&member.child_by_field_name("object")?, source)?;
    let property = get_text(&member.child_by_field_name("property")?, source)?;
    Some((object.to_string(), property.to_string()))
}

fn parse_column(key: &str, value: Node, source: &str) -> Option<ParsedColumn> {
    let mut primary_key = false;
    let mut not_null = false;
    let mut reference = None;

    let mut current = unwrap_expression(value);
    loop {
        if current.kind() != "call_expression" {
            return None;
        }
        let function = current.child_by_field_name("function")?;
        match function.kind() {
            // `jsonb("meta")()` style curried builders
            "call_expression" => current = function,
            "member_expression" => {
                let object = function.child_by_field_name("object")?;
                let property = get_text(&function.child_by_field_name("property")?, source)?;
                if object.kind() == "call_expression" {
                    match property {
                        "primaryKey" => {
                            primary_key = true;
                            not_null = true;
                        }
                        "notNull" => not_null = true,
                        "references" => {
                            reference = call_arguments(&current)
                                .first()
                                .and_then(|arg| reference_target(arg, source));
                        }
                        _ => {}
                    }
                    current = object;
                } else {
                    return Some(base_column(key, property, &current, source, primary_key, not_null, reference));
                }
            }
            "identifier" => {
                let ty = get_text(&function, source)?;
                return Some(base_column(key, ty, &current, source, primary_key, not_null, reference));
            }
            _ => return None,
        }
    }
}

fn base_column(
    key: &str,
    column_type: &str,
    call: &Node,
    source: &str,
    primary_key: bool,
    not_null: bool,
    reference: Option<(String, String)>,
) -> ParsedColumn {
    let name = call_arguments(call)
        .first()
        .and_then(|arg| string_value(arg, source))
        .unwrap_or_else(|| key.to_string());
    ParsedColumn {
        column: Column {
            name,
            column_type: column_type.to_string(),
            primary_key,
            not_null,
        },
        reference,
    }
}

fn enclosing_variable(node: &Node, source: &str) -> Option<String> {
    let mut parent = node.parent();
    while let Some(p) = parent {
        match p.kind() {
            "variable_declarator" => {
                return p
                    .child_by_field_name("name")
                    .and_then(|n| get_text(&n, source))
                    .map(str::to_string)
            }
            "program" | "statement_block" => return None,
            _ => parent = p.parent(),
        }
    }
    None
}

/// Extract every table and its reference edges from schema source.
///
/// References are resolved through the variable each table is bound to;
/// a reference to an unknown variable keeps the variable name as the table.
pub fn parse_schema(parser: &mut SourceParser, source: &str) -> Result<SchemaDefinition> {
    let tree = parser.parse(SourceLanguage::TypeScript, source)?;
    let root = tree.root_node();
    if let Some(err) = super::helpers::first_error(&root) {
        anyhow::bail!(err);
    }

    let mut tables: Vec<Table> = Vec::new();
    let mut pending: Vec<(String, String, String, String)> = Vec::new();

    visit(root, &mut |node| {
        if node.kind() != "call_expression" {
            return;
        }
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        if !is_table_builder(&function, source) {
            return;
        }
        let args = call_arguments(&node);
        let (Some(name), Some(columns)) = (
            args.first().and_then(|a| string_value(a, source)),
            args.get(1).map(|a| unwrap_expression(*a)),
        ) else {
            return;
        };
        if columns.kind() != "object" {
            return;
        }

        let mut table = Table {
            name: name.clone(),
            variable: enclosing_variable(&node, source),
            columns: Vec::new(),
        };
        for pair in named_children(&columns) {
            if pair.kind() != "pair" {
                continue;
            }
            let (Some(key), Some(value)) = (property_key(&pair, source), pair.child_by_field_name("value")) else {
                continue;
            };
            if let Some(parsed) = parse_column(&key, value, source) {
                if let Some((var, col)) = parsed.reference {
                    pending.push((name.clone(), parsed.column.name.clone(), var, col));
                }
                table.columns.push(parsed.column);
            }
        }
        tables.push(table);
    });

    let by_variable: HashMap<&str, &str> = tables
        .iter()
        .filter_map(|t| t.variable.as_deref().map(|v| (v, t.name.as_str())))
        .collect();

    let mut schema = SchemaDefinition::default();
    for (table, column, var, referenced_column) in pending {
        let referenced_table = by_variable.get(var.as_str()).map(|s| s.to_string()).unwrap_or(var);
        schema.references.entry(table).or_default().push(ColumnReference {
            column,
            referenced_table,
            referenced_column,
        });
    }
    schema.tables = tables;
    Ok(schema)
}
