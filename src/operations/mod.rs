//! Operation model and registry projection
//!
//! An operation is a named data action declared by a natural-language phrase.
//! Its identity is `(kind, name)`, rendered as `kind:name`.

pub mod schema;

pub use schema::{Column, ColumnReference, SchemaChange, SchemaDefinition, Table};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Query or mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Query,
    Mutation,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
        }
    }

    /// Plural form, also the name of the registry literal (`queries`, `mutations`)
    pub fn plural(&self) -> &'static str {
        match self {
            Self::Query => "queries",
            Self::Mutation => "mutations",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "query" | "queries" => Ok(Self::Query),
            "mutation" | "mutations" => Ok(Self::Mutation),
            other => Err(format!("unknown operation kind: {}", other)),
        }
    }
}

/// A declared or registered data operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Human phrase, unique within its kind
    pub name: String,
    pub kind: OperationKind,
    /// Natural-language prompt (defaults to the name)
    pub prompt: String,
    /// Parameter name -> type description
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    pub source_file: PathBuf,
    /// 1-based
    pub line_number: usize,
    /// Handler reference or inline handler text from the registry literal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<String>,
}

impl Operation {
    pub fn new(kind: OperationKind, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            prompt: name.clone(),
            name,
            kind,
            parameters: BTreeMap::new(),
            source_file: PathBuf::new(),
            line_number: 0,
            handler: None,
            dependencies: None,
        }
    }

    pub fn with_source(mut self, file: impl Into<PathBuf>, line: usize) -> Self {
        self.source_file = file.into();
        self.line_number = line;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), ty.into());
        self
    }

    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    /// `kind:name`
    pub fn id(&self) -> String {
        operation_id(self.kind, &self.name)
    }

    /// Same name but different handler, prompt or dependency text
    pub fn differs_from(&self, other: &Operation) -> bool {
        self.handler != other.handler
            || self.prompt != other.prompt
            || self.dependencies != other.dependencies
            || self.parameters != other.parameters
    }
}

pub fn operation_id(kind: OperationKind, name: &str) -> String {
    format!("{}:{}", kind, name)
}

/// Two name-keyed mappings, one per kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    pub queries: BTreeMap<String, Operation>,
    pub mutations: BTreeMap<String, Operation>,
}

impl Registry {
    pub fn map(&self, kind: OperationKind) -> &BTreeMap<String, Operation> {
        match kind {
            OperationKind::Query => &self.queries,
            OperationKind::Mutation => &self.mutations,
        }
    }

    fn map_mut(&mut self, kind: OperationKind) -> &mut BTreeMap<String, Operation> {
        match kind {
            OperationKind::Query => &mut self.queries,
            OperationKind::Mutation => &mut self.mutations,
        }
    }

    pub fn get(&self, kind: OperationKind, name: &str) -> Option<&Operation> {
        self.map(kind).get(name)
    }

    pub fn contains(&self, kind: OperationKind, name: &str) -> bool {
        self.map(kind).contains_key(name)
    }

    /// Insert or replace by `(kind, name)`
    pub fn upsert(&mut self, operation: Operation) {
        let kind = operation.kind;
        self.map_mut(kind).insert(operation.name.clone(), operation);
    }

    pub fn remove(&mut self, kind: OperationKind, name: &str) -> Option<Operation> {
        self.map_mut(kind).remove(name)
    }

    /// Replace every operation of one kind
    pub fn replace_kind(&mut self, kind: OperationKind, operations: Vec<Operation>) {
        let map = self.map_mut(kind);
        map.clear();
        for op in operations.into_iter().filter(|op| op.kind == kind) {
            map.insert(op.name.clone(), op);
        }
    }

    pub fn len(&self) -> usize {
        self.queries.len() + self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of comparing two snapshots of one kind
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationDiff {
    pub added: Vec<Operation>,
    pub removed: Vec<Operation>,
    pub changed: Vec<Operation>,
}

impl OperationDiff {
    /// Compute added / removed / changed between two name-keyed snapshots
    pub fn between(
        previous: &BTreeMap<String, Operation>,
        current: &BTreeMap<String, Operation>,
    ) -> Self {
        let mut diff = Self::default();
        for (name, op) in current {
            match previous.get(name) {
                None => diff.added.push(op.clone()),
                Some(old) if op.differs_from(old) => diff.changed.push(op.clone()),
                Some(_) => {}
            }
        }
        for (name, op) in previous {
            if !current.contains_key(name) {
                diff.removed.push(op.clone());
            }
        }
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}
