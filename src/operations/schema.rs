//! Schema definition extracted from the schema source file
//!
//! Cross-table references are kept as an index-based adjacency list keyed by
//! table name. Tables never point at each other directly, so cycles
//! (`albums -> artists -> albums`) are just entries in two lists.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Column builder name, e.g. `text`, `integer`, `jsonb`
    pub column_type: String,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub not_null: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    /// Identifier the table is bound to in source (`albums` in `const albums = ...`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// One outgoing edge: `column` of the owning table references `table.column`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnReference {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// Tables in declaration order plus their reference edges
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub tables: Vec<Table>,
    /// table name -> outgoing references
    #[serde(default)]
    pub references: BTreeMap<String, Vec<ColumnReference>>,
}

/// A single structural difference between two schema versions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum SchemaChange {
    TableAdded { table: String },
    TableRemoved { table: String },
    ColumnAdded { table: String, column: String },
    ColumnRemoved { table: String, column: String },
    ColumnChanged { table: String, column: String },
}

impl std::fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TableAdded { table } => write!(f, "+table {}", table),
            Self::TableRemoved { table } => write!(f, "-table {}", table),
            Self::ColumnAdded { table, column } => write!(f, "+{}.{}", table, column),
            Self::ColumnRemoved { table, column } => write!(f, "-{}.{}", table, column),
            Self::ColumnChanged { table, column } => write!(f, "~{}.{}", table, column),
        }
    }
}

impl SchemaDefinition {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Outgoing references of one table
    pub fn references_from(&self, table: &str) -> &[ColumnReference] {
        self.references.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tables with at least one column referencing `table`
    pub fn referenced_by(&self, table: &str) -> Vec<&str> {
        self.references
            .iter()
            .filter(|(_, refs)| refs.iter().any(|r| r.referenced_table == table))
            .map(|(owner, _)| owner.as_str())
            .collect()
    }

    /// Best-guess table for a natural-language phrase.
    ///
    /// Scores each table by how many words of the phrase match its name
    /// (singular or plural); ties go to the earlier table. Falls back to the
    /// first table, or `None` for an empty schema.
    pub fn best_table_for(&self, phrase: &str) -> Option<&Table> {
        let words: Vec<String> = phrase
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        let score = |table: &Table| -> usize {
            let name = table.name.to_lowercase();
            let singular = name.strip_suffix('s').unwrap_or(&name).to_string();
            let mut score = 0;
            for word in &words {
                if *word == name || *word == singular {
                    score += 2;
                } else if name.contains(word.as_str()) && word.len() > 2 {
                    score += 1;
                }
            }
            score
        };

        let mut best: Option<(&Table, usize)> = None;
        for table in &self.tables {
            let s = score(table);
            if s > 0 && best.map_or(true, |(_, b)| s > b) {
                best = Some((table, s));
            }
        }
        best.map(|(t, _)| t).or_else(|| self.tables.first())
    }

    /// Human-readable description embedded in synthesis prompts
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for table in &self.tables {
            out.push_str(&format!("### Table: {}\n", table.name));
            for col in &table.columns {
                let mut flags = Vec::new();
                if col.primary_key {
                    flags.push("primary key".to_string());
                }
                if col.not_null {
                    flags.push("not null".to_string());
                }
                if let Some(r) = self
                    .references_from(&table.name)
                    .iter()
                    .find(|r| r.column == col.name)
                {
                    flags.push(format!("references {}.{}", r.referenced_table, r.referenced_column));
                }
                if flags.is_empty() {
                    out.push_str(&format!("- {}: {}\n", col.name, col.column_type));
                } else {
                    out.push_str(&format!(
                        "- {}: {} ({})\n",
                        col.name,
                        col.column_type,
                        flags.join(", ")
                    ));
                }
            }
            out.push('\n');
        }
        out
    }

    /// Structural changes from `previous` to `self`
    pub fn diff(&self, previous: &SchemaDefinition) -> Vec<SchemaChange> {
        let mut changes = Vec::new();
        for table in &self.tables {
            let Some(old) = previous.table(&table.name) else {
                changes.push(SchemaChange::TableAdded {
                    table: table.name.clone(),
                });
                continue;
            };
            for col in &table.columns {
                match old.column(&col.name) {
                    None => changes.push(SchemaChange::ColumnAdded {
                        table: table.name.clone(),
                        column: col.name.clone(),
                    }),
                    Some(old_col) if old_col != col => changes.push(SchemaChange::ColumnChanged {
                        table: table.name.clone(),
                        column: col.name.clone(),
                    }),
                    Some(_) => {}
                }
            }
            for col in &old.columns {
                if table.column(&col.name).is_none() {
                    changes.push(SchemaChange::ColumnRemoved {
                        table: table.name.clone(),
                        column: col.name.clone(),
                    });
                }
            }
        }
        for table in &previous.tables {
            if self.table(&table.name).is_none() {
                changes.push(SchemaChange::TableRemoved {
                    table: table.name.clone(),
                });
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, ty: &str) -> Column {
        Column {
            name: name.into(),
            column_type: ty.into(),
            primary_key: false,
            not_null: false,
        }
    }

    fn music_schema() -> SchemaDefinition {
        let mut references = BTreeMap::new();
        references.insert(
            "albums".to_string(),
            vec![ColumnReference {
                column: "artist_id".into(),
                referenced_table: "artists".into(),
                referenced_column: "id".into(),
            }],
        );
        references.insert(
            "artists".to_string(),
            vec![ColumnReference {
                column: "latest_album_id".into(),
                referenced_table: "albums".into(),
                referenced_column: "id".into(),
            }],
        );
        SchemaDefinition {
            tables: vec![
                Table {
                    name: "artists".into(),
                    variable: Some("artists".into()),
                    columns: vec![col("id", "text"), col("popularity", "integer"), col("latest_album_id", "text")],
                },
                Table {
                    name: "albums".into(),
                    variable: Some("albums".into()),
                    columns: vec![col("id", "text"), col("artist_id", "text")],
                },
            ],
            references,
        }
    }

    #[test]
    fn test_cyclic_references_are_plain_lookups() {
        let schema = music_schema();
        assert_eq!(schema.references_from("albums")[0].referenced_table, "artists");
        assert_eq!(schema.references_from("artists")[0].referenced_table, "albums");
        assert_eq!(schema.referenced_by("artists"), vec!["albums"]);
        assert!(schema.references_from("tracks").is_empty());
    }

    #[test]
    fn test_best_table_for_phrase() {
        let schema = music_schema();
        assert_eq!(
            schema.best_table_for("increment artist popularity by 10").map(|t| t.name.as_str()),
            Some("artists")
        );
        assert_eq!(
            schema.best_table_for("get all albums").map(|t| t.name.as_str()),
            Some("albums")
        );
        // no overlap: first table
        assert_eq!(
            schema.best_table_for("count playlists").map(|t| t.name.as_str()),
            Some("artists")
        );
        assert!(SchemaDefinition::default().best_table_for("anything").is_none());
    }

    #[test]
    fn test_describe_mentions_references() {
        let text = music_schema().describe();
        assert!(text.contains("### Table: albums"));
        assert!(text.contains("artist_id: text (references artists.id)"));
    }

    #[test]
    fn test_diff() {
        let old = music_schema();
        let mut new = old.clone();
        new.tables[0].columns.pop();
        new.tables[1].columns.push(col("title", "text"));
        new.tables.push(Table {
            name: "tracks".into(),
            variable: None,
            columns: vec![],
        });

        let changes = new.diff(&old);
        assert_eq!(
            changes,
            vec![
                SchemaChange::ColumnRemoved {
                    table: "artists".into(),
                    column: "latest_album_id".into()
                },
                SchemaChange::ColumnAdded {
                    table: "albums".into(),
                    column: "title".into()
                },
                SchemaChange::TableAdded {
                    table: "tracks".into()
                },
            ]
        );
        assert!(old.diff(&old).is_empty());
    }
}
