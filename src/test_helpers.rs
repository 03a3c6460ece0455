//! Test helper factories and recording collaborators
//!
//! Provides convenience functions for creating test objects with sensible defaults,
//! and an emitter that records everything published through it.
#![allow(dead_code)]

use crate::events::{EventEmitter, EventKind, PipelineEvent};
use crate::operations::{Column, ColumnReference, Operation, OperationKind, SchemaDefinition, Table};
use crate::parser::usage::DeclarationHooks;
use crate::synthesis::GeneratedArtifact;
use crate::{Config, YamlConfig};
use std::path::Path;
use std::sync::Mutex;

// ============================================================================
// Recording emitter
// ============================================================================

/// Collects emitted events in order
#[derive(Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingEmitter {
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().unwrap().iter().map(PipelineEvent::kind).collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit(&self, event: PipelineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ============================================================================
// Domain factories
// ============================================================================

pub fn test_query(name: &str) -> Operation {
    Operation::new(OperationKind::Query, name).with_source("app/page.tsx", 1)
}

pub fn test_mutation(name: &str) -> Operation {
    Operation::new(OperationKind::Mutation, name).with_source("app/page.tsx", 1)
}

fn column(name: &str, ty: &str, primary_key: bool) -> Column {
    Column {
        name: name.into(),
        column_type: ty.into(),
        primary_key,
        not_null: primary_key,
    }
}

/// `artists` and `albums`, referencing each other
pub fn test_schema() -> SchemaDefinition {
    let mut schema = SchemaDefinition {
        tables: vec![
            Table {
                name: "artists".into(),
                variable: Some("artists".into()),
                columns: vec![
                    column("id", "text", true),
                    column("name", "text", false),
                    column("popularity", "integer", false),
                    column("top_album_id", "text", false),
                ],
            },
            Table {
                name: "albums".into(),
                variable: Some("albums".into()),
                columns: vec![column("id", "text", true), column("artist_id", "text", false)],
            },
        ],
        references: Default::default(),
    };
    schema.references.insert(
        "artists".into(),
        vec![ColumnReference {
            column: "top_album_id".into(),
            referenced_table: "albums".into(),
            referenced_column: "id".into(),
        }],
    );
    schema.references.insert(
        "albums".into(),
        vec![ColumnReference {
            column: "artist_id".into(),
            referenced_table: "artists".into(),
            referenced_column: "id".into(),
        }],
    );
    schema
}

pub fn test_artifact(function_name: &str) -> GeneratedArtifact {
    GeneratedArtifact {
        input_type: "z.object({ artistId: z.string() })".into(),
        function: "async ({ input, ctx }) => {\n  return ctx.db.select().from(ctx.schema.artists)\n}".into(),
        optimistic: None,
        validate: None,
        notes: "Reads artists".into(),
        pseudocode: "select * from artists".into(),
        function_name: function_name.into(),
        fallback: false,
    }
}

// ============================================================================
// On-disk project layout
// ============================================================================

pub const REGISTRY_SOURCE: &str = "import * as queriesModule from './queries'\n\nexport const queries = {\n  'get all artists': queriesModule.getAllArtists,\n}\n\nexport const mutations = {}\n";

/// Write a minimal project under `root`: registry, schema and both barrels
pub fn write_project(root: &Path) {
    std::fs::create_dir_all(root.join("ops/queries")).unwrap();
    std::fs::create_dir_all(root.join("ops/mutations")).unwrap();
    std::fs::write(root.join("ops/operations.ts"), REGISTRY_SOURCE).unwrap();
    std::fs::write(
        root.join("ops/schema.ts"),
        "export const artists = pgTable('artists', { id: text('id').primaryKey(), popularity: integer('popularity') })\n",
    )
    .unwrap();
    std::fs::write(
        root.join("ops/queries/index.ts"),
        "export * from './get-all-artists'\n",
    )
    .unwrap();
    std::fs::write(root.join("ops/mutations/index.ts"), "").unwrap();
}

/// Default configuration rooted at `root`, without reading env or YAML
pub fn test_config(root: &Path) -> Config {
    let yaml = YamlConfig::default();
    Config {
        root: root.to_path_buf(),
        operations_file: root.join(&yaml.paths.operations_file),
        queries_dir: root.join(&yaml.paths.queries_dir),
        mutations_dir: root.join(&yaml.paths.mutations_dir),
        schema_file: root.join(&yaml.paths.schema_file),
        hooks: DeclarationHooks {
            query: yaml.declarations.query_hooks,
            mutation: yaml.declarations.mutation_hooks,
        },
        llm: yaml.llm,
        tooling: yaml.tooling,
        templates: yaml.templates,
    }
}
