//! Snapshot-and-diff detection over the registry, schema and source files

use super::registry::parse_registry;
use super::schema::parse_schema;
use super::usage::{declarations_in_source, is_source_file, scan_declarations, DeclarationHooks};
use super::{content_hash, SourceParser};
use crate::error::PipelineError;
use crate::events::{EventEmitter, PipelineEvent};
use crate::operations::{Operation, OperationDiff, OperationKind, Registry, SchemaDefinition};
use anyhow::Result;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub operations_file: PathBuf,
    pub schema_file: PathBuf,
    pub source_root: PathBuf,
    pub hooks: DeclarationHooks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileRole {
    Registry,
    Schema,
    Source,
}

/// Absolute, symlink-free form of `path`, also for files that no longer exist
fn resolve(path: &Path) -> PathBuf {
    if let Ok(p) = std::fs::canonicalize(path) {
        return p;
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        let parent = if parent.as_os_str().is_empty() { Path::new(".") } else { parent };
        if let Ok(p) = std::fs::canonicalize(parent) {
            return p.join(name);
        }
    }
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Keeps the last good snapshot of every watched input and reports
/// differences as pipeline events
pub struct OperationDetector {
    config: DetectorConfig,
    parser: SourceParser,
    registry: Registry,
    schema: SchemaDefinition,
    declarations: BTreeMap<PathBuf, Vec<Operation>>,
    hashes: HashMap<PathBuf, String>,
    reported_new: HashSet<String>,
}

impl OperationDetector {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        let config = DetectorConfig {
            operations_file: resolve(&config.operations_file),
            schema_file: resolve(&config.schema_file),
            source_root: resolve(&config.source_root),
            hooks: config.hooks,
        };
        Ok(Self {
            config,
            parser: SourceParser::new()?,
            registry: Registry::default(),
            schema: SchemaDefinition::default(),
            declarations: BTreeMap::new(),
            hashes: HashMap::new(),
            reported_new: HashSet::new(),
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn schema(&self) -> &SchemaDefinition {
        &self.schema
    }

    /// Declared operations, first declaration of each id wins
    pub fn declared(&self) -> Vec<&Operation> {
        let mut seen = HashSet::new();
        self.declarations
            .values()
            .flatten()
            .filter(|op| seen.insert(op.id()))
            .collect()
    }

    /// Declared operations missing from the registry
    pub fn unregistered(&self) -> Vec<&Operation> {
        self.declared()
            .into_iter()
            .filter(|op| !self.registry.contains(op.kind, &op.name))
            .collect()
    }

    fn read(&self, path: &Path) -> Result<String, PipelineError> {
        std::fs::read_to_string(path).map_err(|e| PipelineError::Detection {
            file: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Full parse of the registry file, replacing the snapshot
    pub fn parse(&mut self) -> Result<&Registry, PipelineError> {
        let file = self.config.operations_file.clone();
        let content = self.read(&file)?;
        self.registry = self.parse_registry_content(&file, &content)?;
        self.hashes.insert(file, content_hash(&content));
        Ok(&self.registry)
    }

    fn parse_registry_content(&mut self, file: &Path, content: &str) -> Result<Registry, PipelineError> {
        parse_registry(&mut self.parser, file, content).map_err(|e| PipelineError::Detection {
            file: file.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn parse_schema_content(&mut self, content: &str) -> Result<SchemaDefinition, PipelineError> {
        parse_schema(&mut self.parser, content).map_err(|e| PipelineError::Detection {
            file: self.config.schema_file.clone(),
            message: e.to_string(),
        })
    }

    /// Initial full load. Emits both `OperationsLoaded`, `SchemaLoaded` and a
    /// new-operation event for every declared but unregistered operation.
    ///
    /// Only an unreadable registry is an error; schema and source problems
    /// are reported and the load continues with what could be parsed.
    pub fn load(&mut self, emitter: &dyn EventEmitter) -> Result<(), PipelineError> {
        self.parse()?;
        for kind in [OperationKind::Query, OperationKind::Mutation] {
            emitter.emit(PipelineEvent::OperationsLoaded {
                kind,
                operations: self.registry.map(kind).values().cloned().collect(),
            });
        }

        let schema_file = self.config.schema_file.clone();
        match self.read(&schema_file).and_then(|content| {
            let schema = self.parse_schema_content(&content)?;
            Ok((schema, content))
        }) {
            Ok((schema, content)) => {
                self.schema = schema;
                self.hashes.insert(schema_file, content_hash(&content));
            }
            Err(e) => {
                warn!(error = %e, "Schema unavailable, continuing without tables");
                emitter.emit(PipelineEvent::DetectionFailed {
                    file: schema_file,
                    message: e.to_string(),
                });
            }
        }
        emitter.emit(PipelineEvent::SchemaLoaded {
            schema: self.schema.clone(),
        });

        let root = self.config.source_root.clone();
        match scan_declarations(&mut self.parser, &root, &self.config.hooks) {
            Ok(found) => {
                self.declarations = found
                    .into_iter()
                    .filter(|(path, _)| *path != self.config.operations_file)
                    .collect();
            }
            Err(e) => warn!(error = %e, "Declaration scan failed"),
        }

        info!(
            queries = self.registry.queries.len(),
            mutations = self.registry.mutations.len(),
            tables = self.schema.tables.len(),
            declared = self.declared().len(),
            "Operations loaded"
        );
        self.report_new(emitter);
        Ok(())
    }

    fn role_of(&self, path: &Path) -> Option<FileRole> {
        if path == self.config.operations_file {
            Some(FileRole::Registry)
        } else if path == self.config.schema_file {
            Some(FileRole::Schema)
        } else if path.starts_with(&self.config.source_root) && is_source_file(path) {
            Some(FileRole::Source)
        } else {
            None
        }
    }

    /// Re-parse a changed file and emit the differences.
    ///
    /// Returns false when the file is not watched or its content is unchanged.
    /// A parse failure emits `DetectionFailed` and keeps the previous snapshot.
    pub fn on_file_changed(&mut self, path: &Path, emitter: &dyn EventEmitter) -> bool {
        let path = resolve(path);
        let Some(role) = self.role_of(&path) else {
            return false;
        };

        let content = std::fs::read_to_string(&path).ok();
        if let Some(content) = &content {
            if self.hashes.get(&path) == Some(&content_hash(content)) {
                debug!(file = %path.display(), "Content unchanged, skipping");
                return false;
            }
        }

        emitter.emit(PipelineEvent::DetectionStarted { file: path.clone() });
        let result = match (role, content.as_deref()) {
            (FileRole::Registry, Some(content)) => self.update_registry(&path, content, emitter),
            (FileRole::Schema, Some(content)) => self.update_schema(content, emitter),
            (FileRole::Source, Some(content)) => self.update_source(&path, content, emitter),
            (FileRole::Source, None) => {
                self.declarations.remove(&path);
                self.report_new(emitter);
                Ok(())
            }
            (_, None) => Err(PipelineError::Detection {
                file: path.clone(),
                message: "file was removed".into(),
            }),
        };

        match result {
            Ok(()) => {
                match &content {
                    Some(content) => self.hashes.insert(path.clone(), content_hash(content)),
                    None => self.hashes.remove(&path),
                };
                emitter.emit(PipelineEvent::DetectionFinished { file: path });
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Detection failed, keeping previous snapshot");
                emitter.emit(PipelineEvent::DetectionFailed {
                    file: path,
                    message: e.to_string(),
                });
            }
        }
        true
    }

    fn update_registry(&mut self, file: &Path, content: &str, emitter: &dyn EventEmitter) -> Result<(), PipelineError> {
        let current = self.parse_registry_content(file, content)?;
        for kind in [OperationKind::Query, OperationKind::Mutation] {
            let diff = OperationDiff::between(self.registry.map(kind), current.map(kind));
            if !diff.is_empty() {
                debug!(
                    kind = %kind,
                    added = diff.added.len(),
                    removed = diff.removed.len(),
                    changed = diff.changed.len(),
                    "Registry changed"
                );
            }
            for operation in diff.added {
                emitter.emit(PipelineEvent::OperationAdded { operation });
            }
            for operation in diff.removed {
                emitter.emit(PipelineEvent::OperationRemoved {
                    kind,
                    name: operation.name,
                    file: operation.source_file,
                });
            }
            for operation in diff.changed {
                emitter.emit(PipelineEvent::OperationUpdated { operation });
            }
        }
        self.registry = current;
        self.report_new(emitter);
        Ok(())
    }

    fn update_schema(&mut self, content: &str, emitter: &dyn EventEmitter) -> Result<(), PipelineError> {
        let schema = self.parse_schema_content(content)?;
        let changes = schema.diff(&self.schema);
        self.schema = schema;
        emitter.emit(PipelineEvent::SchemaUpdated {
            schema: self.schema.clone(),
            changes,
        });
        Ok(())
    }

    fn update_source(&mut self, path: &Path, content: &str, emitter: &dyn EventEmitter) -> Result<(), PipelineError> {
        let found = declarations_in_source(&mut self.parser, path, content, &self.config.hooks).map_err(|e| {
            PipelineError::Detection {
                file: path.to_path_buf(),
                message: e.to_string(),
            }
        })?;
        if found.is_empty() {
            self.declarations.remove(path);
        } else {
            self.declarations.insert(path.to_path_buf(), found);
        }
        self.report_new(emitter);
        Ok(())
    }

    /// Emit new-operation events for declared operations that are not
    /// registered and have not been reported yet
    fn report_new(&mut self, emitter: &dyn EventEmitter) {
        let pending: Vec<Operation> = self.unregistered().into_iter().cloned().collect();
        let pending_ids: HashSet<String> = pending.iter().map(Operation::id).collect();
        self.reported_new.retain(|id| pending_ids.contains(id));

        for operation in pending {
            if !self.reported_new.insert(operation.id()) {
                continue;
            }
            info!(operation = %operation.id(), "New operation declared");
            emitter.emit(PipelineEvent::new_operation(operation));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::RecordingEmitter;
    use crate::events::EventKind;

    const REGISTRY: &str = "import * as queriesModule from './queries'\n\nexport const queries = {\n  'get all artists': queriesModule.getAllArtists,\n}\n\nexport const mutations = {}\n";
    const SCHEMA: &str = "export const artists = pgTable('artists', { id: text('id').primaryKey() })\n";

    fn setup() -> (tempfile::TempDir, OperationDetector) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("ops")).unwrap();
        std::fs::create_dir_all(root.join("app")).unwrap();
        std::fs::write(root.join("ops/operations.ts"), REGISTRY).unwrap();
        std::fs::write(root.join("ops/schema.ts"), SCHEMA).unwrap();
        std::fs::write(
            root.join("app/page.tsx"),
            "useOpgenQuery('get all artists')\nuseOpgenMutation('increment artist popularity by 10', { artistId: 'a' })\n",
        )
        .unwrap();

        let detector = OperationDetector::new(DetectorConfig {
            operations_file: root.join("ops/operations.ts"),
            schema_file: root.join("ops/schema.ts"),
            source_root: root.to_path_buf(),
            hooks: DeclarationHooks {
                query: vec!["useOpgenQuery".into()],
                mutation: vec!["useOpgenMutation".into()],
            },
        })
        .unwrap();
        (dir, detector)
    }

    #[test]
    fn test_load_reports_unregistered_declarations() {
        let (_dir, mut detector) = setup();
        let emitter = RecordingEmitter::default();
        detector.load(&emitter).unwrap();

        let kinds = emitter.kinds();
        assert_eq!(
            kinds,
            vec![
                EventKind::OperationsLoaded,
                EventKind::OperationsLoaded,
                EventKind::SchemaLoaded,
                EventKind::NewMutationAdded,
            ]
        );
        assert_eq!(detector.schema().tables.len(), 1);
        let unregistered = detector.unregistered();
        assert_eq!(unregistered.len(), 1);
        assert_eq!(unregistered[0].parameters["artistId"], "string");
    }

    #[test]
    fn test_registry_change_emits_diff_once() {
        let (dir, mut detector) = setup();
        detector.load(&RecordingEmitter::default()).unwrap();

        let ops_file = dir.path().join("ops/operations.ts");
        std::fs::write(
            &ops_file,
            "export const queries = {}\nexport const mutations = {\n  'increment artist popularity by 10': m.inc,\n}\n",
        )
        .unwrap();

        let emitter = RecordingEmitter::default();
        assert!(detector.on_file_changed(&ops_file, &emitter));
        assert_eq!(
            emitter.kinds(),
            vec![
                EventKind::DetectionStarted,
                EventKind::OperationRemoved,
                EventKind::OperationAdded,
                EventKind::NewQueryAdded,
                EventKind::DetectionFinished,
            ]
        );

        // Same content again is skipped
        let emitter = RecordingEmitter::default();
        assert!(!detector.on_file_changed(&ops_file, &emitter));
        assert!(emitter.kinds().is_empty());
    }

    #[test]
    fn test_parse_failure_keeps_previous_snapshot() {
        let (dir, mut detector) = setup();
        detector.load(&RecordingEmitter::default()).unwrap();

        let ops_file = dir.path().join("ops/operations.ts");
        std::fs::write(&ops_file, "export const queries = {").unwrap();
        let emitter = RecordingEmitter::default();
        assert!(detector.on_file_changed(&ops_file, &emitter));
        assert_eq!(
            emitter.kinds(),
            vec![EventKind::DetectionStarted, EventKind::DetectionFailed]
        );
        assert!(detector.registry().contains(OperationKind::Query, "get all artists"));
    }

    #[test]
    fn test_schema_change_and_unwatched_files() {
        let (dir, mut detector) = setup();
        detector.load(&RecordingEmitter::default()).unwrap();

        let schema_file = dir.path().join("ops/schema.ts");
        std::fs::write(
            &schema_file,
            format!("{}export const albums = pgTable('albums', {{ id: text('id') }})\n", SCHEMA),
        )
        .unwrap();
        let emitter = RecordingEmitter::default();
        assert!(detector.on_file_changed(&schema_file, &emitter));
        let events = emitter.events();
        let changes = events
            .iter()
            .find_map(|e| match e {
                PipelineEvent::SchemaUpdated { changes, .. } => Some(changes.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(changes.len(), 1);

        std::fs::write(dir.path().join("notes.md"), "# hi").unwrap();
        assert!(!detector.on_file_changed(&dir.path().join("notes.md"), &emitter));
    }

    #[test]
    fn test_removed_declaration_file() {
        let (dir, mut detector) = setup();
        detector.load(&RecordingEmitter::default()).unwrap();
        assert_eq!(detector.unregistered().len(), 1);

        let page = dir.path().join("app/page.tsx");
        std::fs::remove_file(&page).unwrap();
        let emitter = RecordingEmitter::default();
        assert!(detector.on_file_changed(&page, &emitter));
        assert!(detector.unregistered().is_empty());
        assert_eq!(emitter.kinds().last(), Some(&EventKind::DetectionFinished));
    }
}
