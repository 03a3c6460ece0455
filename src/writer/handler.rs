use super::naming::{file_stem_for, is_identifier, variable_name_for};
use super::template::{render, TemplateOptions};
use super::tooling::run_tool;
use super::WriteReport;
use crate::error::{PipelineError, WriteStep};
use crate::events::{EventEmitter, PipelineEvent};
use crate::operations::{Operation, OperationKind};
use crate::parser::document::MapEntry;
use crate::parser::{RegistryDocument, SourceParser};
use crate::synthesis::GeneratedArtifact;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Working directory for external tools
    pub root: PathBuf,
    pub operations_file: PathBuf,
    pub queries_dir: PathBuf,
    pub mutations_dir: PathBuf,
    pub templates: TemplateOptions,
    pub typecheck_command: Vec<String>,
    pub format_command: Vec<String>,
    pub tool_timeout: Duration,
}

impl WriterConfig {
    pub fn dir_for(&self, kind: OperationKind) -> &Path {
        match kind {
            OperationKind::Query => &self.queries_dir,
            OperationKind::Mutation => &self.mutations_dir,
        }
    }
}

/// Module specifier for `to_dir` as imported from a file in `from_dir`
pub fn relative_specifier(from_dir: &Path, to_dir: &Path) -> String {
    let from: Vec<Component> = from_dir.components().filter(|c| *c != Component::CurDir).collect();
    let to: Vec<Component> = to_dir.components().filter(|c| *c != Component::CurDir).collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut parts: Vec<String> = std::iter::repeat("..".to_string())
        .take(from.len() - common)
        .collect();
    parts.extend(to[common..].iter().map(|c| c.as_os_str().to_string_lossy().into_owned()));

    match parts.first().map(String::as_str) {
        None => ".".to_string(),
        Some("..") => parts.join("/"),
        Some(_) => format!("./{}", parts.join("/")),
    }
}

fn barrel_line(stem: &str) -> String {
    format!("export * from './{}'", stem)
}

fn barrel_has_line(content: &str, line: &str) -> bool {
    content.lines().any(|l| {
        l.trim().trim_end_matches(';').replace('"', "'") == line
    })
}

fn write_error(step: WriteStep) -> impl FnOnce(String) -> PipelineError {
    move |message| PipelineError::Write { step, message }
}

/// Persists accepted operations
pub struct WriteHandler {
    config: WriterConfig,
}

impl WriteHandler {
    pub fn new(config: WriterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Write the operation file, barrel export and registry entry, then type check.
    ///
    /// Calling this twice for the same operation rewrites the operation file
    /// but leaves the barrel and registry untouched the second time.
    pub async fn write_operation(
        &self,
        operation: &Operation,
        artifact: &GeneratedArtifact,
        emitter: &dyn EventEmitter,
    ) -> Result<WriteReport, PipelineError> {
        let progress = |stage: &str, percentage: u8| {
            emitter.emit(PipelineEvent::WriteProgress {
                stage: stage.to_string(),
                percentage,
            })
        };

        let dir = self.config.dir_for(operation.kind).to_path_buf();
        let Placement { stem, variable } = self.place(operation, &dir).await?;
        let file_path = dir.join(format!("{}.ts", stem));

        progress("render_template", 10);
        let content = format!(
            "{}{}",
            ownership_header(operation),
            render(operation.kind, &variable, artifact, &self.config.templates)
        );

        progress("write_operation_file", 25);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| write_error(WriteStep::WriteOperationFile)(format!("{}: {}", dir.display(), e)))?;
        tokio::fs::write(&file_path, content)
            .await
            .map_err(|e| write_error(WriteStep::WriteOperationFile)(format!("{}: {}", file_path.display(), e)))?;
        debug!(file = %file_path.display(), "Operation file written");

        progress("update_barrel", 45);
        let barrel_updated = self.ensure_barrel_export(&dir, &stem).await?;

        progress("update_registry", 65);
        let registry_updated = self.ensure_registry_entry(operation, &variable, &dir).await?;

        progress("format", 80);
        self.format(&file_path).await;

        progress("type_check", 90);
        let typecheck = run_tool(&self.config.typecheck_command, &[], &self.config.root, self.config.tool_timeout)
            .await
            .map_err(|e| write_error(WriteStep::TypeCheck)(format!("{:#}", e)))?;
        progress("done", 100);

        let report = WriteReport {
            operation_id: operation.id(),
            file_path,
            barrel_updated,
            registry_updated,
            typecheck,
        };
        info!(operation = %report.operation_id, summary = %report.summary(), "Operation written");
        Ok(report)
    }

    /// Pick the file stem and exported symbol for `operation`.
    ///
    /// A registered operation keeps the symbol its entry points at. A new one
    /// gets the derived names, suffixed with a number while another registry
    /// key already uses the symbol or the file belongs to something else.
    async fn place(&self, operation: &Operation, dir: &Path) -> Result<Placement, PipelineError> {
        let registry_file = &self.config.operations_file;
        let source = tokio::fs::read_to_string(registry_file)
            .await
            .map_err(|e| write_error(WriteStep::UpdateRegistry)(format!("{}: {}", registry_file.display(), e)))?;
        let mut parser = SourceParser::new().map_err(|e| write_error(WriteStep::UpdateRegistry)(format!("{:#}", e)))?;
        let doc = RegistryDocument::parse(&mut parser, &source)
            .map_err(|e| write_error(WriteStep::UpdateRegistry)(format!("{}: {:#}", registry_file.display(), e)))?;

        let map = operation.kind.plural();
        let registry_dir = registry_file.parent().unwrap_or(Path::new("."));
        let namespace = namespace_binding(&doc, map, &relative_specifier(registry_dir, dir)).name;
        let base_stem = file_stem_for(&operation.name);
        let base_variable = variable_name_for(&operation.name);

        if let Some(entry) = doc.map(map).and_then(|m| m.entry(&operation.name)) {
            if let Some(variable) = handler_symbol(entry_handler(entry), &namespace) {
                return Ok(placement_for_symbol(&base_stem, &base_variable, variable));
            }
            return Ok(Placement {
                stem: base_stem,
                variable: base_variable,
            });
        }

        let header = ownership_header(operation);
        for n in 1..=MAX_NAME_SUFFIX {
            let candidate = Placement::numbered(&base_stem, &base_variable, n);
            let referenced = doc.map(map).is_some_and(|m| {
                m.entries.iter().any(|e| {
                    e.key != operation.name && handler_symbol(entry_handler(e), &namespace) == Some(candidate.variable.as_str())
                })
            });
            if referenced {
                debug!(symbol = %candidate.variable, "Symbol already registered under another key");
                continue;
            }
            let path = dir.join(format!("{}.ts", candidate.stem));
            match tokio::fs::read_to_string(&path).await {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(candidate),
                Ok(existing) if existing.starts_with(&header) => return Ok(candidate),
                Ok(_) => debug!(file = %path.display(), "File belongs to another operation"),
                Err(e) => {
                    return Err(write_error(WriteStep::WriteOperationFile)(format!("{}: {}", path.display(), e)));
                }
            }
        }
        Err(write_error(WriteStep::WriteOperationFile)(format!(
            "no free file name for \"{}\" in {}",
            operation.name,
            dir.display()
        )))
    }

    async fn ensure_barrel_export(&self, dir: &Path, stem: &str) -> Result<bool, PipelineError> {
        let barrel = dir.join("index.ts");
        let existing = match tokio::fs::read_to_string(&barrel).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(write_error(WriteStep::UpdateBarrel)(format!("{}: {}", barrel.display(), e))),
        };

        let line = barrel_line(stem);
        if barrel_has_line(&existing, &line) {
            debug!(barrel = %barrel.display(), "Barrel export already present");
            return Ok(false);
        }

        let mut updated = existing;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(&line);
        updated.push('\n');
        tokio::fs::write(&barrel, updated)
            .await
            .map_err(|e| write_error(WriteStep::UpdateBarrel)(format!("{}: {}", barrel.display(), e)))?;
        Ok(true)
    }

    async fn ensure_registry_entry(&self, operation: &Operation, variable: &str, dir: &Path) -> Result<bool, PipelineError> {
        let registry_file = &self.config.operations_file;
        let source = tokio::fs::read_to_string(registry_file)
            .await
            .map_err(|e| write_error(WriteStep::UpdateRegistry)(format!("{}: {}", registry_file.display(), e)))?;

        let registry_dir = registry_file.parent().unwrap_or(Path::new("."));
        let specifier = relative_specifier(registry_dir, dir);
        let edited = add_registry_entry(&source, operation, variable, &specifier)
            .map_err(|e| write_error(WriteStep::UpdateRegistry)(format!("{:#}", e)))?;

        match edited {
            Some(updated) => {
                tokio::fs::write(registry_file, updated)
                    .await
                    .map_err(|e| write_error(WriteStep::UpdateRegistry)(format!("{}: {}", registry_file.display(), e)))?;
                Ok(true)
            }
            None => {
                debug!(operation = %operation.id(), "Registry entry already present");
                Ok(false)
            }
        }
    }

    async fn format(&self, file: &Path) {
        let files = [file.to_string_lossy().into_owned(), self.config.operations_file.to_string_lossy().into_owned()];
        let args: Vec<&str> = files.iter().map(String::as_str).collect();
        match run_tool(&self.config.format_command, &args, &self.config.root, self.config.tool_timeout).await {
            Ok(Some(outcome)) if !outcome.success => {
                warn!(output = %outcome.tail(5), "Formatter failed, keeping unformatted output")
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Formatter could not run"),
        }
    }
}

/// Upper bound on numbered name variants tried for one operation
const MAX_NAME_SUFFIX: usize = 100;

/// File stem and exported symbol of one operation
#[derive(Debug, Clone, PartialEq, Eq)]
struct Placement {
    stem: String,
    variable: String,
}

impl Placement {
    fn numbered(stem: &str, variable: &str, n: usize) -> Self {
        if n <= 1 {
            return Self {
                stem: stem.to_string(),
                variable: variable.to_string(),
            };
        }
        Self {
            stem: format!("{}-{}", stem, n),
            variable: format!("{}{}", variable, n),
        }
    }
}

/// Placement that exports `symbol`, recovering a numbered stem when the
/// symbol is a numbered variant of the derived one
fn placement_for_symbol(stem: &str, variable: &str, symbol: &str) -> Placement {
    let n = symbol
        .strip_prefix(variable)
        .filter(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        .and_then(|rest| rest.parse::<usize>().ok());
    match n {
        Some(n) if n >= 2 => Placement::numbered(stem, variable, n),
        _ if symbol == variable => Placement::numbered(stem, variable, 1),
        _ => Placement {
            stem: stem.to_string(),
            variable: symbol.to_string(),
        },
    }
}

/// First line of every generated operation file, naming its owner
fn ownership_header(operation: &Operation) -> String {
    let name = operation
        .name
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', " ");
    format!("// Generated by opgen for {} \"{}\"\n", operation.kind.as_str(), name)
}

/// Handler text of a registry entry, plain or object form
fn entry_handler(entry: &MapEntry) -> &str {
    entry
        .fields
        .as_ref()
        .and_then(|fields| fields.get("handler"))
        .map(String::as_str)
        .unwrap_or(&entry.value)
}

/// `x` when `handler` is `namespace.x`
fn handler_symbol<'a>(handler: &'a str, namespace: &str) -> Option<&'a str> {
    handler
        .trim()
        .strip_prefix(namespace)
        .and_then(|rest| rest.strip_prefix('.'))
        .filter(|symbol| is_identifier(symbol))
}

/// Namespace the registry uses for an operation directory
struct NamespaceBinding {
    name: String,
    /// An `import * as` for the directory already exists
    imported: bool,
}

/// Reuse the directory's namespace import, or pick an identifier no other
/// import or top-level map in the registry binds
fn namespace_binding(doc: &RegistryDocument, map: &str, specifier: &str) -> NamespaceBinding {
    if let Some(name) = doc.namespace_for(specifier) {
        return NamespaceBinding {
            name: name.to_string(),
            imported: true,
        };
    }
    let taken = |name: &str| {
        doc.imports().iter().any(|i| i.namespace.as_deref() == Some(name)) || doc.map(name).is_some()
    };
    let base = format!("{}Module", map);
    let name = std::iter::once(base.clone())
        .chain((2..).map(|n| format!("{}{}", base, n)))
        .find(|candidate| !taken(candidate))
        .unwrap_or(base);
    NamespaceBinding { name, imported: false }
}

/// Structural registry edit. `Ok(None)` when the entry already exists.
fn add_registry_entry(
    source: &str,
    operation: &Operation,
    variable: &str,
    specifier: &str,
) -> anyhow::Result<Option<String>> {
    let mut parser = SourceParser::new()?;
    let mut doc = RegistryDocument::parse(&mut parser, source)?;
    let map = operation.kind.plural();
    if doc.has_entry(map, &operation.name) {
        return Ok(None);
    }

    let binding = namespace_binding(&doc, map, specifier);
    if !binding.imported {
        doc = doc.with_namespace_import(&mut parser, &binding.name, specifier)?;
    }
    let namespace = binding.name;
    let doc = doc.with_entry(&mut parser, map, &operation.name, &format!("{}.{}", namespace, variable))?;
    Ok(Some(doc.source().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{test_artifact, test_mutation, test_query, write_project, RecordingEmitter};
    use crate::events::EventKind;

    fn handler(root: &Path) -> WriteHandler {
        WriteHandler::new(WriterConfig {
            root: root.to_path_buf(),
            operations_file: root.join("ops/operations.ts"),
            queries_dir: root.join("ops/queries"),
            mutations_dir: root.join("ops/mutations"),
            templates: TemplateOptions::default(),
            typecheck_command: vec![],
            format_command: vec![],
            tool_timeout: Duration::from_secs(10),
        })
    }

    #[test]
    fn test_relative_specifier() {
        assert_eq!(relative_specifier(Path::new("ops"), Path::new("ops/queries")), "./queries");
        assert_eq!(relative_specifier(Path::new("/p/ops"), Path::new("/p/ops/queries")), "./queries");
        assert_eq!(relative_specifier(Path::new("/p/server"), Path::new("/p/ops/queries")), "../ops/queries");
        assert_eq!(relative_specifier(Path::new("/p/ops"), Path::new("/p/ops")), ".");
    }

    #[test]
    fn test_barrel_line_matching() {
        assert!(barrel_has_line("export * from \"./a\";\n", "export * from './a'"));
        assert!(!barrel_has_line("export * from './ab'\n", "export * from './a'"));
    }

    #[tokio::test]
    async fn test_write_query_updates_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_project(root);

        let emitter = RecordingEmitter::default();
        let op = test_query("get albums by artist");
        let report = handler(root)
            .write_operation(&op, &test_artifact("getAlbumsByArtist"), &emitter)
            .await
            .unwrap();

        assert_eq!(report.file_path, root.join("ops/queries/get-albums-by-artist.ts"));
        assert!(report.barrel_updated && report.registry_updated);
        assert!(report.typecheck.is_none());

        let file = std::fs::read_to_string(&report.file_path).unwrap();
        assert!(file.contains("export const getAlbumsByArtist = procedure"));

        let barrel = std::fs::read_to_string(root.join("ops/queries/index.ts")).unwrap();
        assert_eq!(barrel, "export * from './get-all-artists'\nexport * from './get-albums-by-artist'\n");

        let registry = std::fs::read_to_string(root.join("ops/operations.ts")).unwrap();
        assert!(registry.contains("  'get all artists': queriesModule.getAllArtists,\n  \"get albums by artist\": queriesModule.getAlbumsByArtist,\n}"));
        assert_eq!(registry.matches("import * as queriesModule").count(), 1);

        assert!(emitter.kinds().iter().all(|k| *k == EventKind::WriteProgress));
        assert!(matches!(
            emitter.events().last(),
            Some(PipelineEvent::WriteProgress { percentage: 100, .. })
        ));
    }

    #[tokio::test]
    async fn test_second_write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_project(root);
        let handler = handler(root);
        let op = test_mutation("increment artist popularity by 10");
        let artifact = test_artifact("incrementArtistPopularityBy10");
        let emitter = RecordingEmitter::default();

        let first = handler.write_operation(&op, &artifact, &emitter).await.unwrap();
        let second = handler.write_operation(&op, &artifact, &emitter).await.unwrap();
        assert!(first.barrel_updated && first.registry_updated);
        assert!(!second.barrel_updated && !second.registry_updated);

        let barrel = std::fs::read_to_string(root.join("ops/mutations/index.ts")).unwrap();
        assert_eq!(barrel.matches("increment-artist-popularity-by-10").count(), 1);

        let registry = std::fs::read_to_string(root.join("ops/operations.ts")).unwrap();
        assert_eq!(registry.matches("\"increment artist popularity by 10\"").count(), 1);
        assert!(registry.contains("import * as queriesModule from './queries'\nimport * as mutationsModule from './mutations'\n"));
        assert!(registry.contains("mutationsModule.incrementArtistPopularityBy10"));
    }

    #[tokio::test]
    async fn test_missing_registry_map_is_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_project(root);
        std::fs::write(root.join("ops/operations.ts"), "export const queries = {}\n").unwrap();

        let err = handler(root)
            .write_operation(&test_mutation("create artist"), &test_artifact("createArtist"), &RecordingEmitter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Write { step: WriteStep::UpdateRegistry, .. }));
        // Earlier steps are kept
        assert!(root.join("ops/mutations/create-artist.ts").exists());
    }

    fn artifact_returning(function_name: &str, value: &str) -> GeneratedArtifact {
        let mut artifact = test_artifact(function_name);
        artifact.function = format!("async ({{ input, ctx }}) => '{}'", value);
        artifact
    }

    #[tokio::test]
    async fn test_names_differing_only_in_case_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_project(root);
        let handler = handler(root);
        let emitter = RecordingEmitter::default();

        let first = handler
            .write_operation(&test_query("get all albums"), &artifact_returning("getAllAlbums", "FIRST"), &emitter)
            .await
            .unwrap();
        let second = handler
            .write_operation(&test_query("Get all albums!"), &artifact_returning("getAllAlbums", "SECOND"), &emitter)
            .await
            .unwrap();

        assert_eq!(first.file_path, root.join("ops/queries/get-all-albums.ts"));
        assert_eq!(second.file_path, root.join("ops/queries/get-all-albums-2.ts"));
        assert!(std::fs::read_to_string(&first.file_path).unwrap().contains("'FIRST'"));
        let second_file = std::fs::read_to_string(&second.file_path).unwrap();
        assert!(second_file.contains("'SECOND'"));
        assert!(second_file.contains("export const getAllAlbums2 = procedure"));

        let registry = std::fs::read_to_string(root.join("ops/operations.ts")).unwrap();
        assert!(registry.contains("\"get all albums\": queriesModule.getAllAlbums,"));
        assert!(registry.contains("\"Get all albums!\": queriesModule.getAllAlbums2,"));
        let barrel = std::fs::read_to_string(root.join("ops/queries/index.ts")).unwrap();
        assert!(barrel.contains("export * from './get-all-albums'\n"));
        assert!(barrel.contains("export * from './get-all-albums-2'\n"));

        // Rewriting the second operation keeps its numbered names
        let again = handler
            .write_operation(&test_query("Get all albums!"), &artifact_returning("getAllAlbums", "THIRD"), &emitter)
            .await
            .unwrap();
        assert_eq!(again.file_path, second.file_path);
        assert!(!again.barrel_updated && !again.registry_updated);
        assert!(std::fs::read_to_string(&first.file_path).unwrap().contains("'FIRST'"));
    }

    #[tokio::test]
    async fn test_unowned_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_project(root);
        let handwritten = "export const getAllAlbums = procedure.query(() => [])\n";
        std::fs::write(root.join("ops/queries/get-all-albums.ts"), handwritten).unwrap();

        let report = handler(root)
            .write_operation(&test_query("get all albums"), &test_artifact("getAllAlbums"), &RecordingEmitter::default())
            .await
            .unwrap();
        assert_eq!(report.file_path, root.join("ops/queries/get-all-albums-2.ts"));
        assert_eq!(std::fs::read_to_string(root.join("ops/queries/get-all-albums.ts")).unwrap(), handwritten);
        assert!(std::fs::read_to_string(root.join("ops/operations.ts"))
            .unwrap()
            .contains("queriesModule.getAllAlbums2"));
    }

    #[tokio::test]
    async fn test_namespace_bound_elsewhere_gets_fresh_name() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_project(root);
        std::fs::write(
            root.join("ops/operations.ts"),
            "import * as queriesModule from './legacy'\n\nexport const queries = {\n  'old report': queriesModule.oldReport,\n}\n\nexport const mutations = {}\n",
        )
        .unwrap();

        handler(root)
            .write_operation(&test_query("get all albums"), &test_artifact("getAllAlbums"), &RecordingEmitter::default())
            .await
            .unwrap();
        let registry = std::fs::read_to_string(root.join("ops/operations.ts")).unwrap();
        assert!(registry.contains("import * as queriesModule from './legacy'\nimport * as queriesModule2 from './queries'\n"));
        assert!(registry.contains("\"get all albums\": queriesModule2.getAllAlbums,"));
        assert!(registry.contains("'old report': queriesModule.oldReport,"));
    }

    #[test]
    fn test_placement_for_symbol() {
        let numbered = placement_for_symbol("get-all-albums", "getAllAlbums", "getAllAlbums3");
        assert_eq!(numbered.stem, "get-all-albums-3");
        let plain = placement_for_symbol("increment-by-10", "incrementBy10", "incrementBy10");
        assert_eq!(plain.stem, "increment-by-10");
        assert_eq!(plain.variable, "incrementBy10");
        let custom = placement_for_symbol("get-all-albums", "getAllAlbums", "listAlbums");
        assert_eq!((custom.stem.as_str(), custom.variable.as_str()), ("get-all-albums", "listAlbums"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_typecheck_outcome_reported() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_project(root);
        let mut handler = handler(root);
        handler.config.typecheck_command = vec!["sh".into(), "-c".into(), "echo 'TS2304' && exit 1".into()];

        let report = handler
            .write_operation(&test_query("get all albums"), &test_artifact("getAllAlbums"), &RecordingEmitter::default())
            .await
            .unwrap();
        assert_eq!(report.typecheck_passed(), Some(false));
        assert!(report.typecheck.unwrap().output.contains("TS2304"));
    }
}
