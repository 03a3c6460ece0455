//! Operation registry extraction
//!
//! The registry file declares one literal map per kind, named after the
//! plural kind (`queries`, `mutations`). Entries are either a plain module
//! reference or the object form `{ prompt, dependencies, handler }`.

use super::document::{MapEntry, RegistryDocument};
use super::SourceParser;
use crate::operations::{Operation, OperationKind, Registry};
use anyhow::Result;
use std::path::Path;

fn entry_to_operation(kind: OperationKind, entry: &MapEntry, file: &Path) -> Operation {
    let mut operation = Operation::new(kind, entry.key.clone()).with_source(file, entry.line);
    match &entry.fields {
        Some(fields) => {
            if let Some(prompt) = fields.get("prompt").filter(|p| !p.trim().is_empty()) {
                operation.prompt = prompt.clone();
            }
            operation.handler = fields.get("handler").cloned();
            operation.dependencies = fields.get("dependencies").cloned();
        }
        None => operation.handler = Some(entry.value.clone()),
    }
    operation
}

/// Operations of one kind declared in the document
pub fn operations_in(doc: &RegistryDocument, kind: OperationKind, file: &Path) -> Vec<Operation> {
    doc.map(kind.plural())
        .map(|map| {
            map.entries
                .iter()
                .map(|entry| entry_to_operation(kind, entry, file))
                .collect()
        })
        .unwrap_or_default()
}

pub fn registry_from_document(doc: &RegistryDocument, file: &Path) -> Registry {
    let mut registry = Registry::default();
    for kind in [OperationKind::Query, OperationKind::Mutation] {
        registry.replace_kind(kind, operations_in(doc, kind, file));
    }
    registry
}

/// Parse registry source into a full snapshot
pub fn parse_registry(parser: &mut SourceParser, file: &Path, source: &str) -> Result<Registry> {
    let doc = RegistryDocument::parse(parser, source)?;
    Ok(registry_from_document(&doc, file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_object_entries() {
        let src = r#"
import * as queriesModule from './queries'
import * as mutationsModule from './mutations'

export const queries = {
  'get all artists': queriesModule.getAllArtists,
  'get albums by artist': {
    prompt: 'albums for one artist, newest first',
    dependencies: 'albums, artists',
    handler: queriesModule.getAlbumsByArtist,
  },
}

export const mutations = {
  'create artist': mutationsModule.createArtist,
}
"#;
        let mut parser = SourceParser::new().unwrap();
        let registry = parse_registry(&mut parser, Path::new("ops/operations.ts"), src).unwrap();
        assert_eq!(registry.len(), 3);

        let plain = registry.get(OperationKind::Query, "get all artists").unwrap();
        assert_eq!(plain.handler.as_deref(), Some("queriesModule.getAllArtists"));
        assert_eq!(plain.prompt, "get all artists");
        assert_eq!(plain.line_number, 6);

        let object = registry
            .get(OperationKind::Query, "get albums by artist")
            .unwrap();
        assert_eq!(object.prompt, "albums for one artist, newest first");
        assert_eq!(object.dependencies.as_deref(), Some("albums, artists"));
        assert_eq!(object.handler.as_deref(), Some("queriesModule.getAlbumsByArtist"));

        assert!(registry.contains(OperationKind::Mutation, "create artist"));
    }

    #[test]
    fn test_missing_map_is_empty() {
        let mut parser = SourceParser::new().unwrap();
        let registry = parse_registry(
            &mut parser,
            Path::new("operations.ts"),
            "export const queries = {}\n",
        )
        .unwrap();
        assert!(registry.is_empty());
    }
}
