//! Tree-sitter based source parsing
//!
//! Extracts operation registries, operation declarations in application
//! code and the table schema from TypeScript sources, and diffs them against
//! the previous snapshot.

pub mod detector;
pub mod document;
pub mod helpers;
pub mod registry;
pub mod schema;
pub mod usage;

pub use detector::{DetectorConfig, OperationDetector};
pub use document::{ImportDecl, LiteralMap, MapEntry, RegistryDocument};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use tree_sitter::{Parser, Tree};

/// Grammar variants used for parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceLanguage {
    TypeScript,
    /// TypeScript or JavaScript with JSX
    Tsx,
}

impl SourceLanguage {
    /// Get language from file extension. JavaScript is parsed with the
    /// TypeScript grammar, a superset.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "ts" | "mts" | "cts" | "js" | "mjs" | "cjs" => Some(Self::TypeScript),
            "tsx" | "jsx" => Some(Self::Tsx),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    fn tree_sitter_language(&self) -> tree_sitter::Language {
        match self {
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        }
    }
}

/// Holds one configured tree-sitter parser per grammar
pub struct SourceParser {
    parsers: HashMap<SourceLanguage, Parser>,
}

impl SourceParser {
    pub fn new() -> Result<Self> {
        let mut parsers = HashMap::new();
        for lang in [SourceLanguage::TypeScript, SourceLanguage::Tsx] {
            let mut parser = Parser::new();
            parser
                .set_language(&lang.tree_sitter_language())
                .context(format!("Failed to set language for {:?}", lang))?;
            parsers.insert(lang, parser);
        }
        Ok(Self { parsers })
    }

    pub fn parse(&mut self, language: SourceLanguage, content: &str) -> Result<Tree> {
        let parser = self
            .parsers
            .get_mut(&language)
            .context("Parser not found")?;
        parser.parse(content, None).context("Failed to parse source")
    }

    /// Parse a file by its extension
    pub fn parse_path(&mut self, path: &Path, content: &str) -> Result<Tree> {
        let language = SourceLanguage::from_path(path)
            .with_context(|| format!("Unsupported file extension: {}", path.display()))?;
        self.parse(language, content)
    }
}

/// SHA-256 of the file content, hex encoded
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_extension() {
        assert_eq!(SourceLanguage::from_extension("ts"), Some(SourceLanguage::TypeScript));
        assert_eq!(SourceLanguage::from_extension("JS"), Some(SourceLanguage::TypeScript));
        assert_eq!(SourceLanguage::from_extension("tsx"), Some(SourceLanguage::Tsx));
        assert_eq!(SourceLanguage::from_extension("jsx"), Some(SourceLanguage::Tsx));
        assert_eq!(SourceLanguage::from_extension("rs"), None);
    }

    #[test]
    fn test_parse_tsx() {
        let mut parser = SourceParser::new().unwrap();
        let tree = parser
            .parse_path(Path::new("page.tsx"), "const a = <div>{x}</div>;")
            .unwrap();
        assert!(!tree.root_node().has_error());
        assert!(parser.parse_path(Path::new("main.rs"), "fn main() {}").is_err());
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(content_hash("a"), content_hash("a"));
        assert_ne!(content_hash("a"), content_hash("b"));
        assert_eq!(content_hash("").len(), 64);
    }
}
