//! opgen
//!
//! Turns operations declared as natural-language phrases in application code
//! into generated, registered implementations:
//! - Tree-sitter parsing of the registry, schema and declaration sites
//! - An event-driven state machine sequencing detection, configuration,
//!   synthesis, review and persistence
//! - OpenAI-compatible synthesis backends with a template fallback
//! - Structural edits of the registry and barrel files

pub mod error;
pub mod events;
pub mod migrate;
pub mod operations;
pub mod parser;
pub mod pipeline;
pub mod state;
pub mod synthesis;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_helpers;

use anyhow::Result;
use error::PipelineError;
use parser::usage::DeclarationHooks;
use parser::DetectorConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use writer::{TemplateOptions, WriterConfig};

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub paths: PathsYamlConfig,
    pub declarations: DeclarationsYamlConfig,
    pub llm: LlmConfig,
    pub tooling: ToolingYamlConfig,
    pub templates: TemplateOptions,
    /// Dotenv files loaded before env overrides are read, in order
    #[serde(alias = "env_file")]
    pub env_files: Vec<String>,
}

/// Project layout, relative to `root` unless absolute
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsYamlConfig {
    pub root: String,
    pub operations_file: String,
    pub queries_dir: String,
    pub mutations_dir: String,
    pub schema_file: String,
}

impl Default for PathsYamlConfig {
    fn default() -> Self {
        Self {
            root: ".".into(),
            operations_file: "ops/operations.ts".into(),
            queries_dir: "ops/queries".into(),
            mutations_dir: "ops/mutations".into(),
            schema_file: "ops/schema.ts".into(),
        }
    }
}

/// Call names that declare operations in application code
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeclarationsYamlConfig {
    pub query_hooks: Vec<String>,
    pub mutation_hooks: Vec<String>,
}

impl Default for DeclarationsYamlConfig {
    fn default() -> Self {
        Self {
            query_hooks: vec!["useOpgenQuery".into()],
            mutation_hooks: vec!["useOpgenMutation".into()],
        }
    }
}

/// Synthesis backend settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Preferred backend (`openai` or `cerebras`)
    pub provider: Option<String>,
    pub timeout_secs: u64,
    pub openai_model: String,
    pub openai_url: String,
    pub cerebras_model: String,
    pub cerebras_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: None,
            timeout_secs: 120,
            openai_model: "gpt-4o".into(),
            openai_url: "https://api.openai.com/v1/chat/completions".into(),
            cerebras_model: "qwen-3-235b-a22b-instruct-2507".into(),
            cerebras_url: "https://api.cerebras.ai/v1/chat/completions".into(),
        }
    }
}

/// External tools, each a program followed by its arguments
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolingYamlConfig {
    /// Empty list disables the type check
    pub typecheck_command: Vec<String>,
    pub format_command: Vec<String>,
    pub migration_command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ToolingYamlConfig {
    fn default() -> Self {
        Self {
            typecheck_command: ["npx", "--yes", "tsc", "--noEmit"].map(String::from).to_vec(),
            format_command: Vec::new(),
            migration_command: ["npx", "drizzle-kit"].map(String::from).to_vec(),
            timeout_secs: 300,
        }
    }
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    pub root: PathBuf,
    pub operations_file: PathBuf,
    pub queries_dir: PathBuf,
    pub mutations_dir: PathBuf,
    pub schema_file: PathBuf,
    pub hooks: DeclarationHooks,
    pub llm: LlmConfig,
    pub tooling: ToolingYamlConfig,
    pub templates: TemplateOptions,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Priority: environment > YAML > defaults
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        // 1. Load YAML config (or defaults if file not found)
        let yaml = Self::load_yaml(yaml_path);

        // 2. Dotenv files feed the environment without overriding it
        let env_files = if yaml.env_files.is_empty() {
            vec![".env.local".to_string(), ".env".to_string()]
        } else {
            yaml.env_files.clone()
        };
        for file in &env_files {
            match dotenvy::from_path(file) {
                Ok(()) => tracing::debug!("Loaded environment from {}", file),
                Err(e) if e.not_found() => {}
                Err(e) => tracing::warn!("Failed to load {}: {}", file, e),
            }
        }

        // 3. Build Config with env var overrides
        let root = PathBuf::from(std::env::var("OPGEN_ROOT").unwrap_or(yaml.paths.root));
        let operations_file = std::env::var("OPGEN_OPERATIONS_FILE").unwrap_or(yaml.paths.operations_file);
        let schema_file = std::env::var("OPGEN_SCHEMA_FILE").unwrap_or(yaml.paths.schema_file);

        let mut llm = yaml.llm;
        if let Ok(provider) = std::env::var(synthesis::PROVIDER_OVERRIDE_VAR) {
            llm.provider = Some(provider);
        }
        if let Some(secs) = std::env::var("OPGEN_LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            llm.timeout_secs = secs;
        }

        Ok(Self {
            operations_file: root.join(operations_file),
            queries_dir: root.join(yaml.paths.queries_dir),
            mutations_dir: root.join(yaml.paths.mutations_dir),
            schema_file: root.join(schema_file),
            root,
            hooks: DeclarationHooks {
                query: yaml.declarations.query_hooks,
                mutation: yaml.declarations.mutation_hooks,
            },
            llm,
            tooling: yaml.tooling,
            templates: yaml.templates,
        })
    }

    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("opgen.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }

    /// Check the layout before the pipeline starts.
    ///
    /// A missing registry file is fatal; other gaps come back as warnings.
    pub fn validate(&self) -> Result<Vec<String>, PipelineError> {
        if !self.root.is_dir() {
            return Err(PipelineError::FatalConfig(format!(
                "project root {} is not a directory",
                self.root.display()
            )));
        }
        if !self.operations_file.is_file() {
            return Err(PipelineError::FatalConfig(format!(
                "operations file {} not found",
                self.operations_file.display()
            )));
        }

        let mut warnings = Vec::new();
        if !self.schema_file.is_file() {
            warnings.push(format!(
                "schema file {} not found; synthesis runs without table context",
                self.schema_file.display()
            ));
        }
        for dir in [&self.queries_dir, &self.mutations_dir] {
            if !dir.is_dir() {
                warnings.push(format!("{} does not exist yet; it is created on first write", dir.display()));
            }
        }
        if self.hooks.query.is_empty() && self.hooks.mutation.is_empty() {
            warnings.push("no declaration hooks configured; new operations will not be detected".into());
        }
        Ok(warnings)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tooling.timeout_secs)
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            operations_file: self.operations_file.clone(),
            schema_file: self.schema_file.clone(),
            source_root: self.root.clone(),
            hooks: self.hooks.clone(),
        }
    }

    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            root: self.root.clone(),
            operations_file: self.operations_file.clone(),
            queries_dir: self.queries_dir.clone(),
            mutations_dir: self.mutations_dir.clone(),
            templates: self.templates.clone(),
            typecheck_command: self.tooling.typecheck_command.clone(),
            format_command: self.tooling.format_command.clone(),
            tool_timeout: self.tool_timeout(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
