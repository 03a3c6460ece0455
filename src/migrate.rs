//! Wrappers around the external schema migration tool

use crate::error::PipelineError;
use crate::writer::{run_tool, ToolOutcome};
use crate::Config;
use std::fmt;
use tracing::info;

pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationAction {
    /// Generate migration files from the schema
    Generate,
    /// Check migrations for consistency
    Check,
    /// Apply pending migrations
    Migrate,
}

impl MigrationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Check => "check",
            Self::Migrate => "migrate",
        }
    }
}

impl fmt::Display for MigrationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run `action` with the configured migration command.
///
/// `database_url` is the value of `DATABASE_URL`; the tool reads it from the
/// inherited environment.
pub async fn run_migration(
    action: MigrationAction,
    config: &Config,
    database_url: Option<&str>,
) -> Result<ToolOutcome, PipelineError> {
    if !database_url.is_some_and(|url| !url.trim().is_empty()) {
        return Err(PipelineError::FatalConfig(format!(
            "{} must be set to {} the database schema",
            DATABASE_URL_VAR, action
        )));
    }

    info!(action = %action, "Running migration tool");
    run_tool(
        &config.tooling.migration_command,
        &[action.as_str()],
        &config.root,
        config.tool_timeout(),
    )
    .await
    .map_err(|e| PipelineError::FatalConfig(format!("{:#}", e)))?
    .ok_or_else(|| PipelineError::FatalConfig("tooling.migration_command is empty".into()))
}
