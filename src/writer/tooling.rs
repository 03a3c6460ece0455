//! External tool invocation (type-checker, formatter, migration tool)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, warn};

/// Output kept in reports is capped to this many characters
const OUTPUT_LIMIT: usize = 4000;

/// Result of one tool run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub command: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr, truncated
    pub output: String,
}

impl ToolOutcome {
    /// Last few output lines, for one-line summaries
    pub fn tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.output.lines().filter(|l| !l.trim().is_empty()).collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= OUTPUT_LIMIT {
        return text.to_string();
    }
    let skip = text.chars().count() - OUTPUT_LIMIT;
    format!("...{}", text.chars().skip(skip).collect::<String>())
}

/// Run `command` (program followed by arguments) plus `extra_args` in `cwd`.
///
/// An empty command returns `Ok(None)`. Spawn failures and timeouts are errors;
/// a non-zero exit is a successful run with `success == false`.
pub async fn run_tool(
    command: &[String],
    extra_args: &[&str],
    cwd: &Path,
    timeout: Duration,
) -> Result<Option<ToolOutcome>> {
    let Some((program, args)) = command.split_first() else {
        return Ok(None);
    };
    let rendered = command
        .iter()
        .map(String::as_str)
        .chain(extra_args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    debug!(command = %rendered, cwd = %cwd.display(), "Running tool");

    let output = tokio::time::timeout(
        timeout,
        tokio::process::Command::new(program)
            .args(args)
            .args(extra_args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .with_context(|| format!("`{}` timed out after {}s", rendered, timeout.as_secs()))?
    .with_context(|| format!("Failed to run `{}`", rendered))?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }

    if !output.status.success() {
        warn!(command = %rendered, exit_code = ?output.status.code(), "Tool exited with failure");
    }

    Ok(Some(ToolOutcome {
        command: rendered,
        success: output.status.success(),
        exit_code: output.status.code(),
        output: truncate(&text),
    }))
}
