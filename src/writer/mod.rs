//! File write handler
//!
//! Persists an accepted artifact: renders the operation file, keeps the
//! directory barrel and the registry file consistent with it, then runs the
//! type checker. Files already written are never rolled back.

mod handler;
pub mod naming;
pub mod template;
pub mod tooling;

pub use handler::{relative_specifier, WriteHandler, WriterConfig};
pub use template::TemplateOptions;
pub use tooling::{run_tool, ToolOutcome};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What one write did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReport {
    pub operation_id: String,
    pub file_path: PathBuf,
    /// Export line appended to the barrel
    pub barrel_updated: bool,
    /// Entry added to the registry
    pub registry_updated: bool,
    /// `None` when type checking is disabled
    pub typecheck: Option<ToolOutcome>,
}

impl WriteReport {
    pub fn typecheck_passed(&self) -> Option<bool> {
        self.typecheck.as_ref().map(|t| t.success)
    }

    pub fn summary(&self) -> String {
        let typecheck = match self.typecheck_passed() {
            Some(true) => "type check passed",
            Some(false) => "type check failed",
            None => "type check skipped",
        };
        format!(
            "wrote {}; barrel {}; registry {}; {}",
            self.file_path.display(),
            if self.barrel_updated { "updated" } else { "unchanged" },
            if self.registry_updated { "updated" } else { "unchanged" },
            typecheck
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary() {
        let mut report = WriteReport {
            operation_id: "query:get all artists".into(),
            file_path: PathBuf::from("ops/queries/get-all-artists.ts"),
            barrel_updated: true,
            registry_updated: false,
            typecheck: None,
        };
        assert_eq!(
            report.summary(),
            "wrote ops/queries/get-all-artists.ts; barrel updated; registry unchanged; type check skipped"
        );

        report.typecheck = Some(ToolOutcome {
            command: "tsc --noEmit".into(),
            success: false,
            exit_code: Some(2),
            output: "error TS2304".into(),
        });
        assert_eq!(report.typecheck_passed(), Some(false));
        assert!(report.summary().ends_with("type check failed"));
    }
}
