//! Pipeline error taxonomy
//!
//! Every error that reaches the user carries a stable code and at least one
//! actionable suggestion. `ErrorInfo` is the serializable projection stored in
//! the state context.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Errors raised by the generation pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A source file could not be parsed; its previous snapshot is kept.
    #[error("failed to parse {}: {message}", file.display())]
    Detection { file: PathBuf, message: String },

    /// The synthesis backend could not be reached or timed out.
    #[error("synthesis request failed: {0}")]
    SynthesisTransport(String),

    /// The synthesis backend answered with something that is not a valid artifact.
    #[error("synthesis response has an unexpected shape: {0}")]
    SynthesisShape(String),

    /// Neither the backend nor the fallback template produced an artifact.
    #[error("no implementation could be produced for \"{operation}\": {reason}")]
    SynthesisUnavailable { operation: String, reason: String },

    /// A file-system or structural-edit step failed while persisting an operation.
    #[error("failed to {step}: {message}")]
    Write { step: WriteStep, message: String },

    /// Startup configuration is unusable; the process exits.
    #[error("{0}")]
    FatalConfig(String),
}

/// The step of the write procedure that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStep {
    RenderTemplate,
    WriteOperationFile,
    UpdateBarrel,
    UpdateRegistry,
    TypeCheck,
}

impl std::fmt::Display for WriteStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RenderTemplate => "render the operation template",
            Self::WriteOperationFile => "write the operation file",
            Self::UpdateBarrel => "update the barrel file",
            Self::UpdateRegistry => "update the registry file",
            Self::TypeCheck => "run the type checker",
        };
        f.write_str(s)
    }
}

impl PipelineError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Detection { .. } => "DETECTION_FAILED",
            Self::SynthesisTransport(_) => "SYNTHESIS_TRANSPORT",
            Self::SynthesisShape(_) => "SYNTHESIS_SHAPE",
            Self::SynthesisUnavailable { .. } => "SYNTHESIS_UNAVAILABLE",
            Self::Write { .. } => "WRITE_OPERATION_FAILED",
            Self::FatalConfig(_) => "FATAL_CONFIG",
        }
    }

    /// Actionable suggestions shown next to the error. Never empty.
    pub fn suggestions(&self) -> Vec<String> {
        let items: &[&str] = match self {
            Self::Detection { .. } => &[
                "Fix the syntax error in the file and save it again",
                "The previously parsed operations are still in use",
            ],
            Self::SynthesisTransport(_) | Self::SynthesisUnavailable { .. } => &[
                "Check your API key configuration",
                "Verify network connectivity",
                "Try a different provider with OPGEN_LLM_PROVIDER",
                "Retry the operation",
            ],
            Self::SynthesisShape(_) => &[
                "Regenerate the implementation",
                "Add configuration rules that describe the expected output",
            ],
            Self::Write { step, .. } => match step {
                WriteStep::UpdateRegistry => &[
                    "Ensure the operations file declares `queries` and `mutations` object literals",
                    "Check file permissions",
                ],
                WriteStep::TypeCheck => &[
                    "Run the type checker manually to see the full output",
                    "Edit the generated file by hand",
                ],
                _ => &[
                    "Check file permissions",
                    "Ensure the queries and mutations directories exist",
                ],
            },
            Self::FatalConfig(_) => &[
                "Set OPENAI_API_KEY or CEREBRAS_API_KEY",
                "Check the paths in opgen.yaml",
            ],
        };
        items.iter().map(|s| s.to_string()).collect()
    }

    /// Convert into the projection stored in the state context
    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo {
            message: self.to_string(),
            code: Some(self.code().to_string()),
            suggestions: self.suggestions(),
            stack: None,
        }
    }
}

/// User-facing error description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorInfo {
    /// Build an error with a single suggestion
    pub fn new(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            suggestions: vec![suggestion.into()],
            stack: None,
        }
    }

    /// Attach an error chain (rendered from `anyhow`)
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl From<&PipelineError> for ErrorInfo {
    fn from(err: &PipelineError) -> Self {
        err.to_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_variant_has_suggestions() {
        let errors = vec![
            PipelineError::Detection {
                file: PathBuf::from("a.ts"),
                message: "bad".into(),
            },
            PipelineError::SynthesisTransport("timeout".into()),
            PipelineError::SynthesisShape("missing field".into()),
            PipelineError::SynthesisUnavailable {
                operation: "x".into(),
                reason: "no tables".into(),
            },
            PipelineError::Write {
                step: WriteStep::UpdateBarrel,
                message: "denied".into(),
            },
            PipelineError::Write {
                step: WriteStep::UpdateRegistry,
                message: "no literal".into(),
            },
            PipelineError::FatalConfig("no keys".into()),
        ];

        for err in &errors {
            assert!(!err.suggestions().is_empty(), "{:?}", err);
            let info = err.to_info();
            assert_eq!(info.code.as_deref(), Some(err.code()));
            assert_eq!(info.message, err.to_string());
        }
    }

    #[test]
    fn test_write_error_message_names_step() {
        let err = PipelineError::Write {
            step: WriteStep::UpdateRegistry,
            message: "object literal `queries` not found".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to update the registry file: object literal `queries` not found"
        );
    }

    #[test]
    fn test_error_info_omits_empty_fields() {
        let info = ErrorInfo::new("boom", "try again");
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("\"code\""));
        assert!(!json.contains("\"stack\""));
    }
}
