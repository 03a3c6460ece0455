//! Pipeline event vocabulary

use crate::error::ErrorInfo;
use crate::operations::{Operation, OperationKind, SchemaChange, SchemaDefinition};
use crate::state::{Command, PipelineSnapshot};
use crate::synthesis::{GeneratedArtifact, ProviderId};
use crate::writer::WriteReport;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Every event that travels over the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    StateChanged {
        snapshot: Box<PipelineSnapshot>,
    },
    OperationsLoaded {
        kind: OperationKind,
        operations: Vec<Operation>,
    },
    OperationAdded {
        operation: Operation,
    },
    OperationRemoved {
        kind: OperationKind,
        name: String,
        file: PathBuf,
    },
    OperationUpdated {
        operation: Operation,
    },
    NewQueryAdded {
        operation: Operation,
    },
    NewMutationAdded {
        operation: Operation,
    },
    SchemaLoaded {
        schema: SchemaDefinition,
    },
    SchemaUpdated {
        schema: SchemaDefinition,
        changes: Vec<SchemaChange>,
    },
    DetectionStarted {
        file: PathBuf,
    },
    DetectionFinished {
        file: PathBuf,
    },
    DetectionFailed {
        file: PathBuf,
        message: String,
    },
    ProviderSelected {
        provider: ProviderId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    LlmAnalysisStarted {
        request_id: u64,
        operation: Operation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        configuration_rules: Option<String>,
    },
    LlmAnalysisComplete {
        request_id: u64,
        operation: Operation,
        artifact: GeneratedArtifact,
    },
    LlmAnalysisFailed {
        request_id: u64,
        operation_name: String,
        error: ErrorInfo,
    },
    WriteStarted {
        operation_id: String,
    },
    WriteProgress {
        stage: String,
        percentage: u8,
    },
    WriteCompleted {
        report: WriteReport,
    },
    ErrorOccurred {
        error: ErrorInfo,
    },
    Command {
        command: Command,
    },
}

/// Field-less discriminant of [`PipelineEvent`], used as subscription key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StateChanged,
    OperationsLoaded,
    OperationAdded,
    OperationRemoved,
    OperationUpdated,
    NewQueryAdded,
    NewMutationAdded,
    SchemaLoaded,
    SchemaUpdated,
    DetectionStarted,
    DetectionFinished,
    DetectionFailed,
    ProviderSelected,
    LlmAnalysisStarted,
    LlmAnalysisComplete,
    LlmAnalysisFailed,
    WriteStarted,
    WriteProgress,
    WriteCompleted,
    ErrorOccurred,
    Command,
}

impl PipelineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::StateChanged { .. } => EventKind::StateChanged,
            Self::OperationsLoaded { .. } => EventKind::OperationsLoaded,
            Self::OperationAdded { .. } => EventKind::OperationAdded,
            Self::OperationRemoved { .. } => EventKind::OperationRemoved,
            Self::OperationUpdated { .. } => EventKind::OperationUpdated,
            Self::NewQueryAdded { .. } => EventKind::NewQueryAdded,
            Self::NewMutationAdded { .. } => EventKind::NewMutationAdded,
            Self::SchemaLoaded { .. } => EventKind::SchemaLoaded,
            Self::SchemaUpdated { .. } => EventKind::SchemaUpdated,
            Self::DetectionStarted { .. } => EventKind::DetectionStarted,
            Self::DetectionFinished { .. } => EventKind::DetectionFinished,
            Self::DetectionFailed { .. } => EventKind::DetectionFailed,
            Self::ProviderSelected { .. } => EventKind::ProviderSelected,
            Self::LlmAnalysisStarted { .. } => EventKind::LlmAnalysisStarted,
            Self::LlmAnalysisComplete { .. } => EventKind::LlmAnalysisComplete,
            Self::LlmAnalysisFailed { .. } => EventKind::LlmAnalysisFailed,
            Self::WriteStarted { .. } => EventKind::WriteStarted,
            Self::WriteProgress { .. } => EventKind::WriteProgress,
            Self::WriteCompleted { .. } => EventKind::WriteCompleted,
            Self::ErrorOccurred { .. } => EventKind::ErrorOccurred,
            Self::Command { .. } => EventKind::Command,
        }
    }

    /// The "new operation detected" event for a kind
    pub fn new_operation(operation: Operation) -> Self {
        match operation.kind {
            OperationKind::Query => Self::NewQueryAdded { operation },
            OperationKind::Mutation => Self::NewMutationAdded { operation },
        }
    }

    pub fn command(command: Command) -> Self {
        Self::Command { command }
    }

    pub fn error(error: ErrorInfo) -> Self {
        Self::ErrorOccurred { error }
    }
}

/// Publishing seam handed to producers
///
/// Implemented by [`EventBus`](super::EventBus) (direct, synchronous delivery)
/// and by the pipeline inbox (queued for the run loop).
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}
