//! Pipeline state and its context record

use super::commands::CommandName;
use crate::error::ErrorInfo;
use crate::operations::{Operation, OperationKind, Registry, SchemaDefinition};
use crate::synthesis::{GeneratedArtifact, ProviderId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maximum number of history entries kept
pub const HISTORY_CAPACITY: usize = 50;

/// Operations listed per page in the browse views
pub const PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateName {
    Idle,
    Detecting,
    Generating,
    AwaitingFeedback,
    ConfiguringNewOperation,
    LlmProcessing,
    ViewingQueries,
    ViewingMutations,
    ViewingOperationDetail,
    Error,
}

impl StateName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Detecting => "detecting",
            Self::Generating => "generating",
            Self::AwaitingFeedback => "awaiting_feedback",
            Self::ConfiguringNewOperation => "configuring_new_operation",
            Self::LlmProcessing => "llm_processing",
            Self::ViewingQueries => "viewing_queries",
            Self::ViewingMutations => "viewing_mutations",
            Self::ViewingOperationDetail => "viewing_operation_detail",
            Self::Error => "error",
        }
    }

    /// States from which the registry browser is reachable
    pub fn is_browsable(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::ViewingQueries | Self::ViewingMutations | Self::ViewingOperationDetail
        )
    }

    /// A generation cycle is in progress and must not be interrupted
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::ConfiguringNewOperation
                | Self::LlmProcessing
                | Self::AwaitingFeedback
                | Self::Generating
        )
    }
}

impl std::fmt::Display for StateName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Bounded FIFO log; the oldest entry is evicted first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryLog {
    entries: VecDeque<HistoryEntry>,
}

impl HistoryLog {
    pub fn record(&mut self, action: &str, operation_id: Option<String>, details: Option<String>) {
        if self.entries.len() == HISTORY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            action: action.to_string(),
            operation_id,
            details,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationProgress {
    pub stage: String,
    pub percentage: u8,
}

/// The operation currently being configured or synthesized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOperationContext {
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_rules: Option<String>,
    /// Id of the synthesis request whose result is awaited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
}

impl NewOperationContext {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            configuration_rules: None,
            request_id: None,
        }
    }

    pub fn id(&self) -> String {
        self.operation.id()
    }
}

/// Reviewable projection of a synthesized artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub suggestions: Vec<String>,
    pub reasoning: String,
    pub artifact: GeneratedArtifact,
}

impl LlmResponse {
    pub fn from_artifact(operation: &Operation, artifact: GeneratedArtifact) -> Self {
        let mut suggestions = Vec::new();
        if artifact.fallback {
            suggestions.push(
                "The synthesis backend gave no usable answer; this is a template stub to edit by hand"
                    .to_string(),
            );
        }
        if !artifact.notes.trim().is_empty() {
            suggestions.push(artifact.notes.trim().to_string());
        }
        if !artifact.function_name.is_empty() {
            suggestions.push(format!("Suggested function name: {}", artifact.function_name));
        }

        let reasoning = if artifact.pseudocode.trim().is_empty() {
            format!(
                "Generated {} implementation for \"{}\"",
                operation.kind, operation.name
            )
        } else {
            artifact.pseudocode.trim().to_string()
        };

        Self {
            suggestions,
            reasoning,
            artifact,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnfinishedOperation {
    /// `kind:name`
    pub id: String,
    pub context: NewOperationContext,
    pub created_at: String,
}

/// Browse sub-context for the registry views
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationsView {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<OperationKind>,
    pub page: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<String>,
    pub search_active: bool,
    pub search_query: String,
}

impl OperationsView {
    /// Names of the listed kind that match the search filter, sorted
    pub fn visible_names<'a>(&self, registry: &'a Registry) -> Vec<&'a str> {
        let Some(kind) = self.kind else {
            return Vec::new();
        };
        let needle = self.search_query.to_lowercase();
        registry
            .map(kind)
            .keys()
            .filter(|name| !self.search_active || needle.is_empty() || name.to_lowercase().contains(&needle))
            .map(String::as_str)
            .collect()
    }

    pub fn page_count(&self, registry: &Registry) -> usize {
        self.visible_names(registry).len().div_ceil(PAGE_SIZE).max(1)
    }

    /// Names shown on the current page
    pub fn page_names<'a>(&self, registry: &'a Registry) -> Vec<&'a str> {
        self.visible_names(registry)
            .into_iter()
            .skip(self.page * PAGE_SIZE)
            .take(PAGE_SIZE)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineContext {
    pub history: HistoryLog,
    pub available_actions: Vec<CommandName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_progress: Option<GenerationProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_operation: Option<NewOperationContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_response: Option<LlmResponse>,
    pub unfinished_operations: Vec<UnfinishedOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,
    pub registry: Registry,
    pub operations_view: OperationsView,
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self {
            history: HistoryLog::default(),
            available_actions: vec![CommandName::Help, CommandName::Quit],
            current_query: None,
            generation_progress: None,
            error: None,
            new_operation: None,
            llm_response: None,
            unfinished_operations: Vec::new(),
            schema: None,
            provider: None,
            registry: Registry::default(),
            operations_view: OperationsView::default(),
        }
    }
}

impl PipelineContext {
    pub fn is_unfinished(&self, id: &str) -> bool {
        self.unfinished_operations.iter().any(|u| u.id == id)
    }

    /// Record a draft for later resumption. Returns false when the id is
    /// already tracked.
    pub fn record_unfinished(&mut self, context: NewOperationContext) -> bool {
        let id = context.id();
        if self.is_unfinished(&id) {
            return false;
        }
        let context = NewOperationContext {
            request_id: None,
            ..context
        };
        self.unfinished_operations.push(UnfinishedOperation {
            id,
            context,
            created_at: chrono::Utc::now().to_rfc3339(),
        });
        true
    }

    pub fn take_unfinished(&mut self, id: &str) -> Option<UnfinishedOperation> {
        let index = self.unfinished_operations.iter().position(|u| u.id == id)?;
        Some(self.unfinished_operations.remove(index))
    }
}

/// Immutable copy handed to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub state: StateName,
    pub context: PipelineContext,
}
