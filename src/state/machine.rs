//! Orchestrator state machine
//!
//! A deterministic transition function over [`PipelineEvent`]s and
//! [`Command`]s. It owns the only [`PipelineContext`] and never performs I/O:
//! every side effect is returned as an outgoing event for the caller to
//! publish. Commands that are not valid in the current state are ignored
//! without touching state, context or history.

use super::commands::{Command, CommandName, PageDirection};
use super::context::{
    GenerationProgress, LlmResponse, NewOperationContext, PipelineContext, PipelineSnapshot,
    StateName,
};
use crate::error::ErrorInfo;
use crate::events::PipelineEvent;
use crate::operations::{Operation, OperationKind};
use tracing::{debug, info, warn};

pub struct StateMachine {
    state: StateName,
    context: PipelineContext,
    next_request_id: u64,
    /// Set by any mutation during one `handle` call
    dirty: bool,
    outbox: Vec<PipelineEvent>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: StateName::Idle,
            context: PipelineContext::default(),
            next_request_id: 1,
            dirty: false,
            outbox: Vec::new(),
        }
    }

    pub fn state(&self) -> StateName {
        self.state
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            state: self.state,
            context: self.context.clone(),
        }
    }

    /// Apply one event and return the events to publish.
    ///
    /// When anything changed, the first returned event is a `StateChanged`
    /// carrying the post-transition snapshot.
    pub fn handle(&mut self, event: &PipelineEvent) -> Vec<PipelineEvent> {
        self.dirty = false;
        self.outbox.clear();

        match event {
            PipelineEvent::StateChanged { .. } => {}
            PipelineEvent::Command { command } => self.handle_command(command),
            PipelineEvent::OperationsLoaded { kind, operations } => {
                self.context.registry.replace_kind(*kind, operations.clone());
                self.record(
                    "operations_loaded",
                    None,
                    Some(format!("{} {}", operations.len(), kind.plural())),
                );
            }
            PipelineEvent::OperationAdded { operation } => {
                self.context.registry.upsert(operation.clone());
                self.record("operation_added", Some(operation.id()), None);
            }
            PipelineEvent::OperationUpdated { operation } => {
                self.context.registry.upsert(operation.clone());
                self.record("operation_updated", Some(operation.id()), None);
            }
            PipelineEvent::OperationRemoved { kind, name, .. } => {
                if self.context.registry.remove(*kind, name).is_some() {
                    self.record(
                        "operation_removed",
                        Some(crate::operations::operation_id(*kind, name)),
                        None,
                    );
                }
            }
            PipelineEvent::NewQueryAdded { operation }
            | PipelineEvent::NewMutationAdded { operation } => self.on_new_operation(operation),
            PipelineEvent::SchemaLoaded { schema } => {
                self.context.schema = Some(schema.clone());
                self.record(
                    "schema_loaded",
                    None,
                    Some(format!("{} tables", schema.tables.len())),
                );
            }
            PipelineEvent::SchemaUpdated { schema, changes } => {
                self.context.schema = Some(schema.clone());
                let details = if changes.is_empty() {
                    "no structural changes".to_string()
                } else {
                    changes.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
                };
                self.record("schema_updated", None, Some(details));
            }
            PipelineEvent::DetectionStarted { file } => {
                if self.state == StateName::Idle {
                    self.transition(StateName::Detecting, "detection_started", None, Some(file.display().to_string()));
                }
            }
            PipelineEvent::DetectionFinished { file } => {
                if self.state == StateName::Detecting {
                    self.transition(StateName::Idle, "detection_finished", None, Some(file.display().to_string()));
                }
            }
            PipelineEvent::DetectionFailed { file, message } => {
                let details = Some(format!("{}: {}", file.display(), message));
                if self.state == StateName::Detecting {
                    self.transition(StateName::Idle, "detection_failed", None, details);
                } else {
                    self.record("detection_failed", None, details);
                }
            }
            PipelineEvent::ProviderSelected { provider, note } => {
                self.context.provider = Some(*provider);
                let details = match note {
                    Some(note) => format!("{} ({})", provider, note),
                    None => provider.to_string(),
                };
                self.record("provider_selected", None, Some(details));
            }
            PipelineEvent::LlmAnalysisStarted {
                request_id,
                operation,
                ..
            } => {
                self.record(
                    "llm_analysis_started",
                    Some(operation.id()),
                    Some(format!("request {}", request_id)),
                );
            }
            PipelineEvent::LlmAnalysisComplete {
                request_id,
                operation,
                artifact,
            } => {
                if !self.is_active_request(*request_id) {
                    self.discard_stale(*request_id, operation.id());
                    return self.finish();
                }
                self.context.llm_response = Some(LlmResponse::from_artifact(operation, artifact.clone()));
                let details = artifact.fallback.then(|| "fallback template".to_string());
                self.transition(StateName::AwaitingFeedback, "llm_analysis_complete", Some(operation.id()), details);
            }
            PipelineEvent::LlmAnalysisFailed {
                request_id,
                operation_name,
                error,
            } => {
                let operation_id = self.context.new_operation.as_ref().map(|c| c.id());
                if !self.is_active_request(*request_id) {
                    self.discard_stale(*request_id, operation_id.unwrap_or_else(|| operation_name.clone()));
                    return self.finish();
                }
                self.context.error = Some(error.clone());
                self.transition(StateName::Error, "llm_analysis_failed", operation_id, Some(error.message.clone()));
            }
            PipelineEvent::WriteStarted { operation_id } => {
                if self.state == StateName::Idle {
                    self.context.generation_progress = Some(GenerationProgress {
                        stage: "starting".into(),
                        percentage: 0,
                    });
                    self.transition(StateName::Generating, "write_started", Some(operation_id.clone()), None);
                }
            }
            PipelineEvent::WriteProgress { stage, percentage } => {
                if self.state == StateName::Generating {
                    self.context.generation_progress = Some(GenerationProgress {
                        stage: stage.clone(),
                        percentage: *percentage,
                    });
                    self.dirty = true;
                }
            }
            PipelineEvent::WriteCompleted { report } => {
                self.context.generation_progress = None;
                let details = Some(report.summary());
                if self.state == StateName::Generating {
                    self.transition(StateName::Idle, "write_completed", Some(report.operation_id.clone()), details);
                } else {
                    self.record("write_completed", Some(report.operation_id.clone()), details);
                }
            }
            PipelineEvent::ErrorOccurred { error } => self.on_error(error),
        }

        self.finish()
    }

    fn finish(&mut self) -> Vec<PipelineEvent> {
        let mut out = Vec::with_capacity(self.outbox.len() + 1);
        if self.dirty {
            out.push(PipelineEvent::StateChanged {
                snapshot: Box::new(self.snapshot()),
            });
        }
        out.append(&mut self.outbox);
        self.dirty = false;
        out
    }

    fn handle_command(&mut self, command: &Command) {
        let state = self.state;
        match command {
            // Handled by the input handler.
            Command::Help | Command::Quit | Command::WriteOperationToFile { .. } => {}

            Command::Queries | Command::Mutations if state.is_browsable() => {
                let (kind, next) = if matches!(command, Command::Queries) {
                    (OperationKind::Query, StateName::ViewingQueries)
                } else {
                    (OperationKind::Mutation, StateName::ViewingMutations)
                };
                self.context.operations_view = super::context::OperationsView {
                    kind: Some(kind),
                    ..Default::default()
                };
                self.transition(next, "view_operations", None, Some(kind.plural().to_string()));
            }
            Command::GoBack if state == StateName::ViewingOperationDetail => {
                self.context.operations_view.selected = None;
                let back = match self.context.operations_view.kind {
                    Some(OperationKind::Mutation) => StateName::ViewingMutations,
                    _ => StateName::ViewingQueries,
                };
                self.transition(back, "go_back", None, None);
            }
            Command::GoBack if matches!(state, StateName::ViewingQueries | StateName::ViewingMutations) => {
                self.context.operations_view = Default::default();
                self.transition(StateName::Idle, "go_back", None, None);
            }
            Command::NavigatePage { direction } if self.is_listing() => {
                let view = &mut self.context.operations_view;
                let pages = view.page_count(&self.context.registry);
                let page = match direction {
                    PageDirection::Next => (view.page + 1).min(pages - 1),
                    PageDirection::Prev => view.page.saturating_sub(1),
                };
                if page != view.page {
                    view.page = page;
                    self.dirty = true;
                }
            }
            Command::SelectOperation { operation_name } if self.is_listing() => {
                let kind = self.context.operations_view.kind.unwrap_or(OperationKind::Query);
                if self.context.registry.contains(kind, operation_name) {
                    self.context.operations_view.selected = Some(operation_name.clone());
                    let id = crate::operations::operation_id(kind, operation_name);
                    self.transition(StateName::ViewingOperationDetail, "select_operation", Some(id), None);
                } else {
                    debug!(%operation_name, "select_operation: not in registry");
                }
            }
            Command::ToggleSearch if self.is_listing() => {
                let view = &mut self.context.operations_view;
                view.search_active = !view.search_active;
                if !view.search_active {
                    view.search_query.clear();
                }
                view.page = 0;
                self.dirty = true;
            }
            Command::UpdateSearch { query }
                if self.is_listing() && self.context.operations_view.search_active =>
            {
                let view = &mut self.context.operations_view;
                view.search_query = query.clone();
                view.page = 0;
                self.context.current_query = Some(query.clone());
                self.dirty = true;
            }

            Command::SubmitOperationConfig {
                configuration_rules,
            } if state == StateName::ConfiguringNewOperation => {
                if let Some(draft) = self.context.new_operation.as_mut() {
                    draft.configuration_rules = configuration_rules.clone();
                    self.start_synthesis("submit_operation_config");
                }
            }
            Command::CancelOperationConfig | Command::DeferOperationConfig
                if state == StateName::ConfiguringNewOperation =>
            {
                let action = command.name().as_str();
                if let Some(draft) = self.context.new_operation.take() {
                    let id = draft.id();
                    self.context.record_unfinished(draft);
                    self.transition(StateName::Idle, action, Some(id), None);
                }
            }
            Command::ResumeUnfinished { id } if state.is_browsable() || state == StateName::Error => {
                if let Some(entry) = self.context.take_unfinished(id) {
                    if let Some(previous) = self.context.new_operation.take() {
                        self.context.record_unfinished(previous);
                    }
                    self.context.error = None;
                    self.context.llm_response = None;
                    self.context.new_operation = Some(NewOperationContext {
                        request_id: None,
                        ..entry.context
                    });
                    self.transition(StateName::ConfiguringNewOperation, "resume_unfinished", Some(entry.id), None);
                } else {
                    debug!(%id, "resume_unfinished: no such entry");
                }
            }

            Command::Modify if self.has_feedback() => {
                self.context.llm_response = None;
                let id = self.draft_id();
                self.transition(StateName::ConfiguringNewOperation, "modify", id, None);
            }
            Command::Regenerate if self.has_feedback() => {
                self.context.llm_response = None;
                self.start_synthesis("regenerate");
            }
            Command::Cancel if self.has_feedback() => {
                self.context.llm_response = None;
                let id = self.draft_id();
                if let Some(draft) = self.context.new_operation.take() {
                    self.context.record_unfinished(draft);
                }
                self.transition(StateName::Idle, "cancel", id, None);
            }
            Command::Accept if self.has_feedback() && self.context.new_operation.is_some() => {
                let (Some(draft), Some(response)) =
                    (self.context.new_operation.take(), self.context.llm_response.take())
                else {
                    return;
                };
                let id = draft.id();
                self.context.take_unfinished(&id);
                info!(operation = %id, "Operation accepted");
                self.outbox.push(PipelineEvent::command(Command::WriteOperationToFile {
                    operation: draft.operation,
                    llm_response: response,
                }));
                self.transition(StateName::Idle, "accept", Some(id), None);
            }

            Command::Retry if state == StateName::Error => {
                self.context.error = None;
                if self.context.new_operation.is_some() {
                    self.start_synthesis("retry");
                } else {
                    self.transition(StateName::Idle, "retry", None, None);
                }
            }
            Command::Cancel if state == StateName::Error => {
                self.context.error = None;
                let id = self.draft_id();
                if let Some(draft) = self.context.new_operation.take() {
                    self.context.record_unfinished(draft);
                }
                self.transition(StateName::Idle, "cancel", id, None);
            }

            other => {
                debug!(command = %other.name(), state = %state, "Command not valid in current state");
            }
        }
    }

    fn on_new_operation(&mut self, operation: &Operation) {
        let id = operation.id();
        if self.context.registry.contains(operation.kind, &operation.name) {
            return;
        }
        let is_current = self
            .context
            .new_operation
            .as_ref()
            .is_some_and(|draft| draft.id() == id);
        if is_current {
            return;
        }

        let draft = NewOperationContext::new(operation.clone());
        let newly_tracked = self.context.record_unfinished(draft.clone());

        if self.state.is_busy() {
            if newly_tracked {
                self.record("operation_queued", Some(id), None);
            }
            return;
        }

        if let Some(previous) = self.context.new_operation.take() {
            self.context.record_unfinished(previous);
        }
        self.context.error = None;
        self.context.llm_response = None;
        self.context.new_operation = Some(draft);
        let action = match operation.kind {
            OperationKind::Query => "new_query_detected",
            OperationKind::Mutation => "new_mutation_detected",
        };
        self.transition(StateName::ConfiguringNewOperation, action, Some(id), None);
    }

    fn on_error(&mut self, error: &ErrorInfo) {
        warn!(message = %error.message, "Pipeline error");
        self.context.error = Some(error.clone());
        self.context.generation_progress = None;
        match self.state {
            StateName::Generating | StateName::Detecting | StateName::Error => {
                self.transition(StateName::Idle, "error_occurred", None, Some(error.message.clone()));
            }
            _ => self.record("error_occurred", None, Some(error.message.clone())),
        }
    }

    /// Allocate a request id, enter `LlmProcessing` and queue `LlmAnalysisStarted`
    fn start_synthesis(&mut self, action: &str) {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        let Some(draft) = self.context.new_operation.as_mut() else {
            return;
        };
        draft.request_id = Some(request_id);
        let operation = draft.operation.clone();
        let configuration_rules = draft.configuration_rules.clone();
        let id = operation.id();
        self.outbox.push(PipelineEvent::LlmAnalysisStarted {
            request_id,
            operation,
            configuration_rules,
        });
        self.transition(StateName::LlmProcessing, action, Some(id), Some(format!("request {}", request_id)));
    }

    fn is_active_request(&self, request_id: u64) -> bool {
        self.state == StateName::LlmProcessing
            && self
                .context
                .new_operation
                .as_ref()
                .and_then(|draft| draft.request_id)
                == Some(request_id)
    }

    fn discard_stale(&mut self, request_id: u64, operation_id: String) {
        debug!(request_id, state = %self.state, "Discarding stale synthesis result");
        self.record(
            "stale_llm_result_discarded",
            Some(operation_id),
            Some(format!("request {}", request_id)),
        );
    }

    fn is_listing(&self) -> bool {
        matches!(self.state, StateName::ViewingQueries | StateName::ViewingMutations)
    }

    fn has_feedback(&self) -> bool {
        self.state == StateName::AwaitingFeedback && self.context.llm_response.is_some()
    }

    fn draft_id(&self) -> Option<String> {
        self.context.new_operation.as_ref().map(|d| d.id())
    }

    fn record(&mut self, action: &str, operation_id: Option<String>, details: Option<String>) {
        self.context.history.record(action, operation_id, details);
        self.dirty = true;
    }

    fn transition(
        &mut self,
        next: StateName,
        action: &str,
        operation_id: Option<String>,
        details: Option<String>,
    ) {
        if next != self.state {
            debug!(from = %self.state, to = %next, action, "State transition");
        }
        self.state = next;
        self.context.available_actions = self.actions_for(next);
        self.record(action, operation_id, details);
    }

    fn actions_for(&self, state: StateName) -> Vec<CommandName> {
        use CommandName::*;
        match state {
            StateName::Idle => {
                let mut actions = vec![Help, Quit, Queries, Mutations];
                if !self.context.unfinished_operations.is_empty() {
                    actions.push(ResumeUnfinished);
                }
                actions
            }
            StateName::Detecting | StateName::Generating => vec![Help, Quit],
            StateName::ConfiguringNewOperation => {
                vec![SubmitOperationConfig, CancelOperationConfig, DeferOperationConfig]
            }
            StateName::LlmProcessing => Vec::new(),
            StateName::AwaitingFeedback => vec![Accept, Regenerate, Modify, Cancel],
            StateName::ViewingQueries | StateName::ViewingMutations => vec![
                GoBack,
                NavigatePage,
                SelectOperation,
                ToggleSearch,
                UpdateSearch,
                Help,
                Quit,
            ],
            StateName::ViewingOperationDetail => vec![GoBack, Help, Quit],
            StateName::Error => vec![Retry, Cancel, Help],
        }
    }
}
