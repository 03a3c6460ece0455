//! Runs synthesis requests off the run loop

use crate::error::PipelineError;
use crate::events::{EventBus, EventEmitter, EventKind, PipelineEvent, Subscription};
use crate::operations::SchemaDefinition;
use crate::synthesis::Synthesizer;
use std::sync::{Arc, RwLock};
use tracing::{debug, error};

/// Answers `LlmAnalysisStarted` with `LlmAnalysisComplete` or `LlmAnalysisFailed`.
///
/// Keeps its own copy of the latest schema so a request is synthesized
/// against whatever the detector last reported.
pub struct SynthesisDispatcher {
    synthesizer: Synthesizer,
    schema: RwLock<SchemaDefinition>,
    emitter: Arc<dyn EventEmitter>,
}

impl SynthesisDispatcher {
    pub fn new(synthesizer: Synthesizer, emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            synthesizer,
            schema: RwLock::new(SchemaDefinition::default()),
            emitter,
        }
    }

    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Vec<Subscription> {
        let mut subscriptions = Vec::new();
        for kind in [EventKind::SchemaLoaded, EventKind::SchemaUpdated] {
            let this = Arc::downgrade(self);
            subscriptions.push(bus.subscribe(kind, move |event| {
                if let Some(this) = this.upgrade() {
                    this.on_schema(event);
                }
                Ok(())
            }));
        }
        let this = Arc::downgrade(self);
        subscriptions.push(bus.subscribe(EventKind::LlmAnalysisStarted, move |event| {
            if let Some(this) = this.upgrade() {
                this.on_started(event);
            }
            Ok(())
        }));
        subscriptions
    }

    fn on_schema(&self, event: &PipelineEvent) {
        let schema = match event {
            PipelineEvent::SchemaLoaded { schema } | PipelineEvent::SchemaUpdated { schema, .. } => schema,
            _ => return,
        };
        match self.schema.write() {
            Ok(mut guard) => *guard = schema.clone(),
            Err(poisoned) => *poisoned.into_inner() = schema.clone(),
        }
    }

    fn current_schema(&self) -> SchemaDefinition {
        match self.schema.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn on_started(&self, event: &PipelineEvent) {
        let PipelineEvent::LlmAnalysisStarted {
            request_id,
            operation,
            configuration_rules,
        } = event
        else {
            return;
        };
        let request_id = *request_id;
        let operation = operation.clone();
        let rules = configuration_rules.clone();
        let schema = self.current_schema();
        let synthesizer = self.synthesizer.clone();
        let emitter = self.emitter.clone();

        debug!(request_id, operation = %operation.id(), "Dispatching synthesis");
        let task = {
            let operation = operation.clone();
            tokio::spawn(async move { synthesizer.synthesize(&operation, &schema, rules.as_deref()).await })
        };

        // A second task so a panicking synthesis still produces an answer.
        tokio::spawn(async move {
            let outcome = match task.await {
                Ok(result) => result,
                Err(e) => {
                    error!(request_id, error = %e, "Synthesis task aborted");
                    Err(PipelineError::SynthesisUnavailable {
                        operation: operation.name.clone(),
                        reason: e.to_string(),
                    })
                }
            };
            let event = match outcome {
                Ok(artifact) => PipelineEvent::LlmAnalysisComplete {
                    request_id,
                    operation,
                    artifact,
                },
                Err(e) => PipelineEvent::LlmAnalysisFailed {
                    request_id,
                    operation_name: operation.name.clone(),
                    error: e.to_info(),
                },
            };
            emitter.emit(event);
        });
    }
}
