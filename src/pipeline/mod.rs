//! Pipeline wiring and run loop
//!
//! One task owns the loop and is the only publisher on the bus. Everything
//! else (the state store, synthesis and write workers, the watcher, the
//! console) reports through the loop's inbox, so listeners always run one
//! event at a time, in arrival order.

pub mod console;
mod dispatcher;
mod input;
pub mod watcher;

pub use dispatcher::SynthesisDispatcher;
pub use input::InputHandler;
pub use watcher::SourceWatcher;

use crate::error::PipelineError;
use crate::events::{EventBus, EventEmitter, PipelineEvent, Subscription};
use crate::parser::OperationDetector;
use crate::state::{Command, StateStore};
use crate::synthesis::{ProviderSelection, Synthesizer};
use crate::writer::WriteHandler;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Work items for the run loop
#[derive(Debug)]
pub enum Inbound {
    FileChanged(PathBuf),
    Event(PipelineEvent),
    Shutdown,
}

/// Publishing seam that queues onto the run loop
#[derive(Clone)]
pub struct InboxEmitter {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl InboxEmitter {
    pub fn new(tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { tx }
    }

    fn send(&self, item: Inbound) {
        if self.tx.send(item).is_err() {
            debug!("Pipeline inbox closed, dropping item");
        }
    }

    pub fn file_changed(&self, path: PathBuf) {
        self.send(Inbound::FileChanged(path));
    }

    pub fn command(&self, command: Command) {
        self.send(Inbound::Event(PipelineEvent::command(command)));
    }

    pub fn shutdown(&self) {
        self.send(Inbound::Shutdown);
    }
}

impl EventEmitter for InboxEmitter {
    fn emit(&self, event: PipelineEvent) {
        self.send(Inbound::Event(event));
    }
}

/// Fully wired pipeline
pub struct Pipeline {
    bus: EventBus,
    store: Arc<StateStore>,
    detector: OperationDetector,
    emitter: InboxEmitter,
    input: Arc<InputHandler>,
    _dispatcher: Arc<SynthesisDispatcher>,
    rx: mpsc::UnboundedReceiver<Inbound>,
    _subscriptions: Vec<Subscription>,
}

impl Pipeline {
    /// Wire the store, synthesis dispatcher and input handler onto a new bus
    pub fn new(
        detector: OperationDetector,
        synthesizer: Synthesizer,
        writer: WriteHandler,
        selection: Option<&ProviderSelection>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = InboxEmitter::new(tx);
        let bus = EventBus::new();

        let store = StateStore::new(Arc::new(emitter.clone()));
        let mut subscriptions = vec![store.attach(&bus)];

        let dispatcher = Arc::new(SynthesisDispatcher::new(synthesizer, Arc::new(emitter.clone())));
        subscriptions.extend(dispatcher.attach(&bus));

        let operations_file = detector.config().operations_file.clone();
        let input = Arc::new(InputHandler::new(Arc::new(writer), emitter.clone(), operations_file));
        subscriptions.push(input.attach(&bus));

        if let Some(selection) = selection {
            emitter.emit(PipelineEvent::ProviderSelected {
                provider: selection.provider,
                note: selection.note.clone(),
            });
        }

        Self {
            bus,
            store,
            detector,
            emitter,
            input,
            _dispatcher: dispatcher,
            rx,
            _subscriptions: subscriptions,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn emitter(&self) -> InboxEmitter {
        self.emitter.clone()
    }

    pub fn input(&self) -> Arc<InputHandler> {
        self.input.clone()
    }

    /// Load the initial snapshot, then process the inbox until shutdown
    pub async fn run(mut self) -> Result<(), PipelineError> {
        self.detector.load(&self.emitter)?;
        info!("Pipeline running");

        while let Some(item) = self.rx.recv().await {
            match item {
                Inbound::Shutdown => {
                    info!("Pipeline shutting down");
                    break;
                }
                Inbound::FileChanged(path) => {
                    self.detector.on_file_changed(&path, &self.emitter);
                }
                Inbound::Event(event) => {
                    let delivered = self.bus.publish(&event);
                    debug!(kind = ?event.kind(), delivered, "Event published");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::state::StateName;
    use crate::synthesis::{MockLlmProvider, MockReply, ProviderId};
    use crate::test_helpers::{test_config, write_project};
    use std::sync::Mutex;
    use std::time::Duration;

    fn pipeline(root: &std::path::Path, mock: MockLlmProvider) -> Pipeline {
        let mut config = test_config(root);
        config.tooling.typecheck_command = vec![];
        let detector = OperationDetector::new(config.detector_config()).unwrap();
        let selection = ProviderSelection {
            provider: ProviderId::Cerebras,
            api_key: "k".into(),
            note: None,
        };
        Pipeline::new(
            detector,
            Synthesizer::new(Arc::new(mock)),
            WriteHandler::new(config.writer_config()),
            Some(&selection),
        )
    }

    /// Collect state names as they are published
    fn track_states(pipeline: &Pipeline) -> (Arc<Mutex<Vec<StateName>>>, Subscription) {
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = states.clone();
        let sub = pipeline.bus().subscribe(EventKind::StateChanged, move |event| {
            if let PipelineEvent::StateChanged { snapshot } = event {
                let mut states = sink.lock().unwrap();
                if states.last() != Some(&snapshot.state) {
                    states.push(snapshot.state);
                }
            }
            Ok(())
        });
        (states, sub)
    }

    #[tokio::test]
    async fn test_end_to_end_new_mutation_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_project(root);
        std::fs::create_dir_all(root.join("app")).unwrap();
        std::fs::write(
            root.join("app/page.tsx"),
            "useOpgenMutation('increment artist popularity by 10', { artistId: 'a' })\n",
        )
        .unwrap();

        let mock = MockLlmProvider::with_replies([MockReply::Content(MockLlmProvider::artifact_reply(
            "incrementArtistPopularityBy10",
        ))]);
        let pipeline = pipeline(root, mock);
        let (states, _sub) = track_states(&pipeline);
        let emitter = pipeline.emitter();
        let store = pipeline.store().clone();
        let handle = tokio::spawn(pipeline.run());

        // Drive the flow once each state is reached
        async fn wait_for(store: &StateStore, state: StateName) {
            for _ in 0..200 {
                if store.state() == state {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("state {} never reached, stuck in {}", state, store.state());
        }

        wait_for(&store, StateName::ConfiguringNewOperation).await;
        emitter.command(Command::SubmitOperationConfig {
            configuration_rules: Some("cap at 100".into()),
        });
        wait_for(&store, StateName::AwaitingFeedback).await;
        emitter.command(Command::Accept);

        let file = root.join("ops/mutations/increment-artist-popularity-by-10.ts");
        for _ in 0..200 {
            let snapshot = store.snapshot();
            let registered = snapshot.context.registry.contains(
                crate::operations::OperationKind::Mutation,
                "increment artist popularity by 10",
            );
            if registered && snapshot.state == StateName::Idle {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(file.exists());
        assert_eq!(store.state(), StateName::Idle);
        assert!(store.snapshot().context.unfinished_operations.is_empty());

        emitter.shutdown();
        handle.await.unwrap().unwrap();

        let states = states.lock().unwrap().clone();
        let review = [
            StateName::ConfiguringNewOperation,
            StateName::LlmProcessing,
            StateName::AwaitingFeedback,
        ];
        assert!(states.windows(3).any(|w| w == review), "{:?}", states);
        assert!(states.contains(&StateName::Generating));
        let history: Vec<String> = store
            .snapshot()
            .context
            .history
            .iter()
            .map(|h| h.action.clone())
            .collect();
        assert!(history.contains(&"provider_selected".to_string()));
        assert!(history.contains(&"write_completed".to_string()));
    }

    #[tokio::test]
    async fn test_synthesis_answered_after_construction() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let mut pipeline = pipeline(dir.path(), MockLlmProvider::new());
        pipeline.bus().publish(&PipelineEvent::LlmAnalysisStarted {
            request_id: 1,
            operation: crate::test_helpers::test_mutation("increment artist popularity by 10"),
            configuration_rules: None,
        });

        let answer = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(item) = pipeline.rx.recv().await {
                if let Inbound::Event(event @ PipelineEvent::LlmAnalysisComplete { .. }) = item {
                    return Some(event);
                }
            }
            None
        })
        .await
        .unwrap();
        assert!(matches!(answer, Some(PipelineEvent::LlmAnalysisComplete { request_id: 1, .. })));
    }

    #[tokio::test]
    async fn test_quit_stops_loop() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let pipeline = pipeline(dir.path(), MockLlmProvider::new());
        let emitter = pipeline.emitter();
        let handle = tokio::spawn(pipeline.run());
        emitter.command(Command::Quit);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_registry_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), MockLlmProvider::new());
        let err = pipeline.run().await.unwrap_err();
        assert_eq!(err.code(), "DETECTION_FAILED");
    }
}
