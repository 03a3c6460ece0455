//! User command entry and the commands the state machine leaves to us

use super::InboxEmitter;
use crate::events::{EventBus, EventEmitter, EventKind, PipelineEvent, Subscription};
use crate::operations::Operation;
use crate::state::{Command, LlmResponse};
use crate::writer::WriteHandler;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

pub struct InputHandler {
    writer: Arc<WriteHandler>,
    emitter: InboxEmitter,
    /// Re-detected after every write so the registry picks up the new entry
    operations_file: PathBuf,
}

impl InputHandler {
    pub fn new(writer: Arc<WriteHandler>, emitter: InboxEmitter, operations_file: PathBuf) -> Self {
        Self {
            writer,
            emitter,
            operations_file,
        }
    }

    /// Parse one line of user input and queue it as a command
    pub fn submit_line(&self, line: &str) -> anyhow::Result<Command> {
        let command = Command::parse_line(line)?;
        self.emitter.command(command.clone());
        Ok(command)
    }

    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Subscription {
        let this = Arc::downgrade(self);
        bus.subscribe(EventKind::Command, move |event| {
            if let (Some(this), PipelineEvent::Command { command }) = (this.upgrade(), event) {
                this.on_command(command);
            }
            Ok(())
        })
    }

    fn on_command(&self, command: &Command) {
        match command {
            Command::Quit => {
                info!("Quit requested");
                self.emitter.shutdown();
            }
            Command::WriteOperationToFile {
                operation,
                llm_response,
            } => self.spawn_write(operation.clone(), llm_response.clone()),
            _ => {}
        }
    }

    fn spawn_write(&self, operation: Operation, response: LlmResponse) {
        let writer = self.writer.clone();
        let emitter = self.emitter.clone();
        let operations_file = self.operations_file.clone();

        emitter.emit(PipelineEvent::WriteStarted {
            operation_id: operation.id(),
        });
        tokio::spawn(async move {
            match writer.write_operation(&operation, &response.artifact, &emitter).await {
                Ok(report) => {
                    emitter.emit(PipelineEvent::WriteCompleted { report });
                    emitter.file_changed(operations_file);
                }
                Err(e) => {
                    error!(operation = %operation.id(), error = %e, "Write failed");
                    emitter.emit(PipelineEvent::error(e.to_info()));
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Inbound;
    use crate::state::LlmResponse;
    use crate::test_helpers::{test_artifact, test_config, test_query, write_project};
    use tokio::sync::mpsc;

    fn handler(root: &std::path::Path) -> (Arc<InputHandler>, mpsc::UnboundedReceiver<Inbound>) {
        let mut config = test_config(root);
        config.tooling.typecheck_command = vec![];
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = InputHandler::new(
            Arc::new(WriteHandler::new(config.writer_config())),
            InboxEmitter::new(tx),
            config.operations_file.clone(),
        );
        (Arc::new(handler), rx)
    }

    #[tokio::test]
    async fn test_submit_line_queues_command() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, mut rx) = handler(dir.path());

        let command = handler.submit_line("submit_operation_config only active artists").unwrap();
        assert!(matches!(command, Command::SubmitOperationConfig { .. }));
        assert!(matches!(rx.recv().await, Some(Inbound::Event(PipelineEvent::Command { .. }))));

        assert!(handler.submit_line("frobnicate").is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_quit_requests_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, mut rx) = handler(dir.path());
        let bus = EventBus::new();
        let _sub = handler.attach(&bus);

        bus.publish(&PipelineEvent::command(Command::Quit));
        assert!(matches!(rx.recv().await, Some(Inbound::Shutdown)));
    }

    #[tokio::test]
    async fn test_write_reports_and_redetects_registry() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let (handler, mut rx) = handler(dir.path());
        let bus = EventBus::new();
        let _sub = handler.attach(&bus);

        let operation = test_query("top artists");
        let response = LlmResponse::from_artifact(&operation, test_artifact("topArtists"));
        bus.publish(&PipelineEvent::command(Command::WriteOperationToFile {
            operation,
            llm_response: response,
        }));

        let mut saw_started = false;
        let mut saw_completed = false;
        while let Some(item) = rx.recv().await {
            match item {
                Inbound::Event(PipelineEvent::WriteStarted { operation_id }) => {
                    assert_eq!(operation_id, "query:top artists");
                    saw_started = true;
                }
                Inbound::Event(PipelineEvent::WriteCompleted { report }) => {
                    assert!(report.registry_updated);
                    saw_completed = true;
                }
                Inbound::FileChanged(path) => {
                    assert!(path.ends_with("ops/operations.ts"));
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_started && saw_completed);
        assert!(dir.path().join("ops/queries/top-artists.ts").exists());
    }

    #[tokio::test]
    async fn test_write_failure_becomes_error_event() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, mut rx) = handler(dir.path());
        let bus = EventBus::new();
        let _sub = handler.attach(&bus);

        let operation = test_query("top artists");
        let response = LlmResponse::from_artifact(&operation, test_artifact("topArtists"));
        bus.publish(&PipelineEvent::command(Command::WriteOperationToFile {
            operation,
            llm_response: response,
        }));

        loop {
            match rx.recv().await {
                Some(Inbound::Event(PipelineEvent::ErrorOccurred { error })) => {
                    assert_eq!(error.code.as_deref(), Some("WRITE_OPERATION_FAILED"));
                    break;
                }
                Some(_) => continue,
                None => panic!("inbox closed without an error"),
            }
        }
    }
}
