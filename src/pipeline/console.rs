//! Line-oriented console for the watch loop

use super::InputHandler;
use crate::events::{EventBus, EventKind, PipelineEvent, Subscription};
use crate::state::{Command, CommandName, PipelineSnapshot, StateName};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};

const PREVIEW_LINES: usize = 12;

/// Feed stdin lines into `input` until EOF
pub async fn read_stdin(input: Arc<InputHandler>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => {
                if let Err(e) = input.submit_line(&line) {
                    println!("{} (type help for commands)", e);
                }
            }
            Ok(None) => {
                tracing::debug!("stdin closed");
                break;
            }
            Err(e) => {
                tracing::warn!("Failed to read stdin: {}", e);
                break;
            }
        }
    }
}

pub fn help_text() -> String {
    let mut out = String::from("Commands:\n");
    for name in CommandName::ALL {
        if name != CommandName::WriteOperationToFile {
            let _ = writeln!(out, "  {}", name);
        }
    }
    out
}

fn preview(code: &str) -> String {
    let mut lines: Vec<&str> = code.lines().take(PREVIEW_LINES).collect();
    if code.lines().count() > PREVIEW_LINES {
        lines.push("...");
    }
    lines
        .iter()
        .map(|l| format!("    {}", l))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Human-readable view of a snapshot
pub fn render_snapshot(snapshot: &PipelineSnapshot) -> String {
    let context = &snapshot.context;
    let mut out = format!("[{}]\n", snapshot.state);

    match snapshot.state {
        StateName::ConfiguringNewOperation => {
            if let Some(draft) = &context.new_operation {
                let op = &draft.operation;
                let _ = writeln!(out, "New {} detected: \"{}\"", op.kind, op.name);
                let _ = writeln!(out, "  declared at {}:{}", op.source_file.display(), op.line_number);
                for (name, ty) in &op.parameters {
                    let _ = writeln!(out, "  param {}: {}", name, ty);
                }
                out.push_str("  submit [rules] to generate, defer or cancel_operation_config to skip\n");
            }
        }
        StateName::LlmProcessing => {
            if let Some(draft) = &context.new_operation {
                let _ = writeln!(out, "Generating \"{}\"...", draft.operation.name);
            }
        }
        StateName::AwaitingFeedback => {
            if let Some(response) = &context.llm_response {
                let artifact = &response.artifact;
                let _ = writeln!(out, "{}", response.reasoning);
                let _ = writeln!(out, "  input:\n{}", preview(&artifact.input_type));
                let _ = writeln!(out, "  function:\n{}", preview(&artifact.function));
                for suggestion in &response.suggestions {
                    let _ = writeln!(out, "  - {}", suggestion);
                }
            }
        }
        StateName::Generating => {
            if let Some(progress) = &context.generation_progress {
                let _ = writeln!(out, "Writing: {} ({}%)", progress.stage, progress.percentage);
            }
        }
        StateName::ViewingQueries | StateName::ViewingMutations => {
            let view = &context.operations_view;
            let pages = view.page_count(&context.registry);
            if view.search_active {
                let _ = writeln!(out, "search: {}", view.search_query);
            }
            for name in view.page_names(&context.registry) {
                let _ = writeln!(out, "  {}", name);
            }
            let _ = writeln!(out, "page {}/{}", view.page + 1, pages);
        }
        StateName::ViewingOperationDetail => {
            let view = &context.operations_view;
            let operation = view
                .kind
                .zip(view.selected.as_deref())
                .and_then(|(kind, name)| context.registry.get(kind, name));
            if let Some(op) = operation {
                let _ = writeln!(out, "{} \"{}\"", op.kind, op.name);
                let _ = writeln!(out, "  prompt: {}", op.prompt);
                if let Some(handler) = &op.handler {
                    let _ = writeln!(out, "  handler: {}", handler);
                }
            }
        }
        StateName::Error => {
            if let Some(error) = &context.error {
                let _ = writeln!(out, "Error: {}", error.message);
                for suggestion in &error.suggestions {
                    let _ = writeln!(out, "  - {}", suggestion);
                }
            }
        }
        StateName::Idle | StateName::Detecting => {
            if !context.unfinished_operations.is_empty() {
                out.push_str("Unfinished:\n");
                for entry in &context.unfinished_operations {
                    let _ = writeln!(out, "  {}", entry.id);
                }
            }
        }
    }

    let actions: Vec<&str> = context.available_actions.iter().map(CommandName::as_str).collect();
    let _ = write!(out, "actions: {}", actions.join(", "));
    out
}

/// Prints each snapshot whose rendering differs from the last one printed
pub struct StatePrinter {
    last: Mutex<String>,
}

impl StatePrinter {
    pub fn attach(bus: &EventBus) -> Vec<Subscription> {
        let printer = Arc::new(Self {
            last: Mutex::new(String::new()),
        });
        let on_state = {
            let printer = printer.clone();
            bus.subscribe(EventKind::StateChanged, move |event| {
                if let PipelineEvent::StateChanged { snapshot } = event {
                    if let Some(text) = printer.changed(snapshot) {
                        println!("\n{}", text);
                    }
                }
                Ok(())
            })
        };
        let on_help = bus.subscribe(EventKind::Command, |event| {
            if let PipelineEvent::Command { command: Command::Help } = event {
                println!("{}", help_text());
            }
            Ok(())
        });
        vec![on_state, on_help]
    }

    fn changed(&self, snapshot: &PipelineSnapshot) -> Option<String> {
        let text = render_snapshot(snapshot);
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *last == text {
            return None;
        }
        *last = text.clone();
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorInfo;
    use crate::state::{NewOperationContext, PipelineContext};
    use crate::test_helpers::test_mutation;

    fn snapshot(state: StateName, context: PipelineContext) -> PipelineSnapshot {
        PipelineSnapshot { state, context }
    }

    #[test]
    fn test_help_hides_internal_command() {
        let help = help_text();
        assert!(help.contains("accept"));
        assert!(!help.contains("write_operation_to_file"));
    }

    #[test]
    fn test_render_new_operation() {
        let mut context = PipelineContext::default();
        context.new_operation = Some(NewOperationContext::new(
            test_mutation("increment artist popularity by 10").with_parameter("artistId", "string"),
        ));
        let text = render_snapshot(&snapshot(StateName::ConfiguringNewOperation, context));
        assert!(text.starts_with("[configuring_new_operation]"));
        assert!(text.contains("New mutation detected: \"increment artist popularity by 10\""));
        assert!(text.contains("param artistId: string"));
    }

    #[test]
    fn test_render_error_lists_suggestions() {
        let mut context = PipelineContext::default();
        context.error = Some(ErrorInfo::new("backend unreachable", "Check your network"));
        let text = render_snapshot(&snapshot(StateName::Error, context));
        assert!(text.contains("Error: backend unreachable"));
        assert!(text.contains("- Check your network"));
    }

    #[test]
    fn test_printer_skips_identical_snapshots() {
        let printer = StatePrinter {
            last: Mutex::new(String::new()),
        };
        let idle = snapshot(StateName::Idle, PipelineContext::default());
        assert!(printer.changed(&idle).is_some());
        assert!(printer.changed(&idle).is_none());
    }
}
