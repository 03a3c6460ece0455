//! Orchestrator state: the machine, its context, commands and the shared store

mod commands;
mod context;
mod machine;
mod store;

pub use commands::{Command, CommandName, PageDirection};
pub use context::{
    GenerationProgress, HistoryEntry, HistoryLog, LlmResponse, NewOperationContext,
    OperationsView, PipelineContext, PipelineSnapshot, StateName, UnfinishedOperation,
    HISTORY_CAPACITY, PAGE_SIZE,
};
pub use machine::StateMachine;
pub use store::StateStore;
