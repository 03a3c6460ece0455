//! Event system connecting the pipeline components
//!
//! This module provides:
//! - `PipelineEvent` — typed events for detection, synthesis, writes and commands
//! - `EventBus` — synchronous in-process publish/subscribe with per-listener isolation
//! - `EventEmitter` — the publishing seam handed to producers

mod bus;
mod types;

pub use bus::{EventBus, Subscription};
pub use types::{EventEmitter, EventKind, PipelineEvent};
