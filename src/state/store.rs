//! Shared owner of the state machine
//!
//! The lock is released before outgoing events are emitted, so a listener
//! reacting to those events can dispatch into the store again.

use super::context::{PipelineSnapshot, StateName};
use super::machine::StateMachine;
use crate::events::{EventBus, EventEmitter, PipelineEvent, Subscription};
use std::sync::{Arc, Mutex, MutexGuard};

pub struct StateStore {
    machine: Mutex<StateMachine>,
    emitter: Arc<dyn EventEmitter>,
}

impl StateStore {
    pub fn new(emitter: Arc<dyn EventEmitter>) -> Arc<Self> {
        Arc::new(Self {
            machine: Mutex::new(StateMachine::new()),
            emitter,
        })
    }

    fn lock(&self) -> MutexGuard<'_, StateMachine> {
        match self.machine.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Feed every bus event into the machine.
    ///
    /// The listener holds a weak reference, so dropping the last `Arc` to the
    /// store turns it into a no-op.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Subscription {
        let store = Arc::downgrade(self);
        bus.subscribe_all(move |event| {
            if let Some(store) = store.upgrade() {
                store.dispatch(event);
            }
            Ok(())
        })
    }

    /// Apply one event and emit whatever the machine produced
    pub fn dispatch(&self, event: &PipelineEvent) {
        let outgoing = self.lock().handle(event);
        for event in outgoing {
            self.emitter.emit(event);
        }
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.lock().snapshot()
    }

    pub fn state(&self) -> StateName {
        self.lock().state()
    }
}
