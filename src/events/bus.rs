//! Synchronous publish/subscribe bus
//!
//! `publish` invokes every listener registered at call time, in subscription
//! order, on the caller's thread. A listener that fails or panics is logged and
//! skipped; delivery continues with the next one.

use super::{EventEmitter, EventKind, PipelineEvent};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, error, warn};

type Listener = Arc<dyn Fn(&PipelineEvent) -> anyhow::Result<()> + Send + Sync>;

struct ListenerEntry {
    id: u64,
    /// `None` receives every event
    filter: Option<EventKind>,
    listener: Listener,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    listeners: RwLock<Vec<ListenerEntry>>,
}

impl BusInner {
    fn remove(&self, id: u64) -> bool {
        let mut listeners = match self.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        listeners.len() != before
    }
}

/// Process-wide event bus. Cheap to clone; clones share listeners.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

/// Handle returned by `subscribe`; dropping it keeps the listener registered.
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Remove the listener. Returns false if it was already removed or the
    /// bus is gone.
    pub fn unsubscribe(self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => inner.remove(self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind
    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&PipelineEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(listener))
    }

    /// Register a listener for every event
    pub fn subscribe_all<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&PipelineEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(None, Arc::new(listener))
    }

    fn register(&self, filter: Option<EventKind>, listener: Listener) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = match self.inner.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.push(ListenerEntry {
            id,
            filter,
            listener,
        });
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every matching listener. Returns the number of
    /// listeners invoked, including ones that failed.
    pub fn publish(&self, event: &PipelineEvent) -> usize {
        let kind = event.kind();
        // Snapshot so listeners may subscribe, unsubscribe or publish re-entrantly.
        let targets: Vec<(u64, Listener)> = {
            let listeners = match self.inner.listeners.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            listeners
                .iter()
                .filter(|entry| entry.filter.map_or(true, |k| k == kind))
                .map(|entry| (entry.id, Arc::clone(&entry.listener)))
                .collect()
        };

        for (id, listener) in &targets {
            match catch_unwind(AssertUnwindSafe(|| (listener.as_ref())(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(listener = id, kind = ?kind, error = %e, "Event listener failed");
                }
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(listener = id, kind = ?kind, %message, "Event listener panicked");
                }
            }
        }

        debug!(kind = ?kind, listeners = targets.len(), "Event published");
        targets.len()
    }

    /// Number of listeners that would receive an event of `kind`
    pub fn listener_count(&self, kind: EventKind) -> usize {
        let listeners = match self.inner.listeners.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners
            .iter()
            .filter(|entry| entry.filter.map_or(true, |k| k == kind))
            .count()
    }
}

impl EventEmitter for EventBus {
    fn emit(&self, event: PipelineEvent) {
        self.publish(&event);
    }
}
