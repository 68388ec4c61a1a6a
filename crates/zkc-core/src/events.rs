//! # Event Bus
//!
//! Observer registration for engine lifecycle events. Components emit
//! [`Event`]s through a shared [`EventBus`]; observers subscribe and
//! receive every event synchronously on the emitting task.
//!
//! A listener's own failure is never propagated back into the emitting
//! operation: a panicking listener is dropped from the set and logged.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::proof::{CompositionStrategy, ProofSystem};

// ---------------------------------------------------------------------------
// Event taxonomy
// ---------------------------------------------------------------------------

/// Why a fallback executor switched away from a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchReason {
    /// The provider reported a failure.
    ProviderFailure,
    /// The circuit breaker for the provider is open.
    CircuitOpen,
    /// The provider call exceeded its deadline.
    Timeout,
}

/// Engine lifecycle events, named `component:event` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    // Composition engine
    CompositionStarted {
        composition_id: Uuid,
        strategy: CompositionStrategy,
        proof_count: usize,
    },
    CompositionProgress {
        composition_id: Uuid,
        completed: usize,
        total: usize,
    },
    CompositionCompleted {
        composition_id: Uuid,
        success: bool,
        time_ms: u64,
    },
    CompositionFailed {
        composition_id: Uuid,
        error: String,
    },

    // Circuit breaker
    CircuitOpened {
        system: ProofSystem,
        failure_count: u32,
    },
    CircuitHalfOpen {
        system: ProofSystem,
    },
    CircuitClosed {
        system: ProofSystem,
    },

    // Fallback executor
    FallbackStarted {
        request_id: Uuid,
        primary: ProofSystem,
    },
    FallbackProviderFailed {
        request_id: Uuid,
        system: ProofSystem,
        error: String,
    },
    FallbackProviderSwitched {
        request_id: Uuid,
        from: ProofSystem,
        to: ProofSystem,
        reason: SwitchReason,
    },
    FallbackSucceeded {
        request_id: Uuid,
        system: ProofSystem,
        attempts: u32,
    },
    FallbackExhausted {
        request_id: Uuid,
        attempts: u32,
    },

    // Parallel executor
    TaskStarted {
        task_id: Uuid,
        node_id: String,
        worker_id: usize,
    },
    TaskCompleted {
        task_id: Uuid,
        node_id: String,
        success: bool,
    },
    AllTasksCompleted {
        total: usize,
        failed: usize,
        max_parallelism: usize,
    },
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

struct BusInner {
    listeners: Mutex<HashMap<u64, Listener>>,
    next_id: AtomicU64,
}

/// Shared observer registry. Cheap to clone; all clones deliver to the
/// same listener set.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a listener. Dropping the returned [`Subscription`] (or
    /// calling [`Subscription::unsubscribe`]) removes it.
    pub fn subscribe(&self, listener: impl Fn(&Event) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(id, Arc::new(listener));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every registered listener.
    ///
    /// A panicking listener is removed from the set; the panic does not
    /// reach the emitter.
    pub fn emit(&self, event: &Event) {
        let snapshot: Vec<(u64, Listener)> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(id, l)| (*id, Arc::clone(l)))
            .collect();

        for (id, listener) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!(listener_id = id, "event listener panicked, removing it");
                self.inner.listeners.lock().remove(&id);
            }
        }
    }

    /// Drop every listener. Used by component `dispose`.
    pub fn clear(&self) {
        self.inner.listeners.lock().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

/// Handle returned by [`EventBus::subscribe`]; unsubscribes on drop.
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Remove the listener now instead of at drop time.
    pub fn unsubscribe(self) {
        // Drop impl does the removal.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.listeners.lock().remove(&self.id);
        }
    }
}
