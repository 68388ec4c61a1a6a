//! # Cooperative Cancellation
//!
//! A cancelled flag plus wakeup channel, checked at well-defined
//! suspension points: between proofs and tasks, and before each retry
//! sleep. Cancellation never interrupts a single in-flight provider
//! call — it only prevents starting the next one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::Notify;

struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
    /// Tokens to propagate cancellation into (combined tokens).
    children: Mutex<Vec<Weak<CancelInner>>>,
}

impl CancelInner {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();
        let children = std::mem::take(&mut *self.children.lock());
        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel();
            }
        }
    }
}

/// Cooperative cancellation token. Clones share state.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<CancelInner>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Request cancellation. Idempotent; wakes every waiter and cascades
    /// into combined tokens.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// A token cancelled when either source is cancelled.
    pub fn combine(a: &CancellationToken, b: &CancellationToken) -> CancellationToken {
        let combined = CancellationToken::new();
        if a.is_cancelled() || b.is_cancelled() {
            combined.cancel();
            return combined;
        }
        a.inner
            .children
            .lock()
            .push(Arc::downgrade(&combined.inner));
        b.inner
            .children
            .lock()
            .push(Arc::downgrade(&combined.inner));
        // Close the race with a cancel that landed between the check and
        // the registration.
        if a.is_cancelled() || b.is_cancelled() {
            combined.cancel();
        }
        combined
    }

    /// Shorthand: `Err(Cancelled)` when the token has fired.
    pub fn check(&self) -> Result<(), crate::EngineError> {
        if self.is_cancelled() {
            Err(crate::EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}
