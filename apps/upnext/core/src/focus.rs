//! Focus-regained notifications and the auto-advance controller built on them.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use slab::Slab;
use tracing::debug;

type Handler = Arc<dyn Fn() + Send + Sync>;

/// Broadcast point for "the window became active again".
///
/// Whatever owns the window (a terminal event loop, a desktop shell) calls
/// [`FocusSignal::emit`]; interested parties hold a [`Subscription`].
#[derive(Clone, Default)]
pub struct FocusSignal {
    handlers: Arc<Mutex<Slab<Handler>>>,
}

impl FocusSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let key = self.handlers.lock().insert(Arc::new(handler));
        Subscription {
            handlers: Arc::downgrade(&self.handlers),
            key: Some(key),
        }
    }

    /// Invokes every live handler and returns how many ran.
    pub fn emit(&self) -> usize {
        // Handlers run outside the lock so they may subscribe or cancel.
        let handlers: Vec<Handler> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in &handlers {
            handler();
        }
        handlers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

/// Registration handle; the handler is removed when this is cancelled or
/// dropped.
pub struct Subscription {
    handlers: Weak<Mutex<Slab<Handler>>>,
    key: Option<usize>,
}

impl Subscription {
    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        if let Some(handlers) = self.handlers.upgrade() {
            let mut guard = handlers.lock();
            if guard.contains(key) {
                guard.remove(key);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// Something that can take one bounds-checked step forward.
///
/// Implementors must evaluate their bounds at call time against live state,
/// not a value captured when the subscription was made.
pub trait Advance: Send + Sync {
    /// Moves forward by one if not already at the last item. Returns whether a
    /// move happened (or was requested).
    fn advance(&self) -> bool;
}

/// Advances a target whenever focus comes back, while enabled.
///
/// Disabling drops the subscription entirely; enabling always installs a fresh
/// one, so at most one handler exists per controller.
pub struct AutoAdvance {
    signal: FocusSignal,
    target: Arc<dyn Advance>,
    subscription: Option<Subscription>,
}

impl AutoAdvance {
    pub fn new(signal: FocusSignal, target: Arc<dyn Advance>, enabled: bool) -> Self {
        let mut controller = Self {
            signal,
            target,
            subscription: None,
        };
        controller.set_enabled(enabled);
        controller
    }

    pub fn is_enabled(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if let Some(previous) = self.subscription.take() {
            previous.cancel();
        }
        if enabled {
            let target = Arc::clone(&self.target);
            self.subscription = Some(self.signal.subscribe(move || {
                let moved = target.advance();
                debug!(moved, "focus regained");
            }));
        }
    }
}
