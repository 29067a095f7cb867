//! Event handler registry
//!
//! Maps event names to ordered handler lists. Dispatch works on a snapshot of
//! the list, so handlers may register or unregister (themselves or siblings)
//! while a delivery is in progress.

use crate::messages::Event;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// A registered callback. Clones share identity; `off` removes by identity.
#[derive(Clone)]
pub struct Handler(Arc<dyn Fn(&Event) + Send + Sync>);

impl Handler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, event: &Event) {
        (self.0)(event)
    }

    /// Whether both values are the same registration target
    pub fn same(&self, other: &Handler) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0) as *const (),
            Arc::as_ptr(&other.0) as *const (),
        )
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for Handler {}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

/// Event name -> handlers, in registration order
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Mutex<HashMap<String, Vec<Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler. The same handler may be registered more than once;
    /// each registration needs its own `off`.
    pub fn on(&self, event: &str, handler: Handler) {
        self.handlers
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    /// Remove the first registration of `handler` for `event`.
    /// Returns false when there was nothing to remove.
    pub fn off(&self, event: &str, handler: &Handler) -> bool {
        let mut handlers = self.handlers.lock();
        let Some(list) = handlers.get_mut(event) else {
            return false;
        };
        let Some(pos) = list.iter().position(|h| h.same(handler)) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            handlers.remove(event);
        }
        true
    }

    /// Deliver `event` to every handler registered under `key` when the call
    /// began. Returns the number of handlers invoked.
    pub fn dispatch(&self, key: &str, event: &Event) -> usize {
        let snapshot = match self.handlers.lock().get(key) {
            Some(list) => list.clone(),
            None => {
                trace!(event = %key, "No handlers registered, dropping");
                return 0;
            }
        };

        for handler in &snapshot {
            handler.call(event);
        }
        snapshot.len()
    }

    /// Number of registrations for `event`
    pub fn count(&self, event: &str) -> usize {
        self.handlers.lock().get(event).map_or(0, Vec::len)
    }

    /// Event names with at least one registration, sorted
    pub fn events(&self) -> Vec<String> {
        let mut events: Vec<String> = self.handlers.lock().keys().cloned().collect();
        events.sort();
        events
    }

    pub fn clear(&self) {
        self.handlers.lock().clear();
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.lock();
        f.debug_map()
            .entries(handlers.iter().map(|(k, v)| (k, v.len())))
            .finish()
    }
}
