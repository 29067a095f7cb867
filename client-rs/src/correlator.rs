//! Call/response on top of the multiplexed bus
//!
//! The bus has no request ids. A caller registers a fire-once listener for
//! the response event (optionally matching an echoed request field) and,
//! usually, a second one on the generic `Error` event. The first of them to
//! fire removes both registrations and then runs the callback.

use crate::client::PulseClient;
use crate::dispatcher::Handler;
use crate::error::{PulseError, Result};
use crate::messages::{Envelope, Event, ERROR_EVENT};

use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::trace;

/// What a call waits for
#[derive(Debug, Clone, PartialEq)]
pub struct Expect {
    event: String,
    key: Option<(String, Value)>,
    race_error: bool,
}

impl Expect {
    /// Resolve on the first `name` event
    pub fn event(name: impl Into<String>) -> Self {
        Self {
            event: name.into(),
            key: None,
            race_error: false,
        }
    }

    /// Only resolve for responses whose `field` equals `value`
    pub fn keyed(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.key = Some((field.into(), value.into()));
        self
    }

    /// Also resolve (as a failure) on the generic `Error` event
    pub fn or_error(mut self) -> Self {
        self.race_error = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.event
    }

    fn matches(&self, event: &Event) -> bool {
        match &self.key {
            Some((field, value)) => event.get(field) == Some(value),
            None => true,
        }
    }
}

/// How a race was settled
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Event),
    Failure(Event),
}

/// Holds the removal of a listener's registrations and runs it once
struct Latch {
    removal: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Latch {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            removal: Mutex::new(None),
        })
    }

    fn arm(&self, removal: Box<dyn FnOnce() + Send>) {
        *self.removal.lock() = Some(removal);
    }

    /// Run the removal. Only the first caller gets true.
    fn trip(&self) -> bool {
        let removal = self.removal.lock().take();
        match removal {
            Some(removal) => {
                removal();
                true
            }
            None => false,
        }
    }

    fn is_tripped(&self) -> bool {
        self.removal.lock().is_none()
    }
}

/// Handle to an outstanding fire-once listener
#[derive(Clone)]
pub struct Pending {
    latch: Arc<Latch>,
}

impl Pending {
    /// Unregister without invoking the callback. False if already settled.
    pub fn cancel(&self) -> bool {
        self.latch.trip()
    }

    pub fn is_settled(&self) -> bool {
        self.latch.is_tripped()
    }
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl PulseClient {
    /// Register `f` for the next `event` only. The listener unregisters
    /// itself before `f` runs, so a repeated delivery is never seen.
    pub fn once<F>(&self, event: &str, f: F) -> Pending
    where
        F: FnOnce(&Event) + Send + 'static,
    {
        let latch = Latch::new();
        let callback = Mutex::new(Some(f));

        let handler = Handler::new({
            let latch = latch.clone();
            move |event: &Event| {
                if latch.trip() {
                    let f = callback.lock().take();
                    if let Some(f) = f {
                        f(event);
                    }
                }
            }
        });

        let registry = Arc::downgrade(&self.inner.registry);
        let name = event.to_string();
        let registered = handler.clone();
        latch.arm(Box::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.off(&name, &registered);
            }
        }));

        self.inner.registry.on(event, handler);
        Pending { latch }
    }

    /// Race the expected response against `Error` (when `expect.or_error()`).
    /// Whichever arrives first settles the race: both registrations are
    /// removed, then `f` runs exactly once.
    pub fn race<F>(&self, expect: Expect, f: F) -> Pending
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let latch = Latch::new();
        let callback = Mutex::new(Some(f));

        let settle: Arc<dyn Fn(Outcome) + Send + Sync> = Arc::new({
            let latch = latch.clone();
            move |outcome: Outcome| {
                if latch.trip() {
                    let f = callback.lock().take();
                    if let Some(f) = f {
                        f(outcome);
                    }
                }
            }
        });

        let success = Handler::new({
            let settle = settle.clone();
            let expect = expect.clone();
            move |event: &Event| {
                if expect.matches(event) {
                    settle(Outcome::Success(event.clone()));
                } else {
                    trace!(event = event.name(), "Response for another request, ignoring");
                }
            }
        });

        let failure = expect.race_error.then(|| {
            Handler::new(move |event: &Event| settle(Outcome::Failure(event.clone())))
        });

        let registry = Arc::downgrade(&self.inner.registry);
        let success_event = expect.event.clone();
        let (registered_success, registered_failure) = (success.clone(), failure.clone());
        latch.arm(Box::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.off(&success_event, &registered_success);
                if let Some(failure) = &registered_failure {
                    registry.off(ERROR_EVENT, failure);
                }
            }
        }));

        self.inner.registry.on(&expect.event, success);
        if let Some(failure) = failure {
            self.inner.registry.on(ERROR_EVENT, failure);
        }
        Pending { latch }
    }

    /// Send `request` and wait for the response described by `expect`,
    /// bounded by the configured operation timeout.
    ///
    /// A timeout unregisters the listeners. An `Error` event (with
    /// `Expect::or_error`) becomes `PulseError::Server`.
    pub async fn call(&self, request: Envelope, expect: Expect) -> Result<Event> {
        let (tx, rx) = oneshot::channel();
        let pending = self.race(expect, move |outcome| {
            let _ = tx.send(outcome);
        });

        if let Err(e) = self.send(request) {
            pending.cancel();
            return Err(e);
        }

        match timeout(self.config().operation_timeout, rx).await {
            Ok(Ok(Outcome::Success(event))) => Ok(event),
            Ok(Ok(Outcome::Failure(event))) => Err(PulseError::Server(event.message())),
            Ok(Err(_)) => Err(PulseError::Shutdown),
            Err(_) => {
                pending.cancel();
                Err(PulseError::Timeout)
            }
        }
    }
}
