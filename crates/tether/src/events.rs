//! Routing of unsolicited VM events to registered handlers.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error};

use crate::protocol::Event;
use crate::relay::run_guarded;

/// Log target for event dispatch.
const EVENTS_TARGET: &str = "tether::events";

/// Event tags emitted by the VM.
pub mod tags {
    /// Execution stopped at a breakpoint or step.
    pub const BREAK: &str = "break";
    /// Execution stopped on an exception.
    pub const EXCEPTION: &str = "exception";
    /// A script finished compiling.
    pub const AFTER_COMPILE: &str = "afterCompile";
    /// A script was garbage collected.
    pub const SCRIPT_COLLECTED: &str = "scriptCollected";
}

/// Callback invoked for every event carrying a registered tag.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handlers keyed by event tag.
#[derive(Default)]
pub struct EventRegistry {
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
}

impl EventRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events tagged `tag`. Handlers for the same tag
    /// run in registration order.
    pub fn register<F>(&self, tag: impl Into<String>, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tag.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Whether any handler is registered for `tag`.
    #[must_use]
    pub fn has_handlers(&self, tag: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tag)
            .is_some_and(|handlers| !handlers.is_empty())
    }

    /// Runs every handler registered for the event's tag and returns how many
    /// ran. A panicking handler is logged and does not stop the others.
    pub fn dispatch(&self, event: &Event) -> usize {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.event)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            debug!(target: EVENTS_TARGET, event = %event.event, "no handler for event");
            return 0;
        }
        for handler in &handlers {
            if let Some(panic) = run_guarded(|| handler(event)) {
                error!(
                    target: EVENTS_TARGET,
                    event = %event.event,
                    error = %panic,
                    "event handler panicked"
                );
            }
        }
        handlers.len()
    }
}
