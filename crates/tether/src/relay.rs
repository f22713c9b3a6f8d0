//! Completion obligations for callback-driven operations.
//!
//! Every asynchronous operation in the crate takes a [`Relay`]: the caller's
//! completion notification, owed exactly once. The operation either fires it
//! itself or hands it on to the next step, and returns a [`RelayOk`] as proof
//! that it accepted the obligation.
//!
//! A [`Guard`] covers the hop between two steps. It holds the owed relay
//! while a sub-call is in flight. If the sub-call's reply handler hands the
//! relay on ([`Guard::discharge`]) the guard stays silent; otherwise the
//! sub-call's completion fires the relay. A relay that is dropped without
//! being completed fires on drop, so a panic or an early return anywhere in
//! a chain still produces exactly one notification.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::{error, warn};

/// Log target for relay bookkeeping.
const RELAY_TARGET: &str = "tether::relay";

type CompletionFn = Box<dyn FnOnce(Option<CallbackFailure>) + Send>;

/// A panic captured while running a user callback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("callback failed: {message}")]
pub struct CallbackFailure {
    message: String,
}

impl CallbackFailure {
    /// Builds a failure with the supplied description.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Description of what went wrong.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|text| (*text).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| String::from("non-string panic payload"));
        Self { message }
    }
}

/// Runs `callback`, turning a panic into a [`CallbackFailure`].
pub(crate) fn run_guarded<F>(callback: F) -> Option<CallbackFailure>
where
    F: FnOnce(),
{
    panic::catch_unwind(AssertUnwindSafe(callback))
        .err()
        .map(|payload| CallbackFailure::from_panic(payload.as_ref()))
}

/// Proof that an operation accepted a [`Relay`] and will fire it.
///
/// Values are only minted by the crate: completing a relay, or handing one
/// to an operation that took ownership of it.
#[must_use = "return the proof to the caller that handed over the relay"]
#[derive(Debug)]
pub struct RelayOk {
    _accepted: (),
}

impl RelayOk {
    pub(crate) const fn accepted() -> Self {
        Self { _accepted: () }
    }
}

/// A completion notification owed to a caller.
#[must_use = "dropping a relay fires its completion as abandoned"]
pub struct Relay {
    completion: Option<CompletionFn>,
}

impl Relay {
    /// Wraps a completion callback. The argument carries the panic raised by
    /// the operation's result callback, if any.
    pub fn new<F>(completion: F) -> Self
    where
        F: FnOnce(Option<CallbackFailure>) + Send + 'static,
    {
        Self {
            completion: Some(Box::new(completion)),
        }
    }

    /// A relay nobody waits on.
    pub const fn detached() -> Self {
        Self { completion: None }
    }

    /// Fires the completion with no failure.
    pub fn finish(self) -> RelayOk {
        self.fire(None);
        RelayOk::accepted()
    }

    /// Fires the completion, reporting `failure`.
    pub fn fail(self, failure: CallbackFailure) -> RelayOk {
        self.fire(Some(failure));
        RelayOk::accepted()
    }

    /// Fires the completion with an optional failure.
    pub fn complete(self, failure: Option<CallbackFailure>) -> RelayOk {
        self.fire(failure);
        RelayOk::accepted()
    }

    pub(crate) fn fire(mut self, failure: Option<CallbackFailure>) {
        if let Some(completion) = self.completion.take() {
            invoke_completion(completion, failure);
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            warn!(
                target: RELAY_TARGET,
                "completion dropped without being fired, firing as abandoned"
            );
            invoke_completion(
                completion,
                Some(CallbackFailure::new("operation abandoned before completing")),
            );
        }
    }
}

impl fmt::Debug for Relay {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Relay")
            .field("owed", &self.completion.is_some())
            .finish()
    }
}

fn invoke_completion(completion: CompletionFn, failure: Option<CallbackFailure>) {
    if let Some(panic) = run_guarded(move || completion(failure)) {
        error!(
            target: RELAY_TARGET,
            error = %panic,
            "completion callback panicked"
        );
    }
}

/// Holds an owed [`Relay`] across one sub-call.
///
/// Create the guard, pass [`Guard::completion`] to the sub-call and move the
/// guard into the sub-call's reply handler. The handler either calls
/// [`Guard::discharge`] to hand the relay to the next step, or does nothing;
/// in the latter case the sub-call's completion fires the relay. If the
/// sub-call is never issued the relay fires when the last handle drops.
pub struct Guard {
    slot: Arc<Mutex<Option<Relay>>>,
}

impl Guard {
    /// Guards `relay`.
    #[must_use]
    pub fn new(relay: Relay) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(relay))),
        }
    }

    /// Completion to hand to the guarded sub-call. It fires the guarded relay
    /// unless responsibility was discharged first.
    pub fn completion(&self) -> Relay {
        let slot = Arc::clone(&self.slot);
        Relay::new(move |failure| {
            if let Some(owed) = take_owed(&slot) {
                owed.fire(failure);
            }
        })
    }

    /// Hands the guarded relay to `next`, returning its proof of acceptance.
    /// Returns `None` when the relay has already fired.
    pub fn discharge<F>(&self, next: F) -> Option<RelayOk>
    where
        F: FnOnce(Relay) -> RelayOk,
    {
        take_owed(&self.slot).map(next)
    }

    /// Whether the guarded relay is still owed.
    #[must_use]
    pub fn is_owed(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

fn take_owed(slot: &Mutex<Option<Relay>>) -> Option<Relay> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}
