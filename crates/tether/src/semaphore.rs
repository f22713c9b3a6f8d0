//! Blocking bridge from relay completions to a waiting thread.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;

use crate::relay::{CallbackFailure, Relay, RelayOk};

/// Errors raised by [`CallbackSemaphore::wait`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WaitError {
    /// No completion arrived within the bound.
    #[error("operation did not complete within {timeout_ms}ms")]
    Timeout {
        /// Bound that elapsed.
        timeout_ms: u64,
    },
    /// The completion arrived carrying a callback failure.
    #[error(transparent)]
    CallbackFailed(#[from] CallbackFailure),
}

#[derive(Default)]
struct Permits {
    released: Mutex<VecDeque<Option<CallbackFailure>>>,
    signal: Condvar,
}

/// Counts completions so a thread outside the delivery path can block on
/// them.
///
/// Each [`CallbackSemaphore::relay`] yields one permit when it fires. Each
/// successful [`CallbackSemaphore::wait`] consumes one.
#[derive(Clone, Default)]
pub struct CallbackSemaphore {
    permits: Arc<Permits>,
}

impl CallbackSemaphore {
    /// Creates a semaphore with no released permits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A relay that releases one permit when fired.
    pub fn relay(&self) -> Relay {
        let permits = Arc::clone(&self.permits);
        Relay::new(move |failure| {
            permits
                .released
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(failure);
            permits.signal.notify_all();
        })
    }

    /// Blocks until one permit is released or `timeout` elapses.
    ///
    /// The [`RelayOk`] argument ties the wait to an operation that accepted
    /// one of this semaphore's relays. Must not be called on the transport
    /// delivery thread.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Timeout`] when nothing is released in time and
    /// [`WaitError::CallbackFailed`] when the released permit carried a
    /// callback failure.
    pub fn wait(&self, accepted: RelayOk, timeout: Duration) -> Result<(), WaitError> {
        let RelayOk { .. } = accepted;
        let queue = self
            .permits
            .released
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (mut released, outcome) = self
            .permits
            .signal
            .wait_timeout_while(queue, timeout, |pending| pending.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        if outcome.timed_out() && released.is_empty() {
            return Err(WaitError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            });
        }
        match released.pop_front() {
            Some(Some(failure)) => Err(WaitError::CallbackFailed(failure)),
            Some(None) | None => Ok(()),
        }
    }
}
