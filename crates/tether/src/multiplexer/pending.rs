//! Table of requests awaiting replies.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::error;

use super::{MULTIPLEXER_TARGET, ReplyCallback};
use crate::errors::CallError;
use crate::protocol::{Response, SequenceId};
use crate::relay::{Relay, run_guarded};

/// A request that was sent and has not been answered.
pub(crate) struct PendingCall {
    pub(crate) command: String,
    pub(crate) on_reply: ReplyCallback,
    pub(crate) completion: Relay,
    pub(crate) enqueued_at: Instant,
}

impl PendingCall {
    /// Runs the reply callback, then fires the completion with any panic it
    /// raised.
    pub(crate) fn dispatch(self, outcome: Result<Response, CallError>) {
        let Self {
            command,
            on_reply,
            completion,
            ..
        } = self;
        let failure = run_guarded(move || on_reply(outcome));
        if let Some(panic) = &failure {
            error!(
                target: MULTIPLEXER_TARGET,
                command = %command,
                error = %panic,
                "reply callback panicked"
            );
        }
        completion.fire(failure);
    }
}

#[derive(Default)]
struct TableState {
    calls: BTreeMap<SequenceId, PendingCall>,
    closed: bool,
}

/// Pending calls keyed by sequence id, closable exactly once.
///
/// Sequence ids grow monotonically, so iteration order is submission order.
#[derive(Default)]
pub(crate) struct PendingCallTable {
    state: Mutex<TableState>,
}

impl PendingCallTable {
    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `call`, handing it back when the table is closed.
    ///
    /// # Panics
    ///
    /// Panics when `seq` is already registered.
    pub(crate) fn insert(&self, seq: SequenceId, call: PendingCall) -> Option<PendingCall> {
        let mut state = self.lock();
        if state.closed {
            return Some(call);
        }
        match state.calls.entry(seq) {
            Entry::Vacant(slot) => {
                slot.insert(call);
                None
            }
            Entry::Occupied(_) => panic!("sequence id {seq} registered twice"),
        }
    }

    /// Removes and returns the call for `seq`.
    pub(crate) fn remove(&self, seq: SequenceId) -> Option<PendingCall> {
        self.lock().calls.remove(&seq)
    }

    /// Closes the table and drains every call in submission order. Later
    /// calls return nothing.
    pub(crate) fn close(&self) -> Vec<(SequenceId, PendingCall)> {
        let mut state = self.lock();
        state.closed = true;
        std::mem::take(&mut state.calls).into_iter().collect()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().calls.len()
    }

    /// Oldest outstanding command and the number of calls queued behind it.
    pub(crate) fn snapshot(&self) -> (Option<String>, usize) {
        let state = self.lock();
        let current = state
            .calls
            .values()
            .next()
            .map(|call| call.command.clone());
        (current, state.calls.len().saturating_sub(1))
    }
}
