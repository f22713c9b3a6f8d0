//! Request/response correlation over a single transport.
//!
//! The [`CommandMultiplexer`] assigns every outgoing request a fresh sequence
//! number and parks its reply callback in a pending table. Inbound payloads
//! are matched back to the table by `request_seq`; everything else is routed
//! to the [`EventRegistry`]. Shutting down drains the table, delivering
//! [`CallError::ConnectionClosed`] to every caller still waiting, in
//! submission order.
//!
//! No lock is held while the transport writes or while callbacks run, so a
//! transport that answers synchronously on the calling thread is supported.

mod pending;
mod status;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use self::pending::{PendingCall, PendingCallTable};
pub use self::status::StatusListener;
use crate::errors::{CallError, SendError};
use crate::events::EventRegistry;
use crate::protocol::{InboundMessage, Request, Response, SequenceId};
use crate::relay::{Relay, RelayOk};
use crate::semaphore::{CallbackSemaphore, WaitError};
use crate::transport::{InboundSink, Transport};

/// Log target for request correlation.
pub(crate) const MULTIPLEXER_TARGET: &str = "tether::multiplexer";

/// Callback receiving the reply to one request.
pub type ReplyCallback = Box<dyn FnOnce(Result<Response, CallError>) + Send>;

/// Correlates requests with replies and routes events.
pub struct CommandMultiplexer {
    transport: Arc<dyn Transport>,
    pending: PendingCallTable,
    next_seq: AtomicU64,
    events: Arc<EventRegistry>,
    status: Option<Arc<dyn StatusListener>>,
    status_order: Mutex<()>,
}

impl CommandMultiplexer {
    /// Creates a multiplexer writing to `transport` and routing events to
    /// `events`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, events: Arc<EventRegistry>) -> Self {
        Self {
            transport,
            pending: PendingCallTable::default(),
            next_seq: AtomicU64::new(1),
            events,
            status: None,
            status_order: Mutex::new(()),
        }
    }

    /// Attaches a listener notified whenever the pending queue changes.
    #[must_use]
    pub fn with_status_listener(mut self, listener: Arc<dyn StatusListener>) -> Self {
        self.status = Some(listener);
        self
    }

    /// Registry receiving unsolicited events.
    #[must_use]
    pub const fn events(&self) -> &Arc<EventRegistry> {
        &self.events
    }

    /// Sends `request` and arranges for `on_reply` to receive its reply.
    ///
    /// `on_reply` runs exactly once: with the response, or with
    /// [`CallError::ConnectionClosed`] if the session closes first.
    /// `completion` fires exactly once, after `on_reply`.
    ///
    /// # Errors
    ///
    /// Fails synchronously when the session is closed, the request does not
    /// encode, or the transport rejects it. `on_reply` and `completion` have
    /// already run with the matching [`CallError`] when this returns.
    pub fn send<F>(
        &self,
        request: Request,
        on_reply: F,
        completion: Relay,
    ) -> Result<RelayOk, SendError>
    where
        F: FnOnce(Result<Response, CallError>) + Send + 'static,
    {
        let command = request.command().to_owned();
        let call = PendingCall {
            command: command.clone(),
            on_reply: Box::new(on_reply),
            completion,
            enqueued_at: Instant::now(),
        };
        if self.pending.is_closed() {
            return Err(Self::reject(call, SendError::Closed));
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let payload = match request.encode(seq) {
            Ok(payload) => payload,
            Err(error) => return Err(Self::reject(call, SendError::Codec(error))),
        };
        if let Some(rejected) = self.pending.insert(seq, call) {
            return Err(Self::reject(rejected, SendError::Closed));
        }
        self.report_status();

        debug!(target: MULTIPLEXER_TARGET, seq, command = %command, "sending request");
        if let Err(error) = self.transport.send_bytes(&payload) {
            warn!(
                target: MULTIPLEXER_TARGET,
                seq,
                command = %command,
                error = %error,
                "transport rejected request"
            );
            let failure = SendError::Transport(error);
            if let Some(call) = self.pending.remove(seq) {
                self.report_status();
                call.dispatch(Err(CallError::from_send(&command, &failure)));
            }
            return Err(failure);
        }
        Ok(RelayOk::accepted())
    }

    /// Sends `request` without registering interest in the reply. Any reply
    /// that arrives is logged and dropped.
    ///
    /// # Errors
    ///
    /// Same as [`CommandMultiplexer::send`].
    pub fn send_detached(&self, request: Request) -> Result<SequenceId, SendError> {
        if self.pending.is_closed() {
            return Err(SendError::Closed);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let payload = request.encode(seq)?;
        debug!(
            target: MULTIPLEXER_TARGET,
            seq,
            command = %request.command(),
            "sending request without reply"
        );
        self.transport.send_bytes(&payload)?;
        Ok(seq)
    }

    /// Sends `request` and blocks until its reply arrives or `timeout`
    /// elapses.
    ///
    /// Must not be called from a callback running on the delivery thread.
    /// On timeout the request stays pending; its reply is consumed and
    /// dropped when it eventually arrives.
    ///
    /// # Errors
    ///
    /// Returns the reply's [`CallError`], [`CallError::Timeout`] when the
    /// bound elapses, or the converted send failure.
    pub fn send_and_wait(&self, request: Request, timeout: Duration) -> Result<Response, CallError> {
        let command = request.command().to_owned();
        let semaphore = CallbackSemaphore::new();
        let outcome: Arc<Mutex<Option<Result<Response, CallError>>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&outcome);
        let accepted = self
            .send(
                request,
                move |reply| {
                    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(reply);
                },
                semaphore.relay(),
            )
            .map_err(|error| CallError::from_send(&command, &error))?;
        match semaphore.wait(accepted, timeout) {
            Ok(()) | Err(WaitError::CallbackFailed(_)) => {}
            Err(WaitError::Timeout { timeout_ms }) => {
                return Err(CallError::Timeout { timeout_ms });
            }
        }
        outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or(Err(CallError::ConnectionClosed))
    }

    /// Matches one inbound payload to a pending call or routes it as an
    /// event. Undecodable payloads and unknown sequence numbers are logged
    /// and ignored.
    pub fn accept_inbound(&self, payload: &[u8]) {
        let message = match InboundMessage::from_bytes(payload) {
            Ok(message) => message,
            Err(error) => {
                if !self.fail_malformed_reply(payload, &error.to_string()) {
                    warn!(
                        target: MULTIPLEXER_TARGET,
                        error = %error,
                        "dropping undecodable inbound payload"
                    );
                }
                return;
            }
        };
        match message {
            InboundMessage::Response(response) => self.deliver_reply(response),
            InboundMessage::Event(event) => {
                let _handled = self.events.dispatch(&event);
            }
        }
    }

    fn deliver_reply(&self, response: Response) {
        let Some(seq) = response.request_seq else {
            warn!(
                target: MULTIPLEXER_TARGET,
                command = %response.command,
                "response without request_seq ignored"
            );
            return;
        };
        let Some(call) = self.pending.remove(seq) else {
            debug!(
                target: MULTIPLEXER_TARGET,
                seq,
                command = %response.command,
                "ignoring late or duplicate reply"
            );
            return;
        };
        debug!(
            target: MULTIPLEXER_TARGET,
            seq,
            command = %call.command,
            round_trip_ms = u64::try_from(call.enqueued_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "reply received"
        );
        self.report_status();
        call.dispatch(Ok(response));
    }

    /// Fails the pending call a malformed reply answers, if its
    /// `request_seq` can still be read. Returns `false` when no call matched.
    fn fail_malformed_reply(&self, payload: &[u8], message: &str) -> bool {
        let Ok(value) = serde_json::from_slice::<Value>(payload) else {
            return false;
        };
        if value.get("type").and_then(Value::as_str) != Some("response") {
            return false;
        }
        let Some(seq) = value.get("request_seq").and_then(Value::as_u64) else {
            return false;
        };
        let Some(call) = self.pending.remove(seq) else {
            return false;
        };
        warn!(
            target: MULTIPLEXER_TARGET,
            seq,
            command = %call.command,
            error = message,
            "failing call on malformed reply"
        );
        self.report_status();
        let error = CallError::Protocol {
            command: call.command.clone(),
            message: message.to_owned(),
        };
        call.dispatch(Err(error));
        true
    }

    /// Closes the session. Every pending call receives
    /// [`CallError::ConnectionClosed`] in submission order; later sends fail
    /// with [`SendError::Closed`]. Idempotent.
    pub fn shutdown(&self) {
        let drained = self.pending.close();
        if drained.is_empty() {
            return;
        }
        debug!(
            target: MULTIPLEXER_TARGET,
            pending = drained.len(),
            "failing pending calls on shutdown"
        );
        self.report_status();
        for (_, call) in drained {
            call.dispatch(Err(CallError::ConnectionClosed));
        }
    }

    /// Whether [`CommandMultiplexer::shutdown`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pending.is_closed()
    }

    /// Number of requests awaiting replies.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn reject(call: PendingCall, error: SendError) -> SendError {
        let failure = CallError::from_send(&call.command, &error);
        call.dispatch(Err(failure));
        error
    }

    fn report_status(&self) {
        let Some(listener) = &self.status else {
            return;
        };
        let _ordered = self
            .status_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (current, queued_behind) = self.pending.snapshot();
        listener.vm_status(current.as_deref(), queued_behind);
    }
}

impl InboundSink for CommandMultiplexer {
    fn accept_inbound(&self, payload: &[u8]) {
        Self::accept_inbound(self, payload);
    }

    fn stream_ended(&self) {
        self.shutdown();
    }
}
