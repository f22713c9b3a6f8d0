//! Error types shared by remote calls.

use thiserror::Error;

use crate::protocol::ProtocolError;
use crate::transport::TransportError;

/// Failure delivered to a reply callback in place of a response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    /// The session closed before a reply arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// The request could not be written to the transport.
    #[error("transport failure: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// The VM answered with `success: false`.
    #[error("remote rejected {command}: {message}")]
    Remote {
        /// Command that was rejected.
        command: String,
        /// Message supplied by the VM.
        message: String,
    },

    /// The reply could not be interpreted.
    #[error("unexpected reply to {command}: {message}")]
    Protocol {
        /// Command whose reply was malformed.
        command: String,
        /// Description of the decoding failure.
        message: String,
    },

    /// No reply arrived within the blocking bound.
    #[error("no reply within {timeout_ms}ms")]
    Timeout {
        /// Bound that elapsed.
        timeout_ms: u64,
    },
}

impl CallError {
    /// Converts a send failure for `command` into the error reported to its
    /// reply callback.
    #[must_use]
    pub fn from_send(command: &str, error: &SendError) -> Self {
        match error {
            SendError::Closed => Self::ConnectionClosed,
            SendError::Codec(cause) => Self::Protocol {
                command: command.to_owned(),
                message: cause.to_string(),
            },
            SendError::Transport(cause) => Self::Transport {
                message: cause.to_string(),
            },
        }
    }
}

/// Errors raised synchronously when a request cannot be issued.
#[derive(Debug, Error)]
pub enum SendError {
    /// The multiplexer has been shut down.
    #[error("session is closed")]
    Closed,

    /// The request could not be encoded.
    #[error("failed to encode request: {0}")]
    Codec(#[from] ProtocolError),

    /// The transport refused the request.
    #[error("transport rejected request: {0}")]
    Transport(#[from] TransportError),
}
