//! Wire envelopes exchanged with the VM debugger.
//!
//! Requests carry a sequence number that the VM echoes back as
//! `request_seq` in its response. Anything else the VM sends is an event:
//!
//! ```text
//! {"seq":7,"type":"request","command":"setbreakpoint","arguments":{...}}
//! {"seq":12,"type":"response","request_seq":7,"command":"setbreakpoint","success":true,"body":{...}}
//! {"seq":13,"type":"event","event":"break","body":{...}}
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::errors::CallError;

/// Sequence number correlating a request with its response.
pub type SequenceId = u64;

/// Errors raised while encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON serialization or deserialization failed.
    #[error("JSON codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A command to send to the VM.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    command: String,
    arguments: Option<Value>,
}

impl Request {
    /// Creates a request for `command` with optional arguments.
    #[must_use]
    pub fn new(command: impl Into<String>, arguments: Option<Value>) -> Self {
        Self {
            command: command.into(),
            arguments,
        }
    }

    /// Creates a request whose arguments are serialized from `arguments`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Codec`] when the arguments do not serialize.
    pub fn with_arguments<A: Serialize>(
        command: impl Into<String>,
        arguments: &A,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::new(command, Some(serde_json::to_value(arguments)?)))
    }

    /// Command name.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Command arguments, if any.
    #[must_use]
    pub const fn arguments(&self) -> Option<&Value> {
        self.arguments.as_ref()
    }

    /// Encodes the request under sequence number `seq`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Codec`] when serialization fails.
    pub fn encode(&self, seq: SequenceId) -> Result<Vec<u8>, ProtocolError> {
        let envelope = RequestEnvelope {
            seq,
            kind: String::from("request"),
            command: self.command.clone(),
            arguments: self.arguments.clone(),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }
}

/// Request as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Sequence number assigned by the multiplexer.
    pub seq: SequenceId,
    /// Always `"request"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Command name.
    pub command: String,
    /// Command arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// A message received from the VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    /// Reply to an earlier request.
    Response(Response),
    /// Unsolicited notification.
    Event(Event),
}

impl InboundMessage {
    /// Decodes one inbound payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Codec`] when the payload is not a recognised
    /// envelope.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Encodes the message; used by VM stand-ins.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Codec`] when serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Reply to a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Sequence number of the request being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_seq: Option<SequenceId>,
    /// Command being answered.
    #[serde(default)]
    pub command: String,
    /// Whether the VM carried out the command.
    #[serde(default)]
    pub success: bool,
    /// Command-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Failure description when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Whether the VM is running after the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
}

impl Response {
    /// Builds a successful reply to `request_seq`.
    #[must_use]
    pub fn success(request_seq: SequenceId, command: impl Into<String>, body: Value) -> Self {
        Self {
            request_seq: Some(request_seq),
            command: command.into(),
            success: true,
            body: Some(body),
            ..Self::default()
        }
    }

    /// Builds a failed reply to `request_seq`.
    #[must_use]
    pub fn failure(
        request_seq: SequenceId,
        command: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request_seq: Some(request_seq),
            command: command.into(),
            success: false,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Keeps successful replies and turns rejections into
    /// [`CallError::Remote`].
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Remote`] when `success` is false.
    pub fn into_result(self) -> Result<Self, CallError> {
        if self.success {
            Ok(self)
        } else {
            Err(CallError::Remote {
                message: self
                    .message
                    .unwrap_or_else(|| String::from("no message supplied")),
                command: self.command,
            })
        }
    }

    /// Decodes the body of a successful reply.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Remote`] for rejected commands and
    /// [`CallError::Protocol`] when the body does not decode as `B`.
    pub fn decode_body<B: DeserializeOwned>(self) -> Result<B, CallError> {
        let accepted = self.into_result()?;
        let body = accepted.body.unwrap_or(Value::Null);
        serde_json::from_value(body).map_err(|error| CallError::Protocol {
            command: accepted.command,
            message: error.to_string(),
        })
    }
}

/// Unsolicited message from the VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event tag such as `break` or `afterCompile`.
    pub event: String,
    /// Event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Event {
    /// Creates an event.
    #[must_use]
    pub fn new(event: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            event: event.into(),
            body,
        }
    }
}
