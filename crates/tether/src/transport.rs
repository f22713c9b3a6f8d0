//! Byte transport with `Content-Length` framing.
//!
//! The debugger protocol frames each JSON payload with a header block:
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <payload>
//! ```
//!
//! Outbound traffic goes through the [`Transport`] trait so the multiplexer
//! can be driven by an in-process VM stand-in. Inbound traffic is pumped by
//! [`spawn_reader`], which owns the delivery thread.

use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, warn};

/// Log target for transport events.
const TRANSPORT_TARGET: &str = "tether::transport";

/// Largest frame body accepted from the peer, in bytes.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// Transport-layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during read or write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Missing Content-Length header.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// Invalid header format.
    #[error("invalid header format")]
    InvalidHeader,

    /// Content-Length exceeds [`MAX_FRAME_LENGTH`].
    #[error("frame of {length} bytes exceeds the {MAX_FRAME_LENGTH} byte limit")]
    FrameTooLarge {
        /// Length the peer announced.
        length: usize,
    },
}

/// Outbound half of a connection to the VM.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Writes one complete payload.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the payload cannot be written.
    fn send_bytes(&self, payload: &[u8]) -> Result<(), TransportError>;
}

/// Receiver of inbound payloads, driven by the delivery thread.
pub trait InboundSink: Send + Sync {
    /// Handles one inbound payload.
    fn accept_inbound(&self, payload: &[u8]);

    /// Called once when the inbound stream ends or fails.
    fn stream_ended(&self);
}

/// Writes framed payloads to any byte sink.
pub struct FramedWriter<W: Write> {
    writer: Mutex<BufWriter<W>>,
}

impl<W: Write> FramedWriter<W> {
    /// Wraps `writer`.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
        }
    }
}

impl<W: Write + Send> Transport for FramedWriter<W> {
    fn send_bytes(&self, payload: &[u8]) -> Result<(), TransportError> {
        let header = format!("Content-Length: {}\r\n\r\n", payload.len());
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(header.as_bytes())?;
        writer.write_all(payload)?;
        writer.flush()?;
        Ok(())
    }
}

/// Reads framed payloads from any byte source.
pub struct FrameReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Wraps `reader`.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Receives one payload, blocking until it is complete.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between frames.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::MissingContentLength` if no Content-Length
    /// header is found, `TransportError::InvalidHeader` if it does not parse,
    /// `TransportError::FrameTooLarge` if it exceeds [`MAX_FRAME_LENGTH`] and
    /// `TransportError::Io` if reading fails or the stream ends inside a
    /// frame.
    pub fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let Some(content_length) = self.read_headers()? else {
            return Ok(None);
        };
        if content_length > MAX_FRAME_LENGTH {
            return Err(TransportError::FrameTooLarge {
                length: content_length,
            });
        }
        let mut content = vec![0u8; content_length];
        self.reader.read_exact(&mut content)?;
        Ok(Some(content))
    }

    fn read_headers(&mut self) -> Result<Option<usize>, TransportError> {
        let mut content_length: Option<usize> = None;
        let mut saw_header = false;

        loop {
            let mut line = String::new();
            let bytes_read = self.reader.read_line(&mut line)?;
            if bytes_read == 0 {
                if saw_header {
                    return Err(TransportError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed while reading headers",
                    )));
                }
                return Ok(None);
            }
            saw_header = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            if let Some(value) = trimmed.strip_prefix("Content-Length: ") {
                content_length = Some(value.parse().map_err(|_| TransportError::InvalidHeader)?);
            }
        }

        content_length
            .map(Some)
            .ok_or(TransportError::MissingContentLength)
    }
}

/// Starts the delivery thread.
///
/// The thread hands every payload to `sink` in arrival order and calls
/// [`InboundSink::stream_ended`] exactly once when the stream ends or a
/// framing error makes it unreadable.
///
/// # Errors
///
/// Returns an I/O error when the thread cannot be spawned.
pub fn spawn_reader<R, S>(mut reader: FrameReader<R>, sink: Arc<S>) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
    S: InboundSink + ?Sized + 'static,
{
    thread::Builder::new()
        .name(String::from("tether-delivery"))
        .spawn(move || {
            loop {
                match reader.receive() {
                    Ok(Some(payload)) => sink.accept_inbound(&payload),
                    Ok(None) => {
                        debug!(target: TRANSPORT_TARGET, "inbound stream ended");
                        break;
                    }
                    Err(error) => {
                        warn!(
                            target: TRANSPORT_TARGET,
                            error = %error,
                            "inbound stream failed"
                        );
                        break;
                    }
                }
            }
            sink.stream_ended();
        })
}
