//! Incoming message reconstruction.
//!
//! [`MessageReader`] is called whenever its source may have data. It reads
//! until the source would block, hands every complete message to its
//! [`MessageReceiver`] and keeps partial headers and payloads for the next
//! call.
//!
//! # Error handling
//!
//! - Malformed message: skipped, counted as `received_dropped`
//! - Bad length field: `Framing`, after earlier messages were delivered
//! - End of stream mid-message: `Io(UnexpectedEof)`
//! - End of stream between messages: `Io(UnexpectedEof)` on the call after
//!   the last message was delivered

use std::io::{self, Read};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{GnutellaError, Result};
use crate::protocol::{FrameBuffer, Message, DEFAULT_MAX_PAYLOAD_LENGTH};
use crate::stats::ConnectionStats;

/// Default read chunk size.
const DEFAULT_READ_CHUNK: usize = 8 * 1024;

/// Consumer of incoming messages.
pub trait MessageReceiver {
    /// A complete, valid message arrived.
    fn process_message(&mut self, message: Message);

    /// The reader shut down. Called once.
    fn messaging_closed(&mut self) {}
}

impl<F: FnMut(Message)> MessageReceiver for F {
    fn process_message(&mut self, message: Message) {
        self(message)
    }
}

/// Collects messages into a vector.
#[derive(Debug, Default)]
pub struct CollectingReceiver {
    pub messages: Vec<Message>,
    pub closed: usize,
}

impl MessageReceiver for CollectingReceiver {
    fn process_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    fn messaging_closed(&mut self) {
        self.closed += 1;
    }
}

/// Limits applied to incoming messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderLimits {
    pub max_payload_length: u32,
    /// Hop limit for non-reply messages. `None` leaves TTL and hops as received.
    pub soft_max_hops: Option<u8>,
    pub read_chunk: usize,
}

impl Default for ReaderLimits {
    fn default() -> Self {
        Self {
            max_payload_length: DEFAULT_MAX_PAYLOAD_LENGTH,
            soft_max_hops: None,
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }
}

/// Turns a non-blocking byte source into messages.
pub struct MessageReader<R, C> {
    source: Option<R>,
    had_source: bool,
    receiver: C,
    frames: FrameBuffer,
    chunk: Vec<u8>,
    limits: ReaderLimits,
    stats: Arc<ConnectionStats>,
    eof: bool,
    shutdown: bool,
}

impl<R: Read, C: MessageReceiver> MessageReader<R, C> {
    /// Create a reader. `source` may be attached later.
    pub fn new(source: Option<R>, receiver: C, limits: ReaderLimits, stats: Arc<ConnectionStats>) -> Self {
        Self {
            had_source: source.is_some(),
            source,
            receiver,
            frames: FrameBuffer::with_max_payload(limits.max_payload_length),
            chunk: vec![0u8; limits.read_chunk.max(1)],
            limits,
            stats,
            eof: false,
            shutdown: false,
        }
    }

    /// Create a reader that starts with bytes already received, such as the
    /// leftovers of the handshake.
    pub fn with_buffered(
        source: Option<R>,
        buffered: Bytes,
        receiver: C,
        limits: ReaderLimits,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        let mut reader = Self::new(source, receiver, limits, stats);
        reader.frames.extend(&buffered);
        reader
    }

    /// Read everything available and deliver the complete messages.
    pub fn handle_read(&mut self) -> Result<()> {
        if self.shutdown {
            return Err(GnutellaError::Closed);
        }

        // Buffered bytes may already hold messages.
        self.deliver()?;

        if self.eof {
            return Err(self.eof_error());
        }

        loop {
            let source = match self.source.as_mut() {
                Some(source) => source,
                None => return Ok(()),
            };
            match source.read(&mut self.chunk) {
                Ok(0) => {
                    self.eof = true;
                    return Err(self.eof_error());
                }
                Ok(n) => {
                    self.frames.extend(&self.chunk[..n]);
                    self.deliver()?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(GnutellaError::Io(e)),
            }
        }
    }

    fn deliver(&mut self) -> Result<()> {
        while let Some((header, payload)) = self.frames.next_frame()? {
            match Message::from_wire(&header, payload, self.limits.soft_max_hops) {
                Ok(message) => {
                    self.stats.add_received(1);
                    self.receiver.process_message(message);
                }
                Err(GnutellaError::BadPacket(reason)) => {
                    self.stats.add_received_dropped(1);
                    tracing::debug!("Dropping bad packet {}: {}", header.guid, reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn eof_error(&self) -> GnutellaError {
        let msg = if self.frames.has_partial() {
            "End of stream inside a message"
        } else {
            "End of stream"
        };
        GnutellaError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, msg))
    }

    /// Swap the source. Buffered partial data is kept.
    ///
    /// Clearing the source is only allowed once one was attached.
    pub fn set_read_channel(&mut self, source: Option<R>) -> Result<()> {
        if source.is_none() && !self.had_source {
            return Err(GnutellaError::Precondition(
                "Cannot clear a read channel that was never set".into(),
            ));
        }
        self.had_source |= source.is_some();
        self.source = source;
        Ok(())
    }

    /// Stop reading. Notifies the receiver once.
    pub fn shutdown(&mut self) {
        if self.shutdown {
            return;
        }
        self.shutdown = true;
        self.source = None;
        self.frames.clear();
        self.receiver.messaging_closed();
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// The current byte source, for feeding it from outside. `None` while
    /// detached or after shutdown.
    pub fn channel_mut(&mut self) -> Option<&mut R> {
        self.source.as_mut()
    }

    /// The receiver messages are delivered to.
    pub fn receiver(&self) -> &C {
        &self.receiver
    }

    /// Mutable access to the receiver, e.g. to drain what it collected.
    pub fn receiver_mut(&mut self) -> &mut C {
        &mut self.receiver
    }

    /// Bytes received but not yet turned into messages.
    pub fn buffered(&self) -> usize {
        self.frames.len()
    }
}
