//! Reassembly of Gnutella messages from arbitrary byte deliveries.
//!
//! The buffer alternates between two phases: collecting a 23-byte header, then
//! collecting exactly the payload length that header declared. A declared
//! length that is negative or above the bound is a [`Framing`] error.
//!
//! Frames are taken one at a time, so a caller delivers every message that
//! completed before the bad header ahead of the error.
//!
//! [`Framing`]: crate::GnutellaError::Framing
//!
//! # Example
//!
//! ```
//! use gnutella_wire::protocol::{FrameBuffer, Message};
//!
//! let ping = Message::ping(1).to_bytes();
//! let mut buffer = FrameBuffer::new();
//!
//! buffer.extend(&ping[..10]);
//! assert!(buffer.next_frame().unwrap().is_none());
//!
//! buffer.extend(&ping[10..]);
//! let (header, payload) = buffer.next_frame().unwrap().unwrap();
//! assert_eq!(header.ttl, 1);
//! assert!(payload.is_empty());
//! ```

use bytes::{Buf, Bytes, BytesMut};

use super::wire_format::{Header, DEFAULT_MAX_PAYLOAD_LENGTH, HEADER_SIZE};
use crate::error::Result;

const INITIAL_CAPACITY: usize = 8 * 1024;

#[derive(Debug, Clone, Copy)]
enum Phase {
    Header,
    /// Header accepted; its payload is still arriving.
    Payload(Header),
}

/// Accumulates received bytes and splits them into `(Header, payload)` pairs.
pub struct FrameBuffer {
    pending: BytesMut,
    phase: Phase,
    max_payload_length: u32,
}

impl FrameBuffer {
    /// Bounded by the default payload limit.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_LENGTH)
    }

    pub fn with_max_payload(max_payload_length: u32) -> Self {
        Self {
            pending: BytesMut::with_capacity(INITIAL_CAPACITY),
            phase: Phase::Header,
            max_payload_length,
        }
    }

    /// Append received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Take the next complete frame, or `None` until more bytes arrive.
    ///
    /// A rejected header is not consumed, so the error repeats on every
    /// later call: the stream cannot be resynchronized.
    pub fn next_frame(&mut self) -> Result<Option<(Header, Bytes)>> {
        if let Phase::Header = self.phase {
            let header = match Header::decode(&self.pending) {
                Some(header) => header,
                None => return Ok(None),
            };
            header.validate_length(self.max_payload_length)?;
            self.pending.advance(HEADER_SIZE);
            self.phase = Phase::Payload(header);
        }

        let header = match self.phase {
            Phase::Payload(header) => header,
            Phase::Header => return Ok(None),
        };
        let length = header.payload_length as usize;
        if self.pending.len() < length {
            return Ok(None);
        }
        let payload = self.pending.split_to(length).freeze();
        self.phase = Phase::Header;
        Ok(Some((header, payload)))
    }

    /// Append `data` and take every frame that is now complete.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<(Header, Bytes)>> {
        self.extend(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Whether a message has been started but not finished.
    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty() || matches!(self.phase, Phase::Payload(_))
    }

    /// Bytes held that are not yet part of a returned frame.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn max_payload_length(&self) -> u32 {
        self.max_payload_length
    }

    /// Drop everything and wait for a fresh header.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.phase = Phase::Header;
    }

    #[cfg(test)]
    fn awaiting_payload(&self) -> bool {
        matches!(self.phase, Phase::Payload(_))
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
