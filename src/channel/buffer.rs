//! In-memory channels used to bridge the message layer and an async transport.

use std::io::{self, Read};

use bytes::{Buf, Bytes, BytesMut};

use super::WriteChannel;

/// Read source fed from the outside.
///
/// Reading an empty channel yields `WouldBlock` until [`feed_eof`] is
/// called, after which it yields `Ok(0)`.
///
/// [`feed_eof`]: BufferChannel::feed_eof
#[derive(Debug, Default)]
pub struct BufferChannel {
    buffer: BytesMut,
    eof: bool,
}

impl BufferChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel pre-loaded with `data`.
    pub fn with_data(data: &[u8]) -> Self {
        let mut channel = Self::new();
        channel.feed(data);
        channel
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Mark the end of the stream. Already fed bytes can still be read.
    pub fn feed_eof(&mut self) {
        self.eof = true;
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Read for BufferChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.buffer.is_empty() {
            if self.eof {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.buffer.len());
        buf[..n].copy_from_slice(&self.buffer[..n]);
        self.buffer.advance(n);
        Ok(n)
    }
}

/// Bounded write sink drained from the outside.
#[derive(Debug)]
pub struct BufferSink {
    buffer: BytesMut,
    capacity: usize,
    interested: bool,
}

impl BufferSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity.min(64 * 1024)),
            capacity,
            interested: false,
        }
    }

    /// Remove and return everything written so far.
    pub fn take(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Last interest the writer signalled.
    pub fn is_interested(&self) -> bool {
        self.interested
    }
}

impl WriteChannel for BufferSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.capacity.saturating_sub(self.buffer.len());
        let n = room.min(buf.len());
        self.buffer.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn interest(&mut self, on: bool) {
        self.interested = on;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_channel_would_block_then_eof() {
        let mut channel = BufferChannel::with_data(b"xy");
        let mut buf = [0u8; 1];

        assert_eq!(channel.read(&mut buf).unwrap(), 1);
        assert_eq!(channel.read(&mut buf).unwrap(), 1);
        assert_eq!(
            channel.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );

        channel.feed_eof();
        assert_eq!(channel.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_buffer_sink_capacity() {
        let mut sink = BufferSink::new(5);
        assert_eq!(sink.write(b"abc").unwrap(), 3);
        assert_eq!(sink.write(b"defg").unwrap(), 2);
        assert_eq!(sink.write(b"h").unwrap(), 0);
        assert_eq!(&sink.take()[..], b"abcde");
        assert_eq!(sink.write(b"h").unwrap(), 1);
    }

    #[test]
    fn test_buffer_sink_interest() {
        let mut sink = BufferSink::new(5);
        assert!(!sink.is_interested());
        sink.interest(true);
        assert!(sink.is_interested());
    }
}
