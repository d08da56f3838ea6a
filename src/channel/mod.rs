//! Byte channels between the message layer and the transport.
//!
//! The read side is plain [`std::io::Read`] with non-blocking semantics:
//! `Err(WouldBlock)` means no data right now, `Ok(0)` means end of stream.
//! The write side is [`WriteChannel`], which adds write-interest signalling.
//!
//! Decorators stack on either side:
//!
//! ```text
//! transport ─► BufferChannel ─► CountingReader ─► [InflaterChannel] ─► MessageReader
//! MessageWriter ─► [DeflaterChannel] ─► CountingWriteChannel ─► BufferSink ─► transport
//! ```

use std::io::{self, Read};

mod buffer;
mod compression;
mod counting;

pub use buffer::{BufferChannel, BufferSink};
pub use compression::{DeflaterChannel, InflaterChannel};
pub use counting::{CountingReader, CountingWriteChannel};

/// Non-blocking byte sink.
pub trait WriteChannel {
    /// Write as much of `buf` as fits right now. `Ok(0)` means no room.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Whether the owner wants to be called again when there is room.
    fn interest(&mut self, _on: bool) {}

    /// Push out bytes the channel itself holds back.
    ///
    /// Returns `true` once nothing is held back any more.
    fn flush_pending(&mut self) -> io::Result<bool> {
        Ok(true)
    }

    /// Whether the channel still holds bytes it has not passed on.
    fn has_buffered(&self) -> bool {
        false
    }
}

impl<W: WriteChannel + ?Sized> WriteChannel for Box<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn interest(&mut self, on: bool) {
        (**self).interest(on)
    }

    fn flush_pending(&mut self) -> io::Result<bool> {
        (**self).flush_pending()
    }

    fn has_buffered(&self) -> bool {
        (**self).has_buffered()
    }
}

/// Read side of a connection, with or without inflation.
pub enum ReadChain {
    Plain(CountingReader<BufferChannel>),
    Inflated(InflaterChannel<CountingReader<BufferChannel>>),
}

impl ReadChain {
    /// The in-memory buffer the transport feeds.
    pub fn source_mut(&mut self) -> &mut BufferChannel {
        match self {
            ReadChain::Plain(counting) => counting.get_mut(),
            ReadChain::Inflated(inflater) => inflater.get_mut().get_mut(),
        }
    }

    pub fn is_inflated(&self) -> bool {
        matches!(self, ReadChain::Inflated(_))
    }
}

impl Read for ReadChain {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ReadChain::Plain(counting) => counting.read(buf),
            ReadChain::Inflated(inflater) => inflater.read(buf),
        }
    }
}

/// Write side of a connection, with or without deflation.
pub enum WriteChain {
    Plain(CountingWriteChannel<BufferSink>),
    Deflated(DeflaterChannel<CountingWriteChannel<BufferSink>>),
}

impl WriteChain {
    /// The in-memory buffer drained to the transport.
    pub fn sink_mut(&mut self) -> &mut BufferSink {
        match self {
            WriteChain::Plain(counting) => counting.get_mut(),
            WriteChain::Deflated(deflater) => deflater.get_mut().get_mut(),
        }
    }

    pub fn is_deflated(&self) -> bool {
        matches!(self, WriteChain::Deflated(_))
    }
}

impl WriteChannel for WriteChain {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            WriteChain::Plain(counting) => counting.write(buf),
            WriteChain::Deflated(deflater) => deflater.write(buf),
        }
    }

    fn interest(&mut self, on: bool) {
        match self {
            WriteChain::Plain(counting) => counting.interest(on),
            WriteChain::Deflated(deflater) => deflater.interest(on),
        }
    }

    fn flush_pending(&mut self) -> io::Result<bool> {
        match self {
            WriteChain::Plain(counting) => counting.flush_pending(),
            WriteChain::Deflated(deflater) => deflater.flush_pending(),
        }
    }

    fn has_buffered(&self) -> bool {
        match self {
            WriteChain::Plain(counting) => counting.has_buffered(),
            WriteChain::Deflated(deflater) => deflater.has_buffered(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::stats::ConnectionStats;

    #[test]
    fn test_read_chain_plain() {
        let stats = Arc::new(ConnectionStats::new());
        let mut chain = ReadChain::Plain(CountingReader::new(BufferChannel::new(), stats.clone()));
        chain.source_mut().feed(b"abc");

        let mut buf = [0u8; 8];
        assert_eq!(chain.read(&mut buf).unwrap(), 3);
        assert_eq!(stats.bytes_received(), 3);
        assert_eq!(
            chain.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
    }

    #[test]
    fn test_write_chain_deflate_into_read_chain_inflate() {
        let stats = Arc::new(ConnectionStats::new());
        let mut writer = WriteChain::Deflated(DeflaterChannel::new(
            CountingWriteChannel::new(BufferSink::new(4096), stats.clone()),
            stats.clone(),
        ));
        let mut reader = ReadChain::Inflated(InflaterChannel::new(
            CountingReader::new(BufferChannel::new(), stats.clone()),
            stats.clone(),
        ));

        let text = b"hello hello hello hello hello";
        assert_eq!(writer.write(text).unwrap(), text.len());
        assert!(writer.flush_pending().unwrap());

        let wire = writer.sink_mut().take();
        reader.source_mut().feed(&wire);

        let mut out = [0u8; 64];
        let n = reader.read(&mut out).unwrap();
        assert_eq!(&out[..n], text);
        assert!(writer.is_deflated() && reader.is_inflated());
        assert_eq!(stats.uncompressed_sent(), text.len() as u64);
        assert_eq!(stats.uncompressed_received(), text.len() as u64);
    }
}
