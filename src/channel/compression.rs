//! Deflate decorators.
//!
//! Both directions use a zlib stream. The deflater sync-flushes every write
//! so the peer can decode each message as soon as it arrives.

use std::io::{self, Read};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use super::WriteChannel;
use crate::stats::ConnectionStats;

/// Compressed bytes pulled from the source per read.
const INFLATE_CHUNK: usize = 4 * 1024;

/// Spare room reserved for deflate framing on top of the input length.
const DEFLATE_SLACK: usize = 64;

/// Inflates a compressed read source.
pub struct InflaterChannel<R> {
    inner: R,
    inflater: Decompress,
    input: BytesMut,
    chunk: Vec<u8>,
    eof: bool,
    stats: Arc<ConnectionStats>,
}

impl<R> InflaterChannel<R> {
    pub fn new(inner: R, stats: Arc<ConnectionStats>) -> Self {
        Self {
            inner,
            inflater: Decompress::new(true),
            input: BytesMut::new(),
            chunk: vec![0u8; INFLATE_CHUNK],
            eof: false,
            stats,
        }
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Inflate buffered input into `out`, returning the bytes produced.
    fn inflate(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let before_in = self.inflater.total_in();
        let before_out = self.inflater.total_out();
        let status = self
            .inflater
            .decompress(&self.input, out, FlushDecompress::Sync)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let consumed = (self.inflater.total_in() - before_in) as usize;
        let produced = (self.inflater.total_out() - before_out) as usize;
        self.input.advance(consumed);

        self.stats.add_compressed_received(consumed as u64);
        self.stats.add_uncompressed_received(produced as u64);

        if status == Status::StreamEnd && produced == 0 {
            // Nothing can follow the end of the zlib stream.
            self.eof = true;
        }
        Ok(produced)
    }
}

impl<R: Read> Read for InflaterChannel<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            let produced = self.inflate(out)?;
            if produced > 0 {
                return Ok(produced);
            }
            if self.eof {
                return Ok(0);
            }
            match self.inner.read(&mut self.chunk)? {
                0 => self.eof = true,
                n => self.input.extend_from_slice(&self.chunk[..n]),
            }
        }
    }
}

/// Deflates everything written through it.
///
/// Compressed bytes the inner channel cannot take yet are held back and
/// pushed out by [`WriteChannel::flush_pending`]. While any are held back,
/// new writes are refused.
pub struct DeflaterChannel<W> {
    inner: W,
    deflater: Compress,
    pending: BytesMut,
    scratch: Vec<u8>,
    stats: Arc<ConnectionStats>,
}

impl<W> DeflaterChannel<W> {
    pub fn new(inner: W, stats: Arc<ConnectionStats>) -> Self {
        Self {
            inner,
            deflater: Compress::new(Compression::default(), true),
            pending: BytesMut::new(),
            scratch: Vec::new(),
            stats,
        }
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    fn deflate(&mut self, mut input: &[u8]) -> io::Result<()> {
        loop {
            self.scratch.clear();
            self.scratch.reserve(input.len() + DEFLATE_SLACK);
            let before_in = self.deflater.total_in();
            self.deflater
                .compress_vec(input, &mut self.scratch, FlushCompress::Sync)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            let consumed = (self.deflater.total_in() - before_in) as usize;
            input = &input[consumed..];
            self.pending.extend_from_slice(&self.scratch);

            // The flush is complete once the output no longer fills the buffer.
            if input.is_empty() && self.scratch.len() < self.scratch.capacity() {
                return Ok(());
            }
        }
    }
}

impl<W: WriteChannel> WriteChannel for DeflaterChannel<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() || !self.flush_pending()? {
            return Ok(0);
        }
        self.deflate(buf)?;
        self.stats.add_uncompressed_sent(buf.len() as u64);
        self.flush_pending()?;
        Ok(buf.len())
    }

    fn interest(&mut self, on: bool) {
        self.inner.interest(on)
    }

    fn flush_pending(&mut self) -> io::Result<bool> {
        while !self.pending.is_empty() {
            let n = self.inner.write(&self.pending)?;
            if n == 0 {
                return Ok(false);
            }
            self.stats.add_compressed_sent(n as u64);
            self.pending.advance(n);
        }
        self.inner.flush_pending()
    }

    fn has_buffered(&self) -> bool {
        !self.pending.is_empty() || self.inner.has_buffered()
    }
}
