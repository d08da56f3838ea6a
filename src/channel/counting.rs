//! Byte-counting decorators.

use std::io::{self, Read};
use std::sync::Arc;

use super::WriteChannel;
use crate::stats::ConnectionStats;

/// Counts bytes read from the wrapped source as `bytes_received`.
pub struct CountingReader<R> {
    inner: R,
    stats: Arc<ConnectionStats>,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R, stats: Arc<ConnectionStats>) -> Self {
        Self { inner, stats }
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.stats.add_bytes_received(n as u64);
        Ok(n)
    }
}

/// Counts bytes accepted by the wrapped sink as `bytes_sent`.
pub struct CountingWriteChannel<W> {
    inner: W,
    stats: Arc<ConnectionStats>,
}

impl<W> CountingWriteChannel<W> {
    pub fn new(inner: W, stats: Arc<ConnectionStats>) -> Self {
        Self { inner, stats }
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: WriteChannel> WriteChannel for CountingWriteChannel<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.stats.add_bytes_sent(n as u64);
        Ok(n)
    }

    fn interest(&mut self, on: bool) {
        self.inner.interest(on)
    }

    fn flush_pending(&mut self) -> io::Result<bool> {
        self.inner.flush_pending()
    }

    fn has_buffered(&self) -> bool {
        self.inner.has_buffered()
    }
}
