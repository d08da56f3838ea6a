//! Per-connection counters.
//!
//! Counters are lock-free and may be read from any thread while the
//! connection runs. [`ConnectionStats::snapshot`] captures a consistent-enough
//! view for statistics sinks and serializes with serde.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters for one connection.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    sent: AtomicU64,
    sent_dropped: AtomicU64,
    received: AtomicU64,
    received_dropped: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    uncompressed_sent: AtomicU64,
    compressed_sent: AtomicU64,
    compressed_received: AtomicU64,
    uncompressed_received: AtomicU64,
}

macro_rules! counter {
    ($add:ident, $get:ident, $field:ident, $doc:literal) => {
        #[doc = $doc]
        #[inline]
        pub fn $add(&self, n: u64) {
            self.$field.fetch_add(n, Ordering::Relaxed);
        }

        #[doc = $doc]
        #[inline]
        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl ConnectionStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    counter!(add_sent, sent, sent, "Messages handed to the writer.");
    counter!(add_sent_dropped, sent_dropped, sent_dropped, "Messages the queue discarded.");
    counter!(add_received, received, received, "Messages delivered to the receiver.");
    counter!(
        add_received_dropped,
        received_dropped,
        received_dropped,
        "Bad packets skipped by the reader."
    );
    counter!(add_bytes_sent, bytes_sent, bytes_sent, "Bytes written to the transport.");
    counter!(
        add_bytes_received,
        bytes_received,
        bytes_received,
        "Bytes read from the transport."
    );
    counter!(
        add_uncompressed_sent,
        uncompressed_sent,
        uncompressed_sent,
        "Bytes given to the deflater."
    );
    counter!(
        add_compressed_sent,
        compressed_sent,
        compressed_sent,
        "Bytes the deflater produced."
    );
    counter!(
        add_compressed_received,
        compressed_received,
        compressed_received,
        "Bytes given to the inflater."
    );
    counter!(
        add_uncompressed_received,
        uncompressed_received,
        uncompressed_received,
        "Bytes the inflater produced."
    );

    /// Fraction of outgoing bytes saved by compression, 0.0 without deflate.
    pub fn sent_savings(&self) -> f64 {
        savings(self.uncompressed_sent(), self.compressed_sent())
    }

    /// Fraction of incoming bytes saved by compression, 0.0 without deflate.
    pub fn received_savings(&self) -> f64 {
        savings(self.uncompressed_received(), self.compressed_received())
    }

    /// Copy every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent: self.sent(),
            sent_dropped: self.sent_dropped(),
            received: self.received(),
            received_dropped: self.received_dropped(),
            bytes_sent: self.bytes_sent(),
            bytes_received: self.bytes_received(),
            uncompressed_sent: self.uncompressed_sent(),
            compressed_sent: self.compressed_sent(),
            compressed_received: self.compressed_received(),
            uncompressed_received: self.uncompressed_received(),
            sent_savings: self.sent_savings(),
            received_savings: self.received_savings(),
        }
    }
}

fn savings(uncompressed: u64, compressed: u64) -> f64 {
    if uncompressed == 0 {
        return 0.0;
    }
    1.0 - (compressed as f64 / uncompressed as f64)
}

/// Point-in-time copy of [`ConnectionStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub sent: u64,
    pub sent_dropped: u64,
    pub received: u64,
    pub received_dropped: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub uncompressed_sent: u64,
    pub compressed_sent: u64,
    pub compressed_received: u64,
    pub uncompressed_received: u64,
    pub sent_savings: f64,
    pub received_savings: f64,
}

impl StatsSnapshot {
    /// Render as JSON for statistics sinks.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
