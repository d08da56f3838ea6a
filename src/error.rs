//! Error types for gnutella-wire.

use thiserror::Error;

/// Main error type for all connection operations.
#[derive(Debug, Error)]
pub enum GnutellaError {
    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A single malformed message. Recoverable: the reader skips it.
    #[error("Bad packet: {0}")]
    BadPacket(String),

    /// Length field out of bounds or stream desynchronized.
    #[error("Framing error: {0}")]
    Framing(String),

    /// Handshake ended with a status code other than 200.
    #[error("No Gnutella OK: {code} {reason}")]
    NoGnutellaOk {
        /// Status code that ended the handshake.
        code: u16,
        /// Reason phrase that came with the code.
        reason: String,
    },

    /// Malformed handshake, premature close or I/O failure while handshaking.
    #[error("Bad handshake: {0}")]
    BadHandshake(String),

    /// Receive deadline elapsed. The connection is still usable.
    #[error("Timed out")]
    Timeout,

    /// Operation attempted after the connection was closed.
    #[error("Connection closed")]
    Closed,

    /// API used in a state that does not allow it.
    #[error("Precondition failed: {0}")]
    Precondition(String),
}

impl GnutellaError {
    /// Whether the error ends the connection.
    ///
    /// Bad packets are skipped and timeouts leave the connection open;
    /// everything else is terminal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, GnutellaError::BadPacket(_) | GnutellaError::Timeout)
    }

    /// Status code carried by a rejected handshake.
    pub fn rejection_code(&self) -> Option<u16> {
        match self {
            GnutellaError::NoGnutellaOk { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type alias using GnutellaError.
pub type Result<T> = std::result::Result<T, GnutellaError>;
