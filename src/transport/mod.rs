//! Transport helpers.
//!
//! A listening servent reads the first word of every inbound connection to
//! route it; Gnutella connections start with `"GNUTELLA "`. What follows is
//! the rest of the connect line, which [`Connection::incoming`] expects.
//!
//! [`Connection::incoming`]: crate::Connection::incoming

mod tcp;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{GnutellaError, Result};
use crate::handshake::GNUTELLA_CONNECT_PREFIX;

pub use tcp::{connect, GnutellaListener};

/// Read and check the leading `"GNUTELLA "` of an inbound connection.
pub async fn consume_connect_word<T: AsyncRead + Unpin>(io: &mut T) -> Result<()> {
    let expected = GNUTELLA_CONNECT_PREFIX.as_bytes();
    let mut word = vec![0u8; expected.len()];
    io.read_exact(&mut word).await.map_err(|e| {
        GnutellaError::BadHandshake(format!("Could not read connect word: {}", e))
    })?;
    if word != expected {
        return Err(GnutellaError::BadHandshake(format!(
            "Not a Gnutella connection: {:?}",
            String::from_utf8_lossy(&word)
        )));
    }
    Ok(())
}
