//! Wire format encoding and decoding.
//!
//! Implements the 23-byte Gnutella message header:
//! ```text
//! ┌──────────┬──────────┬─────┬──────┬──────────┐
//! │ GUID     │ Function │ TTL │ Hops │ Length   │
//! │ 16 bytes │ 1 byte   │ 1   │ 1    │ uint32 LE│
//! └──────────┴──────────┴─────┴──────┴──────────┘
//! ```
//!
//! The payload follows immediately, exactly as long as declared.

use super::guid::{Guid, GUID_SIZE};
use crate::error::{GnutellaError, Result};

/// Header size in bytes (fixed, exactly 23).
pub const HEADER_SIZE: usize = 23;

/// Default maximum payload length accepted from a peer (64 KB).
pub const DEFAULT_MAX_PAYLOAD_LENGTH: u32 = 65_536;

/// Default soft maximum for TTL + hops on non-reply messages.
pub const DEFAULT_SOFT_MAX: u8 = 3;

/// Hard maximum for TTL + hops; anything above is treated as spam.
pub const HARD_MAX: u8 = 14;

/// Function codes carried in byte 16 of the header.
pub mod function {
    /// Ping request.
    pub const PING: u8 = 0x00;
    /// Ping reply (pong).
    pub const PING_REPLY: u8 = 0x01;
    /// Query routing table reset or patch.
    pub const ROUTE_TABLE_UPDATE: u8 = 0x30;
    /// Vendor message.
    pub const VENDOR_MESSAGE: u8 = 0x31;
    /// Vendor message, stable variant.
    pub const VENDOR_MESSAGE_STABLE: u8 = 0x32;
    /// Push request.
    pub const PUSH: u8 = 0x40;
    /// Query request.
    pub const QUERY: u8 = 0x80;
    /// Query reply (query hit).
    pub const QUERY_REPLY: u8 = 0x81;

    /// Check if the function code is one this crate can frame into a message.
    #[inline]
    pub fn is_known(code: u8) -> bool {
        matches!(
            code,
            PING | PING_REPLY
                | ROUTE_TABLE_UPDATE
                | VENDOR_MESSAGE
                | VENDOR_MESSAGE_STABLE
                | PUSH
                | QUERY
                | QUERY_REPLY
        )
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message identifier.
    pub guid: Guid,
    /// Function code (see `function` module).
    pub function: u8,
    /// Remaining hops this message may travel.
    pub ttl: u8,
    /// Hops travelled so far.
    pub hops: u8,
    /// Payload length in bytes, as declared on the wire.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(guid: Guid, function: u8, ttl: u8, hops: u8, payload_length: u32) -> Self {
        Self {
            guid,
            function,
            ttl,
            hops,
            payload_length,
        }
    }

    /// Encode header to bytes (Little Endian length).
    ///
    /// # Example
    ///
    /// ```
    /// use gnutella_wire::protocol::{function, Guid, Header};
    ///
    /// let header = Header::new(Guid::from_bytes([7; 16]), function::PING, 1, 0, 0);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 23);
    /// assert_eq!(bytes[16], function::PING);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (23 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[..GUID_SIZE].copy_from_slice(self.guid.as_bytes());
        buf[16] = self.function;
        buf[17] = self.ttl;
        buf[18] = self.hops;
        buf[19..23].copy_from_slice(&self.payload_length.to_le_bytes());
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let mut guid = [0u8; GUID_SIZE];
        guid.copy_from_slice(&buf[..GUID_SIZE]);
        Some(Self {
            guid: Guid::from_bytes(guid),
            function: buf[16],
            ttl: buf[17],
            hops: buf[18],
            payload_length: u32::from_le_bytes([buf[19], buf[20], buf[21], buf[22]]),
        })
    }

    /// The declared length read as a signed 32-bit value.
    #[inline]
    pub fn signed_length(&self) -> i32 {
        self.payload_length as i32
    }

    /// Validate the declared length against the configured maximum.
    ///
    /// A negative or oversized length means the rest of the stream cannot be
    /// interpreted, so this is a framing error rather than a bad packet.
    pub fn validate_length(&self, max_payload_length: u32) -> Result<()> {
        let length = self.signed_length();
        if length < 0 {
            return Err(GnutellaError::Framing(format!(
                "Negative message length: {}",
                length
            )));
        }
        if self.payload_length > max_payload_length {
            return Err(GnutellaError::Framing(format!(
                "Unreasonable message length: {} exceeds maximum {}",
                self.payload_length, max_payload_length
            )));
        }
        Ok(())
    }

    /// Total size of the message on the wire.
    #[inline]
    pub fn total_length(&self) -> usize {
        HEADER_SIZE + self.payload_length as usize
    }
}

/// Encode a header to bytes (standalone function).
#[inline]
pub fn encode_header(header: &Header) -> [u8; HEADER_SIZE] {
    header.encode()
}

/// Decode a header from bytes (standalone function).
#[inline]
pub fn decode_header(buf: &[u8]) -> Option<Header> {
    Header::decode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guid() -> Guid {
        let mut bytes = [0u8; 16];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        Guid::from_bytes(bytes)
    }

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::new(guid(), function::QUERY, 3, 1, 100);
        let decoded = Header::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_little_endian_layout() {
        let header = Header::new(guid(), function::QUERY_REPLY, 0x05, 0x06, 0x0A0B0C0D);
        let bytes = header.encode();

        assert_eq!(&bytes[..16], guid().as_bytes());
        assert_eq!(bytes[16], 0x81);
        assert_eq!(bytes[17], 0x05);
        assert_eq!(bytes[18], 0x06);

        // Length 0x0A0B0C0D, least significant byte first
        assert_eq!(bytes[19], 0x0D);
        assert_eq!(bytes[20], 0x0C);
        assert_eq!(bytes[21], 0x0B);
        assert_eq!(bytes[22], 0x0A);
    }

    #[test]
    fn test_header_size_is_exactly_23() {
        assert_eq!(HEADER_SIZE, 23);
        assert_eq!(Header::new(guid(), 0, 1, 0, 0).encode().len(), 23);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        assert!(Header::decode(&[0u8; 22]).is_none());
    }

    #[test]
    fn test_validate_negative_length() {
        let header = Header::new(guid(), function::PING, 1, 0, 0x8000_0000);
        assert!(header.signed_length() < 0);
        let err = header.validate_length(u32::MAX).unwrap_err();
        assert!(matches!(err, GnutellaError::Framing(_)));
        assert!(err.to_string().contains("Negative"));
    }

    #[test]
    fn test_validate_oversized_length() {
        let header = Header::new(guid(), function::QUERY, 1, 0, 1001);
        assert!(header.validate_length(1000).is_err());
        assert!(header.validate_length(1001).is_ok());
    }

    #[test]
    fn test_known_function_codes() {
        for code in [0x00, 0x01, 0x30, 0x31, 0x32, 0x40, 0x80, 0x81] {
            assert!(function::is_known(code), "code {:#x}", code);
        }
        assert!(!function::is_known(0x02));
        assert!(!function::is_known(0x41));
        assert!(!function::is_known(0xFF));
    }

    #[test]
    fn test_standalone_functions() {
        let header = Header::new(guid(), function::PUSH, 2, 0, 26);
        let encoded = encode_header(&header);
        assert_eq!(decode_header(&encoded), Some(header));
        assert_eq!(header.total_length(), 23 + 26);
    }
}
