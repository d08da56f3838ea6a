//! 16-byte message identifiers.

use std::fmt;

use rand::RngCore;

/// GUID size in bytes.
pub const GUID_SIZE: usize = 16;

/// Globally unique message identifier, used for dedup and reply routing.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid([u8; GUID_SIZE]);

impl Guid {
    /// Generate a fresh GUID.
    ///
    /// Byte 8 is 0xFF to mark a modern client, byte 15 is reserved and 0.
    pub fn new_random() -> Self {
        let mut bytes = [0u8; GUID_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes[8] = 0xFF;
        bytes[15] = 0x00;
        Self(bytes)
    }

    /// Wrap raw bytes.
    #[inline]
    pub const fn from_bytes(bytes: [u8; GUID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build from a slice, returns `None` unless it is exactly 16 bytes.
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; GUID_SIZE] = slice.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Borrow the raw bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; GUID_SIZE] {
        &self.0
    }

    /// Whether this GUID carries the modern-client marker.
    #[inline]
    pub fn is_modern(&self) -> bool {
        self.0[8] == 0xFF
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_guid_markers() {
        let guid = Guid::new_random();
        assert!(guid.is_modern());
        assert_eq!(guid.as_bytes()[15], 0);
    }

    #[test]
    fn test_random_guids_differ() {
        assert_ne!(Guid::new_random(), Guid::new_random());
    }

    #[test]
    fn test_from_slice_length() {
        assert!(Guid::from_slice(&[1u8; 15]).is_none());
        assert!(Guid::from_slice(&[1u8; 17]).is_none());
        assert_eq!(Guid::from_slice(&[1u8; 16]), Some(Guid::from_bytes([1u8; 16])));
    }

    #[test]
    fn test_display_hex() {
        let guid = Guid::from_bytes([0xAB; 16]);
        assert_eq!(guid.to_string(), "AB".repeat(16));
    }
}
