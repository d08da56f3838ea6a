//! Protocol module - wire format, framing, and message types.
//!
//! This module implements the binary message layer:
//! - 23-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Message envelope with typed accessors and validation

mod frame_buffer;
mod guid;
mod message;
mod wire_format;

pub use frame_buffer::FrameBuffer;
pub use guid::{Guid, GUID_SIZE};
pub use message::{min_payload, vendor, Message, MessageKind};
pub use wire_format::{
    decode_header, encode_header, function, Header, DEFAULT_MAX_PAYLOAD_LENGTH, DEFAULT_SOFT_MAX,
    HARD_MAX, HEADER_SIZE,
};
