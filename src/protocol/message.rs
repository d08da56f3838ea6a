//! Message envelope with typed accessors.
//!
//! A `Message` is a header plus an opaque payload. The payload is never
//! interpreted beyond what is needed to classify the message for scheduling
//! (vendor id and selector, route table variant).
//!
//! # Example
//!
//! ```
//! use gnutella_wire::protocol::{Message, MessageKind};
//!
//! let mut ping = Message::ping(3);
//! assert_eq!(ping.kind(), MessageKind::PingRequest);
//! assert_eq!(ping.total_length(), 23);
//!
//! ping.hop();
//! assert_eq!((ping.ttl(), ping.hops()), (2, 1));
//! ```

use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};

use super::guid::Guid;
use super::wire_format::{function, Header, HARD_MAX, HEADER_SIZE};
use crate::error::{GnutellaError, Result};

/// Minimum payload sizes enforced on incoming messages.
pub mod min_payload {
    /// Minimum speed (2 bytes) plus a terminating NUL.
    pub const QUERY: usize = 3;
    /// Fixed result-set header plus servent GUID.
    pub const QUERY_REPLY: usize = 26;
    /// Servent GUID, file index, address and port.
    pub const PUSH: usize = 26;
    /// Vendor id, selector and version.
    pub const VENDOR: usize = 8;
    /// Variant, table length and infinity.
    pub const ROUTE_TABLE_RESET: usize = 6;
    /// Variant, sequence number and size, compressor, entry bits.
    pub const ROUTE_TABLE_PATCH: usize = 5;
}

/// Well-known vendor messages.
pub mod vendor {
    /// Vendor id used by the generic capability messages.
    pub const NULL: [u8; 4] = [0, 0, 0, 0];
    /// Vendor id of BearShare.
    pub const BEAR: [u8; 4] = *b"BEAR";
    /// Vendor id of LimeWire.
    pub const LIME: [u8; 4] = *b"LIME";
    /// Vendor id of gtk-gnutella.
    pub const GTKG: [u8; 4] = *b"GTKG";

    /// Advertises the vendor messages a peer understands.
    pub const MESSAGES_SUPPORTED: ([u8; 4], u16) = (NULL, 0);
    /// Advertises peer capabilities.
    pub const CAPABILITIES: ([u8; 4], u16) = (NULL, 10);
    /// Asks the peer to limit the hops of forwarded queries.
    pub const HOPS_FLOW: ([u8; 4], u16) = (BEAR, 4);
    /// Updates handshake headers after the connection is open.
    pub const HEADER_UPDATE: ([u8; 4], u16) = (LIME, 25);

    /// Whether the vendor message steers the connection itself.
    pub fn is_control(vendor: [u8; 4], selector: u16) -> bool {
        [MESSAGES_SUPPORTED, CAPABILITIES, HOPS_FLOW, HEADER_UPDATE].contains(&(vendor, selector))
    }
}

/// Route table variant for a reset.
const ROUTE_TABLE_RESET_VARIANT: u8 = 0x00;
/// Route table variant for a patch.
const ROUTE_TABLE_PATCH_VARIANT: u8 = 0x01;

/// Classification of a message, derived from its function code and payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    PingRequest,
    PingReply,
    PushRequest,
    QueryRequest,
    QueryReply,
    RouteTableReset,
    RouteTablePatch,
    Vendor {
        vendor: [u8; 4],
        selector: u16,
        version: u16,
    },
}

impl MessageKind {
    /// Derive the kind from a function code and payload.
    ///
    /// Fails with `BadPacket` when the payload is structurally invalid for
    /// the function code.
    pub fn classify(function_code: u8, payload: &[u8]) -> Result<Self> {
        let require = |min: usize, what: &str| {
            if payload.len() < min {
                Err(GnutellaError::BadPacket(format!(
                    "{} payload too short: {} < {}",
                    what,
                    payload.len(),
                    min
                )))
            } else {
                Ok(())
            }
        };

        match function_code {
            function::PING => Ok(MessageKind::PingRequest),
            function::PING_REPLY => Ok(MessageKind::PingReply),
            function::PUSH => {
                require(min_payload::PUSH, "Push")?;
                Ok(MessageKind::PushRequest)
            }
            function::QUERY => {
                require(min_payload::QUERY, "Query")?;
                Ok(MessageKind::QueryRequest)
            }
            function::QUERY_REPLY => {
                require(min_payload::QUERY_REPLY, "Query reply")?;
                Ok(MessageKind::QueryReply)
            }
            function::ROUTE_TABLE_UPDATE => match payload.first() {
                Some(&ROUTE_TABLE_RESET_VARIANT) => {
                    require(min_payload::ROUTE_TABLE_RESET, "Route table reset")?;
                    Ok(MessageKind::RouteTableReset)
                }
                Some(&ROUTE_TABLE_PATCH_VARIANT) => {
                    require(min_payload::ROUTE_TABLE_PATCH, "Route table patch")?;
                    Ok(MessageKind::RouteTablePatch)
                }
                Some(other) => Err(GnutellaError::BadPacket(format!(
                    "Unknown route table variant: {}",
                    other
                ))),
                None => Err(GnutellaError::BadPacket("Empty route table message".into())),
            },
            function::VENDOR_MESSAGE | function::VENDOR_MESSAGE_STABLE => {
                require(min_payload::VENDOR, "Vendor")?;
                let mut vendor = [0u8; 4];
                vendor.copy_from_slice(&payload[..4]);
                Ok(MessageKind::Vendor {
                    vendor,
                    selector: u16::from_le_bytes([payload[4], payload[5]]),
                    version: u16::from_le_bytes([payload[6], payload[7]]),
                })
            }
            other => Err(GnutellaError::BadPacket(format!(
                "Unknown function code: {:#04x}",
                other
            ))),
        }
    }

    /// Replies and pongs are exempt from the soft hops limit.
    #[inline]
    pub fn is_reply(&self) -> bool {
        matches!(self, MessageKind::QueryReply | MessageKind::PingReply)
    }
}

/// A single Gnutella message.
#[derive(Debug, Clone)]
pub struct Message {
    guid: Guid,
    function: u8,
    ttl: u8,
    hops: u8,
    kind: MessageKind,
    priority: i32,
    created: Instant,
    payload: Bytes,
}

impl Message {
    /// Build a message from its parts, validating the payload structure.
    ///
    /// TTL and hops are taken as given; use [`Message::from_wire`] for
    /// untrusted input.
    pub fn from_parts(guid: Guid, function: u8, ttl: u8, hops: u8, payload: Bytes) -> Result<Self> {
        let kind = MessageKind::classify(function, &payload)?;
        Ok(Self::assemble(guid, function, ttl, hops, kind, payload))
    }

    fn assemble(guid: Guid, function: u8, ttl: u8, hops: u8, kind: MessageKind, payload: Bytes) -> Self {
        Self {
            guid,
            function,
            ttl,
            hops,
            kind,
            priority: 0,
            created: Instant::now(),
            payload,
        }
    }

    /// Build a message from a header and payload read off the wire.
    ///
    /// With `soft_max` set, hops and TTL + hops are bounded for everything
    /// except query replies and pongs. TTL is clamped rather than rejected
    /// when only TTL + hops exceeds it. With `None` TTL and hops are kept
    /// as received, subject to the hard maximum.
    pub fn from_wire(header: &Header, payload: Bytes, soft_max: Option<u8>) -> Result<Self> {
        if payload.len() != header.payload_length as usize {
            return Err(GnutellaError::BadPacket(format!(
                "Payload length mismatch: header says {}, got {}",
                header.payload_length,
                payload.len()
            )));
        }

        let Header {
            guid,
            function,
            mut ttl,
            hops,
            ..
        } = *header;

        if (hops as i8) < 0 {
            return Err(GnutellaError::BadPacket(format!("Negative hops: {}", hops as i8)));
        }
        if (ttl as i8) < 0 {
            return Err(GnutellaError::BadPacket(format!("Negative TTL: {}", ttl as i8)));
        }

        let kind = MessageKind::classify(function, &payload)?;
        let soft_max = soft_max.filter(|_| !kind.is_reply());

        if let Some(max) = soft_max {
            if hops > max {
                return Err(GnutellaError::BadPacket(format!(
                    "Hops {} exceeds soft max {}",
                    hops, max
                )));
            }
        }

        let total = ttl as u16 + hops as u16;
        if total > HARD_MAX as u16 {
            return Err(GnutellaError::BadPacket(format!(
                "TTL+hops {} exceeds hard max {}",
                total, HARD_MAX
            )));
        }
        if let Some(max) = soft_max {
            if total > max as u16 {
                ttl = max - hops;
            }
        }

        Ok(Self::assemble(guid, function, ttl, hops, kind, payload))
    }

    /// Ping with a fresh GUID and no payload.
    pub fn ping(ttl: u8) -> Self {
        Self::assemble(
            Guid::new_random(),
            function::PING,
            ttl,
            0,
            MessageKind::PingRequest,
            Bytes::new(),
        )
    }

    /// Pong answering the ping with `guid`.
    ///
    /// Payload: port (LE), IPv4 address, shared file count and kilobytes.
    pub fn pong(guid: Guid, ttl: u8, port: u16, ip: [u8; 4], files: u32, kilobytes: u32) -> Self {
        let mut buf = BytesMut::with_capacity(14);
        buf.put_u16_le(port);
        buf.put_slice(&ip);
        buf.put_u32_le(files);
        buf.put_u32_le(kilobytes);
        Self::assemble(guid, function::PING_REPLY, ttl, 0, MessageKind::PingReply, buf.freeze())
    }

    /// Query with a fresh GUID.
    pub fn query(ttl: u8, min_speed: u16, text: &str) -> Self {
        let mut buf = BytesMut::with_capacity(3 + text.len());
        buf.put_u16_le(min_speed);
        buf.put_slice(text.as_bytes());
        buf.put_u8(0);
        Self::assemble(
            Guid::new_random(),
            function::QUERY,
            ttl,
            0,
            MessageKind::QueryRequest,
            buf.freeze(),
        )
    }

    /// Query reply routed back along `guid`. The result-set body is opaque.
    pub fn query_reply(guid: Guid, ttl: u8, payload: Bytes) -> Result<Self> {
        Self::from_parts(guid, function::QUERY_REPLY, ttl, 0, payload)
    }

    /// Push request asking `servent` to connect out to `ip:port`.
    pub fn push(ttl: u8, servent: Guid, index: u32, ip: [u8; 4], port: u16) -> Self {
        let mut buf = BytesMut::with_capacity(min_payload::PUSH);
        buf.put_slice(servent.as_bytes());
        buf.put_u32_le(index);
        buf.put_slice(&ip);
        buf.put_u16_le(port);
        Self::assemble(
            Guid::new_random(),
            function::PUSH,
            ttl,
            0,
            MessageKind::PushRequest,
            buf.freeze(),
        )
    }

    /// Route table reset. Sent to neighbours only (TTL 1).
    pub fn route_table_reset(table_length: u32, infinity: u8) -> Self {
        let mut buf = BytesMut::with_capacity(min_payload::ROUTE_TABLE_RESET);
        buf.put_u8(ROUTE_TABLE_RESET_VARIANT);
        buf.put_u32_le(table_length);
        buf.put_u8(infinity);
        Self::assemble(
            Guid::new_random(),
            function::ROUTE_TABLE_UPDATE,
            1,
            0,
            MessageKind::RouteTableReset,
            buf.freeze(),
        )
    }

    /// One fragment of a route table patch. Sent to neighbours only (TTL 1).
    pub fn route_table_patch(
        sequence_number: u8,
        sequence_size: u8,
        compressor: u8,
        entry_bits: u8,
        data: &[u8],
    ) -> Self {
        let mut buf = BytesMut::with_capacity(min_payload::ROUTE_TABLE_PATCH + data.len());
        buf.put_u8(ROUTE_TABLE_PATCH_VARIANT);
        buf.put_u8(sequence_number);
        buf.put_u8(sequence_size);
        buf.put_u8(compressor);
        buf.put_u8(entry_bits);
        buf.put_slice(data);
        Self::assemble(
            Guid::new_random(),
            function::ROUTE_TABLE_UPDATE,
            1,
            0,
            MessageKind::RouteTablePatch,
            buf.freeze(),
        )
    }

    /// Vendor message. Sent to neighbours only (TTL 1).
    pub fn vendor(vendor: [u8; 4], selector: u16, version: u16, body: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(min_payload::VENDOR + body.len());
        buf.put_slice(&vendor);
        buf.put_u16_le(selector);
        buf.put_u16_le(version);
        buf.put_slice(body);
        Self::assemble(
            Guid::new_random(),
            function::VENDOR_MESSAGE,
            1,
            0,
            MessageKind::Vendor {
                vendor,
                selector,
                version,
            },
            buf.freeze(),
        )
    }

    /// Override the creation instant.
    pub fn with_created(mut self, created: Instant) -> Self {
        self.created = created;
        self
    }

    #[inline]
    pub fn guid(&self) -> Guid {
        self.guid
    }

    /// Raw function code, preserved for re-serialization.
    #[inline]
    pub fn function(&self) -> u8 {
        self.function
    }

    #[inline]
    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    #[inline]
    pub fn hops(&self) -> u8 {
        self.hops
    }

    #[inline]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Scheduling hint; higher sends first within the reply category.
    #[inline]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    #[inline]
    pub fn created(&self) -> Instant {
        self.created
    }

    /// Time since the message was created or read.
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline]
    pub fn payload_length(&self) -> usize {
        self.payload.len()
    }

    /// Length on the wire, header included.
    #[inline]
    pub fn total_length(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Account for one hop: hops goes up, TTL goes down but not below zero.
    pub fn hop(&mut self) {
        self.hops = self.hops.saturating_add(1);
        self.ttl = self.ttl.saturating_sub(1);
    }

    /// Control traffic: route table updates and connection-steering vendor
    /// messages.
    pub fn is_control(&self) -> bool {
        match self.kind {
            MessageKind::RouteTableReset | MessageKind::RouteTablePatch => true,
            MessageKind::Vendor {
                vendor: id,
                selector,
                ..
            } => vendor::is_control(id, selector),
            _ => false,
        }
    }

    /// Keep-alive pings and pongs between direct neighbours.
    pub fn is_watchdog(&self) -> bool {
        matches!(self.kind, MessageKind::PingRequest | MessageKind::PingReply)
            && self.hops == 0
            && self.ttl <= 2
    }

    /// Header as it goes on the wire.
    pub fn header(&self) -> Header {
        Header::new(
            self.guid,
            self.function,
            self.ttl,
            self.hops,
            self.payload.len() as u32,
        )
    }

    /// Append the serialized message to `buf`.
    pub fn write_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.total_length());
        buf.put_slice(&self.header().encode());
        buf.put_slice(&self.payload);
    }

    /// Serialize to a single contiguous buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.total_length());
        self.write_into(&mut buf);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(function: u8, ttl: u8, hops: u8, len: usize) -> Header {
        Header::new(Guid::from_bytes([9; 16]), function, ttl, hops, len as u32)
    }

    #[test]
    fn test_ping_serialization() {
        let ping = Message::ping(2);
        let bytes = ping.to_bytes();
        assert_eq!(bytes.len(), 23);
        assert_eq!(&bytes[..16], ping.guid().as_bytes());
        assert_eq!(bytes[16], function::PING);
        assert_eq!(bytes[17], 2);
        assert_eq!(bytes[18], 0);
        assert_eq!(&bytes[19..23], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_from_wire_preserves_bytes() {
        let original = Message::query(3, 0, "rust");
        let bytes = original.to_bytes();
        let h = Header::decode(&bytes).unwrap();
        let parsed = Message::from_wire(&h, bytes.slice(HEADER_SIZE..), None).unwrap();
        assert_eq!(parsed.to_bytes(), bytes);
        assert_eq!(parsed.kind(), MessageKind::QueryRequest);
    }

    #[test]
    fn test_hop_never_drops_ttl_below_zero() {
        let mut msg = Message::ping(1);
        msg.hop();
        assert_eq!((msg.ttl(), msg.hops()), (0, 1));
        msg.hop();
        assert_eq!((msg.ttl(), msg.hops()), (0, 2));
    }

    #[test]
    fn test_unknown_function_is_bad_packet() {
        let err = Message::from_wire(&header(0x41, 1, 0, 0), Bytes::new(), Some(3)).unwrap_err();
        assert!(matches!(err, GnutellaError::BadPacket(_)));
    }

    #[test]
    fn test_negative_hops_or_ttl_rejected() {
        assert!(Message::from_wire(&header(function::PING, 0x80, 0, 0), Bytes::new(), Some(3)).is_err());
        assert!(Message::from_wire(&header(function::PING, 1, 0xFF, 0), Bytes::new(), Some(3)).is_err());
    }

    #[test]
    fn test_hops_over_soft_max() {
        let err = Message::from_wire(&header(function::PING, 0, 4, 0), Bytes::new(), Some(3)).unwrap_err();
        assert!(matches!(err, GnutellaError::BadPacket(_)));

        // Pongs are exempt
        let pong = Message::from_wire(&header(function::PING_REPLY, 0, 4, 0), Bytes::new(), Some(3)).unwrap();
        assert_eq!(pong.hops(), 4);
    }

    #[test]
    fn test_ttl_clamped_to_soft_max() {
        let msg = Message::from_wire(&header(function::PING, 7, 1, 0), Bytes::new(), Some(3)).unwrap();
        assert_eq!(msg.ttl(), 2);
        assert_eq!(msg.hops(), 1);
    }

    #[test]
    fn test_no_soft_max_keeps_ttl_and_hops() {
        let msg = Message::from_wire(&header(function::QUERY, 7, 0, 3), Bytes::from_static(&[0, 0, 0]), None)
            .unwrap();
        assert_eq!((msg.ttl(), msg.hops()), (7, 0));

        let ping = Message::from_wire(&header(function::PING, 1, 6, 0), Bytes::new(), None).unwrap();
        assert_eq!((ping.ttl(), ping.hops()), (1, 6));

        let err = Message::from_wire(&header(function::PING, 10, 5, 0), Bytes::new(), None).unwrap_err();
        assert!(err.to_string().contains("hard max"));
    }

    #[test]
    fn test_hard_max_rejected_even_for_replies() {
        let payload = Bytes::from(vec![0u8; 26]);
        let err =
            Message::from_wire(&header(function::QUERY_REPLY, 10, 5, 26), payload, Some(3)).unwrap_err();
        assert!(err.to_string().contains("hard max"));
    }

    #[test]
    fn test_minimum_payloads() {
        let short_query = Bytes::from_static(&[0, 0]);
        assert!(Message::from_wire(&header(function::QUERY, 1, 0, 2), short_query, Some(3)).is_err());

        let short_reply = Bytes::from(vec![0u8; 25]);
        assert!(Message::from_wire(&header(function::QUERY_REPLY, 1, 0, 25), short_reply, Some(3)).is_err());

        let ok_reply = Bytes::from(vec![0u8; 26]);
        assert!(Message::from_wire(&header(function::QUERY_REPLY, 1, 0, 26), ok_reply, Some(3)).is_ok());
    }

    #[test]
    fn test_route_table_variants() {
        let reset = Message::route_table_reset(65536, 7);
        assert_eq!(reset.kind(), MessageKind::RouteTableReset);
        assert!(reset.is_control());

        let patch = Message::route_table_patch(1, 1, 1, 4, &[1, 2, 3]);
        assert_eq!(patch.kind(), MessageKind::RouteTablePatch);

        let bad = Bytes::from_static(&[7, 0, 0, 0, 0, 0]);
        assert!(Message::from_wire(&header(function::ROUTE_TABLE_UPDATE, 1, 0, 6), bad, Some(3)).is_err());
    }

    #[test]
    fn test_vendor_classification() {
        let hops_flow = Message::vendor(vendor::BEAR, 4, 1, &[2]);
        assert!(hops_flow.is_control());
        assert_eq!(
            hops_flow.kind(),
            MessageKind::Vendor {
                vendor: vendor::BEAR,
                selector: 4,
                version: 1
            }
        );

        let other = Message::vendor(vendor::GTKG, 21, 1, &[]);
        assert!(!other.is_control());
    }

    #[test]
    fn test_watchdog_detection() {
        assert!(Message::ping(1).is_watchdog());
        assert!(Message::ping(2).is_watchdog());
        assert!(!Message::ping(3).is_watchdog());

        let mut hopped = Message::ping(2);
        hopped.hop();
        assert!(!hopped.is_watchdog());

        assert!(!Message::query(1, 0, "x").is_watchdog());
    }

    #[test]
    fn test_push_payload_layout() {
        let servent = Guid::from_bytes([3; 16]);
        let push = Message::push(3, servent, 5, [10, 0, 0, 1], 6346);
        let payload = push.payload();
        assert_eq!(payload.len(), 26);
        assert_eq!(&payload[..16], servent.as_bytes());
        assert_eq!(&payload[16..20], &5u32.to_le_bytes());
        assert_eq!(&payload[20..24], &[10, 0, 0, 1]);
        assert_eq!(&payload[24..26], &6346u16.to_le_bytes());
    }
}
