//! Connection handshake - version negotiation and header exchange.
//!
//! This module handles everything that happens before message traffic:
//! - Connect line classification (0.6 and later vs legacy)
//! - Ordered header blocks and status lines
//! - The sans-I/O [`Handshaker`] and its async driver

mod handshaker;
mod headers;
mod response;
mod version;

pub use handshaker::{
    perform_handshake, DefaultResponder, HandshakeOptions, HandshakeOutcome, HandshakeResponder,
    Handshaker, Role,
};
pub use headers::{header_names, HandshakeHeaders};
pub use response::{status, HandshakeResponse, GNUTELLA_06};
pub use version::{
    classify_connect_line, ConnectVersion, CONNECT_04, CONNECT_LINE_06, GNUTELLA_CONNECT_PREFIX,
    LEGACY_OK,
};
