//! # gnutella-wire
//!
//! Connection engine for the Gnutella 0.6 peer-to-peer protocol.
//!
//! A connection goes through a line-oriented handshake and then carries a
//! stream of binary messages, each a 23-byte header plus payload, optionally
//! deflate-compressed per direction.
//!
//! ## Architecture
//!
//! - **Handshake**: [`Handshaker`] negotiates headers and compression
//! - **Messages**: [`MessageReader`] frames incoming bytes into [`Message`]s,
//!   [`MessageWriter`] drains a [`MessageQueue`] into the transport
//! - **Connection**: [`Connection`] composes both over a tokio stream
//!
//! The reader, writer and handshaker never block; they are called when the
//! channel is ready and return when it is not. [`Connection`] drives them
//! from async code.
//!
//! ## Example
//!
//! ```ignore
//! use gnutella_wire::{transport, ConnectionBuilder, Message};
//!
//! #[tokio::main]
//! async fn main() -> gnutella_wire::Result<()> {
//!     let config = ConnectionBuilder::new()
//!         .header("User-Agent", "example/0.1")
//!         .header("X-Ultrapeer", "False")
//!         .config();
//!
//!     let mut conn = transport::connect("10.0.0.1:6346", config).await?;
//!     conn.initialize().await?;
//!     conn.send(Message::ping(1)).await?;
//!
//!     conn.run(|message| println!("{:?}", message.kind())).await
//! }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod queue;
pub mod reader;
pub mod stats;
pub mod transport;
pub mod writer;

mod connection;

pub use config::{ConnectionBuilder, ConnectionConfig, QueueConfig};
pub use connection::{CloseHandle, Connection, ConnectionState};
pub use error::{GnutellaError, Result};
pub use handshake::{HandshakeHeaders, HandshakeResponder, HandshakeResponse, Handshaker};
pub use protocol::{Guid, Message, MessageKind};
pub use queue::{BasicQueue, CompositeQueue, MessageQueue};
pub use reader::{MessageReader, MessageReceiver};
pub use stats::ConnectionStats;
pub use writer::{MessageWriter, SentMessageHandler};
