//! A Gnutella connection over any tokio transport.
//!
//! [`Connection`] runs the handshake, then wires a [`MessageReader`] and a
//! [`MessageWriter`] to the two halves of the transport. The transport is
//! split so reads and writes proceed independently, each serialized by its
//! own lock:
//!
//! ```text
//!            ┌─ read half ─► BufferChannel ─► [inflate] ─► MessageReader ─► receive()
//! transport ─┤
//!            └─ write half ◄─ BufferSink ◄─ [deflate] ◄─ MessageWriter ◄─ send()
//! ```
//!
//! # Example
//!
//! ```ignore
//! use gnutella_wire::{transport, ConnectionBuilder, Message};
//!
//! let mut conn = transport::connect("10.0.0.1:6346", ConnectionBuilder::new().config()).await?;
//! conn.initialize().await?;
//! conn.send(Message::ping(1)).await?;
//! let pong = conn.receive().await?;
//! conn.close();
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, MutexGuard, Notify};

use crate::channel::{
    BufferChannel, BufferSink, CountingReader, CountingWriteChannel, DeflaterChannel,
    InflaterChannel, ReadChain, WriteChain,
};
use crate::config::{ConnectionBuilder, ConnectionConfig};
use crate::error::{GnutellaError, Result};
use crate::handshake::{
    perform_handshake, ConnectVersion, DefaultResponder, HandshakeHeaders, HandshakeOptions,
    HandshakeOutcome, HandshakeResponder, Handshaker, Role,
};
use crate::protocol::Message;
use crate::queue::MessageQueue;
use crate::reader::{MessageReader, MessageReceiver, ReaderLimits};
use crate::stats::ConnectionStats;
use crate::writer::{MessageWriter, SentMessageHandler};

/// Lifecycle of a connection. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Unconnected = 0,
    Handshaking = 1,
    Open = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Unconnected,
            1 => ConnectionState::Handshaking,
            2 => ConnectionState::Open,
            _ => ConnectionState::Closed,
        }
    }
}

/// Messages decoded but not yet handed to `receive()`.
#[derive(Debug, Default)]
struct Inbox {
    messages: VecDeque<Message>,
}

impl MessageReceiver for Inbox {
    fn process_message(&mut self, message: Message) {
        self.messages.push_back(message);
    }

    fn messaging_closed(&mut self) {
        tracing::debug!("Reader closed with {} undelivered messages", self.messages.len());
    }
}

/// Traces every message that left the writer.
#[derive(Debug, Default)]
struct SentTrace;

impl SentMessageHandler for SentTrace {
    fn process_sent(&mut self, message: &Message) {
        tracing::trace!(
            "Sent {:?} {} ({} bytes)",
            message.kind(),
            message.guid(),
            message.total_length()
        );
    }

    fn writing_closed(&mut self) {
        tracing::debug!("Writer closed");
    }
}

type Reader = MessageReader<ReadChain, Inbox>;
type Writer = MessageWriter<Box<dyn MessageQueue + Send>, WriteChain, SentTrace>;

struct ReadSide<T> {
    io: ReadHalf<T>,
    reader: Reader,
    buf: Vec<u8>,
    /// Error raised while messages decoded in the same pass were still queued.
    failure: Option<GnutellaError>,
}

struct WriteSide<T> {
    io: WriteHalf<T>,
    writer: Writer,
}

/// State shared with [`CloseHandle`]s.
struct Shared<T> {
    state: AtomicU8,
    closed: AtomicBool,
    close_notify: Notify,
    /// Transport until `initialize` takes it for the handshake.
    pending: Mutex<Option<T>>,
    read_side: Mutex<Option<ReadSide<T>>>,
    write_side: Mutex<Option<WriteSide<T>>>,
}

impl<T> Shared<T> {
    fn new(transport: T) -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Unconnected as u8),
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
            pending: Mutex::new(Some(transport)),
            read_side: Mutex::new(None),
            write_side: Mutex::new(None),
        }
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn advance(&self, to: ConnectionState) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < to as u8).then_some(to as u8)
            });
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.advance(ConnectionState::Closed);
        self.close_notify.notify_waiters();

        if let Ok(mut pending) = self.pending.try_lock() {
            pending.take();
        }
        // A side held by an in-flight operation is released by that operation.
        if let Ok(mut side) = self.read_side.try_lock() {
            release_read(&mut side);
        }
        if let Ok(mut side) = self.write_side.try_lock() {
            release_write(&mut side);
        }
        tracing::debug!("Connection closed");
    }

    /// Completes once the connection is closed.
    async fn closed(&self) {
        loop {
            // Registered before the flag check so a close in between is not missed.
            let notified = self.close_notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    fn release_if_closed(&self) {
        if !self.is_closed() {
            return;
        }
        if let Ok(mut side) = self.read_side.try_lock() {
            release_read(&mut side);
        }
        if let Ok(mut side) = self.write_side.try_lock() {
            release_write(&mut side);
        }
    }
}

fn release_read<T>(slot: &mut Option<ReadSide<T>>) {
    if let Some(mut side) = slot.take() {
        side.reader.shutdown();
    }
}

fn release_write<T>(slot: &mut Option<WriteSide<T>>) {
    if let Some(mut side) = slot.take() {
        side.writer.shutdown();
    }
}

/// Closes a connection from anywhere, including other tasks and threads.
pub struct CloseHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for CloseHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> CloseHandle<T> {
    /// Close the connection this handle belongs to.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Whether the connection has been closed, by this handle or otherwise.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

/// A Gnutella connection over a tokio byte stream.
pub struct Connection<T> {
    shared: Arc<Shared<T>>,
    config: ConnectionConfig,
    role: Role,
    outcome: Option<HandshakeOutcome>,
    stats: Arc<ConnectionStats>,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// A connection we opened. The handshake starts with our connect line.
    pub fn outgoing(transport: T, config: ConnectionConfig) -> Self {
        Self::new(transport, config, Role::Outgoing)
    }

    /// A connection a peer opened, with the leading `"GNUTELLA "` already
    /// consumed by the acceptor.
    pub fn incoming(transport: T, config: ConnectionConfig) -> Self {
        Self::new(transport, config, Role::Incoming)
    }

    fn new(transport: T, config: ConnectionConfig, role: Role) -> Self {
        Self {
            shared: Arc::new(Shared::new(transport)),
            config,
            role,
            outcome: None,
            stats: Arc::new(ConnectionStats::new()),
        }
    }

    /// Handshake with the headers and deflate setting from the config.
    pub async fn initialize(&mut self) -> Result<()> {
        let responder = DefaultResponder::from_config(&self.config);
        self.initialize_with(responder).await
    }

    /// Handshake with a custom responder, then open the message layer.
    ///
    /// Any failure closes the connection. A connection closed beforehand
    /// fails with [`GnutellaError::Closed`].
    pub async fn initialize_with<R: HandshakeResponder>(&mut self, responder: R) -> Result<()> {
        if self.shared.is_closed() {
            return Err(GnutellaError::Closed);
        }
        if self.state() != ConnectionState::Unconnected {
            return Err(GnutellaError::Precondition(
                "Connection already initialized".into(),
            ));
        }
        if let Err(e) = self.config.validate() {
            tracing::debug!("Refusing to initialize: {}", e);
            self.close();
            return Err(e);
        }
        let taken = self.shared.pending.lock().await.take();
        let mut transport = match taken {
            Some(transport) => transport,
            None if self.shared.is_closed() => return Err(GnutellaError::Closed),
            None => {
                return Err(GnutellaError::Precondition(
                    "Connection has no transport".into(),
                ))
            }
        };
        self.shared.advance(ConnectionState::Handshaking);

        let options = HandshakeOptions::from_config(&self.config);
        let handshaker = match self.role {
            Role::Outgoing => {
                let request = DefaultResponder::from_config(&self.config).request_headers();
                Handshaker::outgoing(request, responder, options)
            }
            Role::Incoming => Handshaker::incoming(responder, options),
        };

        let shared = self.shared.clone();
        let result = tokio::select! {
            r = perform_handshake(&mut transport, handshaker, self.config.handshake_timeout()) => r,
            _ = shared.closed() => Err(GnutellaError::Closed),
        };
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                match &e {
                    GnutellaError::NoGnutellaOk { code, reason } => {
                        tracing::warn!("Handshake rejected: {} {}", code, reason)
                    }
                    other => tracing::debug!("Handshake failed: {}", other),
                }
                self.close();
                return Err(e);
            }
        };

        let (read_io, write_io) = tokio::io::split(transport);
        let limits = ReaderLimits {
            max_payload_length: self.config.max_payload_length,
            soft_max_hops: self.config.soft_max_hops,
            read_chunk: self.config.read_buffer_size,
        };

        let reader = if outcome.reads_deflated() {
            // Leftovers are still compressed, so they go below the inflater.
            let mut source = BufferChannel::new();
            source.feed(&outcome.remaining);
            let counting = CountingReader::new(source, self.stats.clone());
            let chain = ReadChain::Inflated(InflaterChannel::new(counting, self.stats.clone()));
            MessageReader::new(Some(chain), Inbox::default(), limits, self.stats.clone())
        } else {
            self.stats.add_bytes_received(outcome.remaining.len() as u64);
            let counting = CountingReader::new(BufferChannel::new(), self.stats.clone());
            MessageReader::with_buffered(
                Some(ReadChain::Plain(counting)),
                outcome.remaining.clone(),
                Inbox::default(),
                limits,
                self.stats.clone(),
            )
        };

        let sink = CountingWriteChannel::new(
            BufferSink::new(self.config.sink_capacity),
            self.stats.clone(),
        );
        let chain = if outcome.writes_deflated() {
            WriteChain::Deflated(DeflaterChannel::new(sink, self.stats.clone()))
        } else {
            WriteChain::Plain(sink)
        };
        let writer = MessageWriter::new(
            self.config.queue.build(),
            Some(chain),
            SentTrace,
            self.stats.clone(),
        );

        *self.shared.read_side.lock().await = Some(ReadSide {
            io: read_io,
            reader,
            buf: vec![0u8; self.config.read_buffer_size.max(1)],
            failure: None,
        });
        *self.shared.write_side.lock().await = Some(WriteSide {
            io: write_io,
            writer,
        });

        tracing::debug!(
            "Connection open ({:?}, {:?}, deflate in/out {}/{})",
            outcome.role,
            outcome.version,
            outcome.reads_deflated(),
            outcome.writes_deflated()
        );
        self.outcome = Some(outcome);
        self.shared.advance(ConnectionState::Open);

        // Closed while wiring up.
        if self.shared.is_closed() {
            self.shared.release_if_closed();
            return Err(GnutellaError::Closed);
        }
        Ok(())
    }

    /// Queue a message and write until the queue is drained.
    pub async fn send(&self, message: Message) -> Result<()> {
        let mut guard = self.lock_write().await?;
        let result = Self::send_locked(&self.shared, &mut guard, message).await;
        drop(guard);
        self.finish(result)
    }

    async fn send_locked(
        shared: &Shared<T>,
        guard: &mut MutexGuard<'_, Option<WriteSide<T>>>,
        message: Message,
    ) -> Result<()> {
        let side = guard.as_mut().ok_or(GnutellaError::Closed)?;
        side.writer.send(message)?;

        let mut stalled = 0;
        loop {
            let more = side.writer.handle_write()?;
            let bytes = match side.writer.channel_mut() {
                Some(chain) => chain.sink_mut().take(),
                None => return Err(GnutellaError::Closed),
            };
            if bytes.is_empty() {
                stalled += 1;
            } else {
                stalled = 0;
                tokio::select! {
                    r = side.io.write_all(&bytes) => r?,
                    _ = shared.closed() => return Err(GnutellaError::Closed),
                }
            }
            if !more || stalled > 1 {
                break;
            }
        }
        side.io.flush().await?;
        Ok(())
    }

    /// Wait for the next message.
    pub async fn receive(&self) -> Result<Message> {
        let mut guard = self.lock_read().await?;
        let result = Self::receive_locked(&self.shared, &mut guard).await;
        drop(guard);
        self.finish(result)
    }

    async fn receive_locked(
        shared: &Shared<T>,
        guard: &mut MutexGuard<'_, Option<ReadSide<T>>>,
    ) -> Result<Message> {
        let side = guard.as_mut().ok_or(GnutellaError::Closed)?;
        loop {
            if let Some(message) = side.reader.receiver_mut().messages.pop_front() {
                return Ok(message);
            }
            if let Some(e) = side.failure.take() {
                return Err(e);
            }

            // Buffered bytes first, then whatever the source already holds.
            if let Err(e) = side.reader.handle_read() {
                side.failure = Some(e);
                continue;
            }
            if !side.reader.receiver().messages.is_empty() {
                continue;
            }

            let n = tokio::select! {
                r = side.io.read(&mut side.buf) => r?,
                _ = shared.closed() => return Err(GnutellaError::Closed),
            };
            let source = match side.reader.channel_mut() {
                Some(chain) => chain.source_mut(),
                None => return Err(GnutellaError::Closed),
            };
            if n == 0 {
                source.feed_eof();
            } else {
                source.feed(&side.buf[..n]);
            }
        }
    }

    /// Wait for the next message for at most `timeout`.
    ///
    /// Expiry fails with [`GnutellaError::Timeout`] and leaves the
    /// connection open with its buffered bytes intact.
    pub async fn receive_timeout(&self, timeout: Duration) -> Result<Message> {
        match tokio::time::timeout(timeout, self.receive()).await {
            Ok(result) => result,
            Err(_) => {
                self.shared.release_if_closed();
                Err(GnutellaError::Timeout)
            }
        }
    }

    /// Hand every message to `consumer` until the connection closes.
    ///
    /// Returns `Ok(())` after a local close, the error otherwise.
    pub async fn run<F: FnMut(Message)>(&self, mut consumer: F) -> Result<()> {
        loop {
            match self.receive().await {
                Ok(message) => consumer(message),
                Err(GnutellaError::Closed) => return Ok(()),
                Err(e) => {
                    tracing::error!("Connection loop error: {}", e);
                    return Err(e);
                }
            }
        }
    }

    async fn lock_read(&self) -> Result<MutexGuard<'_, Option<ReadSide<T>>>> {
        self.check_open()?;
        tokio::select! {
            guard = self.shared.read_side.lock() => Ok(guard),
            _ = self.shared.closed() => Err(GnutellaError::Closed),
        }
    }

    async fn lock_write(&self) -> Result<MutexGuard<'_, Option<WriteSide<T>>>> {
        self.check_open()?;
        tokio::select! {
            guard = self.shared.write_side.lock() => Ok(guard),
            _ = self.shared.closed() => Err(GnutellaError::Closed),
        }
    }

    fn check_open(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Open => Ok(()),
            ConnectionState::Closed => Err(GnutellaError::Closed),
            state => Err(GnutellaError::Precondition(format!(
                "Connection is {:?}, not open",
                state
            ))),
        }
    }

    /// Close on fatal errors, then release sides a closing call could not reach.
    fn finish<V>(&self, result: Result<V>) -> Result<V> {
        if let Err(e) = &result {
            if e.is_fatal() && !self.shared.is_closed() {
                tracing::debug!("Closing after error: {}", e);
                self.shared.close();
            }
        }
        self.shared.release_if_closed();
        result
    }
}

impl<T> Connection<T> {
    /// Close the connection. Safe to call any number of times.
    pub fn close(&self) {
        self.shared.close();
    }

    /// A handle that can close this connection from another task.
    pub fn close_handle(&self) -> CloseHandle<T> {
        CloseHandle {
            shared: self.shared.clone(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Handshake done and not yet closed.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Whether `close` ran, locally or after a fatal error.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Which side opened the connection.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Settings the connection was created with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Message and byte counters, shared with the reader and writer.
    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    /// Protocol version the handshake settled on.
    pub fn version(&self) -> Option<ConnectVersion> {
        self.outcome.as_ref().map(|o| o.version)
    }

    /// Headers the peer sent during the handshake.
    pub fn headers_read(&self) -> Option<&HandshakeHeaders> {
        self.outcome.as_ref().map(|o| &o.headers_read)
    }

    /// Headers we sent during the handshake.
    pub fn headers_written(&self) -> Option<&HandshakeHeaders> {
        self.outcome.as_ref().map(|o| &o.headers_written)
    }

    /// Whether outgoing messages are deflated. False before the handshake.
    pub fn is_writing_deflated(&self) -> bool {
        self.outcome.as_ref().map_or(false, |o| o.writes_deflated())
    }

    /// Whether incoming messages are inflated. False before the handshake.
    pub fn is_reading_deflated(&self) -> bool {
        self.outcome.as_ref().map_or(false, |o| o.reads_deflated())
    }
}

impl ConnectionBuilder {
    /// Build an outgoing connection over `transport`.
    pub fn outgoing<T>(self, transport: T) -> Connection<T>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        Connection::outgoing(transport, self.config())
    }

    /// Build an incoming connection over `transport`.
    pub fn incoming<T>(self, transport: T) -> Connection<T>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        Connection::incoming(transport, self.config())
    }
}
