//! Outgoing message serialization.
//!
//! [`MessageWriter`] owns the outgoing [`MessageQueue`] and drains it into a
//! [`WriteChannel`] whenever the channel has room. One message is in flight
//! at a time; a partial write keeps the unwritten tail for the next call.
//!
//! ```text
//! send() ─► MessageQueue ─► in-flight buffer ─► WriteChannel
//!                                   │
//!                                   └─► SentMessageHandler (once all bytes left)
//! ```

use std::sync::Arc;

use bytes::{Buf, BytesMut};

use crate::channel::WriteChannel;
use crate::error::{GnutellaError, Result};
use crate::protocol::Message;
use crate::queue::MessageQueue;
use crate::stats::ConnectionStats;

/// Told about every message whose bytes fully left the writer.
pub trait SentMessageHandler {
    fn process_sent(&mut self, message: &Message);

    /// The writer shut down. Called once.
    fn writing_closed(&mut self) {}
}

impl<F: FnMut(&Message)> SentMessageHandler for F {
    fn process_sent(&mut self, message: &Message) {
        self(message)
    }
}

/// Ignores sent messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSentHandler;

impl SentMessageHandler for NoopSentHandler {
    fn process_sent(&mut self, _message: &Message) {}
}

/// Drains a message queue into a non-blocking channel.
pub struct MessageWriter<Q, W, H> {
    queue: Q,
    channel: Option<W>,
    handler: H,
    /// Serialized bytes of the in-flight message not yet accepted.
    in_flight: BytesMut,
    current: Option<Message>,
    stats: Arc<ConnectionStats>,
    shutdown: bool,
}

impl<Q: MessageQueue, W: WriteChannel, H: SentMessageHandler> MessageWriter<Q, W, H> {
    pub fn new(queue: Q, channel: Option<W>, handler: H, stats: Arc<ConnectionStats>) -> Self {
        Self {
            queue,
            channel,
            handler,
            in_flight: BytesMut::new(),
            current: None,
            stats,
            shutdown: false,
        }
    }

    /// Queue a message and ask for write readiness.
    pub fn send(&mut self, message: Message) -> Result<()> {
        if self.shutdown {
            return Err(GnutellaError::Closed);
        }
        self.stats.add_sent(1);
        self.queue.add(message);
        self.account_dropped();
        if let Some(channel) = self.channel.as_mut() {
            channel.interest(true);
        }
        Ok(())
    }

    /// Write as much as the channel accepts.
    ///
    /// Returns `true` while there is more to write, in which case write
    /// interest stays on.
    pub fn handle_write(&mut self) -> Result<bool> {
        if self.shutdown {
            return Err(GnutellaError::Closed);
        }
        let channel = self.channel.as_mut().ok_or_else(|| {
            GnutellaError::Precondition("No write channel to write to".into())
        })?;

        let mut idle_rounds = 0;
        loop {
            while !self.in_flight.is_empty() {
                let n = channel.write(&self.in_flight)?;
                if n == 0 {
                    channel.interest(true);
                    return Ok(true);
                }
                self.in_flight.advance(n);
            }

            if let Some(sent) = self.current.take() {
                self.handler.process_sent(&sent);
            }

            match self.queue.remove_next() {
                Some(message) => {
                    idle_rounds = 0;
                    message.write_into(&mut self.in_flight);
                    self.current = Some(message);
                }
                // End of a scheduling round, poll again.
                None if !self.queue.is_empty() && idle_rounds < 1 => idle_rounds += 1,
                None => break,
            }
        }

        let dropped = self.queue.reset_dropped();
        if dropped > 0 {
            self.stats.add_sent_dropped(dropped as u64);
        }

        if !channel.flush_pending()? || !self.queue.is_empty() {
            channel.interest(true);
            return Ok(true);
        }
        channel.interest(false);
        Ok(false)
    }

    fn account_dropped(&mut self) {
        let dropped = self.queue.reset_dropped();
        if dropped > 0 {
            self.stats.add_sent_dropped(dropped as u64);
        }
    }

    /// Replace the channel. The in-flight remainder goes to the new one.
    pub fn set_write_channel(&mut self, channel: Option<W>) {
        self.channel = channel;
        if self.has_pending() {
            if let Some(channel) = self.channel.as_mut() {
                channel.interest(true);
            }
        }
    }

    /// Stop writing. Notifies the handler once.
    pub fn shutdown(&mut self) {
        if self.shutdown {
            return;
        }
        self.shutdown = true;
        self.in_flight.clear();
        self.current = None;
        if let Some(channel) = self.channel.as_mut() {
            channel.interest(false);
        }
        self.handler.writing_closed();
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Whether queued, in-flight or channel-held bytes remain.
    pub fn has_pending(&self) -> bool {
        !self.in_flight.is_empty()
            || !self.queue.is_empty()
            || self.channel.as_ref().map_or(false, |c| c.has_buffered())
    }

    /// The queue holding messages not yet serialized.
    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// The current write channel, for collecting what it accepted. `None`
    /// while detached.
    pub fn channel_mut(&mut self) -> Option<&mut W> {
        self.channel.as_mut()
    }

    /// The handler told about every sent message.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Mutable access to the sent-message handler.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }
}
