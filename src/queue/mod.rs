//! Outgoing message scheduling.
//!
//! A [`MessageQueue`] is owned by its writer and decides which message
//! goes out next:
//! - [`BasicQueue`]: strict FIFO
//! - [`CompositeQueue`]: priority categories with round-robin fairness,
//!   per-category capacity and age limits

mod basic;
mod bucket;
mod composite;

pub use basic::BasicQueue;
pub use bucket::{Bucket, FifoBucket, PriorityBucket};
pub use composite::{Category, CompositeQueue, CompositeQueueConfig, CycleSizes};

use crate::protocol::Message;

/// Scheduling policy for outgoing messages.
pub trait MessageQueue {
    /// Take ownership of `message`. May drop it or older messages.
    fn add(&mut self, message: Message);

    /// Next message to send.
    ///
    /// `None` does not necessarily mean the queue is empty; a policy may end
    /// a scheduling round and expect to be asked again.
    fn remove_next(&mut self) -> Option<Message>;

    /// Messages dropped since the last call, resetting the count.
    fn reset_dropped(&mut self) -> usize;

    /// Messages currently held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<Q: MessageQueue + ?Sized> MessageQueue for Box<Q> {
    fn add(&mut self, message: Message) {
        (**self).add(message)
    }

    fn remove_next(&mut self) -> Option<Message> {
        (**self).remove_next()
    }

    fn reset_dropped(&mut self) -> usize {
        (**self).reset_dropped()
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn is_empty(&self) -> bool {
        (**self).is_empty()
    }
}

/// Remove messages until the queue is empty, polling again after a round
/// ends with `None`.
pub fn drain<Q: MessageQueue + ?Sized>(queue: &mut Q) -> Vec<Message> {
    let mut out = Vec::with_capacity(queue.len());
    let mut idle_rounds = 0;
    while !queue.is_empty() && idle_rounds < 2 {
        match queue.remove_next() {
            Some(message) => {
                idle_rounds = 0;
                out.push(message);
            }
            None => idle_rounds += 1,
        }
    }
    out
}
