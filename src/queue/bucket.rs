//! Per-category sub-queues used by [`CompositeQueue`](super::CompositeQueue).

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use crate::protocol::Message;

/// Sort key of a message inside a priority bucket. Larger goes first.
pub type KeyFn = fn(&Message) -> i64;

/// Bounded bucket ordered by key, newest first among equal keys.
///
/// Overflow evicts the oldest entry (by insertion), entries older than the
/// timeout are evicted by [`expire`](PriorityBucket::expire).
#[derive(Debug)]
pub struct PriorityBucket {
    entries: BTreeMap<(i64, u64), Message>,
    key: KeyFn,
    capacity: usize,
    timeout: Option<Duration>,
    next_seq: u64,
    dropped: usize,
}

impl PriorityBucket {
    pub fn new(key: KeyFn, capacity: usize, timeout: Option<Duration>) -> Self {
        Self {
            entries: BTreeMap::new(),
            key,
            capacity,
            timeout,
            next_seq: 0,
            dropped: 0,
        }
    }

    pub fn add(&mut self, message: Message) {
        let key = ((self.key)(&message), self.next_seq);
        self.next_seq += 1;
        self.entries.insert(key, message);

        while self.entries.len() > self.capacity {
            let oldest = self.entries.keys().min_by_key(|(_, seq)| *seq).copied();
            match oldest {
                Some(k) => {
                    self.entries.remove(&k);
                    self.dropped += 1;
                }
                None => break,
            }
        }
    }

    /// Highest key; among equal keys the most recently added.
    pub fn remove_next(&mut self) -> Option<Message> {
        self.entries.pop_last().map(|(_, m)| m)
    }

    /// Drop entries older than the timeout.
    pub fn expire(&mut self) {
        let timeout = match self.timeout {
            Some(t) => t,
            None => return,
        };
        let before = self.entries.len();
        self.entries.retain(|_, m| m.age() <= timeout);
        self.dropped += before - self.entries.len();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn take_dropped(&mut self) -> usize {
        std::mem::take(&mut self.dropped)
    }
}

/// Unbounded first-in, first-out bucket. Never drops.
#[derive(Debug, Default)]
pub struct FifoBucket {
    entries: VecDeque<Message>,
}

impl FifoBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, message: Message) {
        self.entries.push_back(message);
    }

    pub fn remove_next(&mut self) -> Option<Message> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One category's storage.
#[derive(Debug)]
pub enum Bucket {
    Priority(PriorityBucket),
    Fifo(FifoBucket),
}

impl Bucket {
    pub fn add(&mut self, message: Message) {
        match self {
            Bucket::Priority(b) => b.add(message),
            Bucket::Fifo(b) => b.add(message),
        }
    }

    pub fn remove_next(&mut self) -> Option<Message> {
        match self {
            Bucket::Priority(b) => b.remove_next(),
            Bucket::Fifo(b) => b.remove_next(),
        }
    }

    pub fn expire(&mut self) {
        if let Bucket::Priority(b) = self {
            b.expire();
        }
    }

    pub fn take_dropped(&mut self) -> usize {
        match self {
            Bucket::Priority(b) => b.take_dropped(),
            Bucket::Fifo(_) => 0,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Bucket::Priority(b) => b.len(),
            Bucket::Fifo(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
