//! Priority queue with per-category fairness.
//!
//! Messages are sorted into categories, highest priority first:
//!
//! | Category  | Order inside                   | Capacity |
//! |-----------|--------------------------------|----------|
//! | Watchdog  | newest first                   | watchdog |
//! | Push      | priority, newest first         | big      |
//! | Reply     | priority, newest first         | big      |
//! | Query     | fewest hops, newest first      | small    |
//! | Pong      | fewest hops, newest first      | small    |
//! | Ping      | newest first                   | small    |
//! | Control   | FIFO                           | no limit |
//!
//! `remove_next` walks the categories in that order. Each category may hand
//! out up to its cycle size per round. When the walk reaches the end the
//! round is over: counters reset and `None` is returned once, even if
//! messages remain.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::bucket::{Bucket, FifoBucket, KeyFn, PriorityBucket};
use super::MessageQueue;
use crate::protocol::{Message, MessageKind};

/// Default age limit for queued messages.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
/// Default capacity of the push, reply and control-adjacent categories.
pub const DEFAULT_BIG_CAPACITY: usize = 100;
/// Default capacity of the query, pong and ping categories.
pub const DEFAULT_SMALL_CAPACITY: usize = 1;
/// Default capacity of the watchdog category.
pub const DEFAULT_WATCHDOG_CAPACITY: usize = 1;

/// Scheduling category, in send order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Watchdog,
    Push,
    Reply,
    Query,
    Pong,
    Ping,
    Control,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Watchdog,
        Category::Push,
        Category::Reply,
        Category::Query,
        Category::Pong,
        Category::Ping,
        Category::Control,
    ];

    /// Category a message is scheduled in.
    pub fn of(message: &Message) -> Self {
        if message.is_watchdog() {
            return Category::Watchdog;
        }
        match message.kind() {
            MessageKind::PushRequest => Category::Push,
            MessageKind::QueryReply => Category::Reply,
            MessageKind::QueryRequest => Category::Query,
            MessageKind::PingReply => Category::Pong,
            MessageKind::PingRequest => Category::Ping,
            MessageKind::RouteTableReset
            | MessageKind::RouteTablePatch
            | MessageKind::Vendor { .. } => Category::Control,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Messages each category may send per round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleSizes {
    pub watchdog: usize,
    pub push: usize,
    pub reply: usize,
    pub query: usize,
    pub pong: usize,
    pub ping: usize,
    pub control: usize,
}

impl CycleSizes {
    /// First category whose cycle size is zero.
    pub fn zero_category(&self) -> Option<Category> {
        Category::ALL.into_iter().find(|&category| self.get(category) == 0)
    }

    fn get(&self, category: Category) -> usize {
        match category {
            Category::Watchdog => self.watchdog,
            Category::Push => self.push,
            Category::Reply => self.reply,
            Category::Query => self.query,
            Category::Pong => self.pong,
            Category::Ping => self.ping,
            Category::Control => self.control,
        }
    }
}

impl Default for CycleSizes {
    fn default() -> Self {
        Self {
            watchdog: 1,
            push: 6,
            reply: 6,
            query: 1,
            pong: 1,
            ping: 1,
            control: 1,
        }
    }
}

/// Limits for a [`CompositeQueue`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeQueueConfig {
    /// Age after which queued messages are dropped.
    pub timeout_ms: u64,
    pub big_capacity: usize,
    pub small_capacity: usize,
    pub watchdog_capacity: usize,
    pub cycles: CycleSizes,
}

impl CompositeQueueConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn capacity(&self, category: Category) -> usize {
        match category {
            Category::Watchdog => self.watchdog_capacity,
            Category::Push | Category::Reply => self.big_capacity,
            Category::Query | Category::Pong | Category::Ping => self.small_capacity,
            Category::Control => usize::MAX,
        }
    }
}

impl Default for CompositeQueueConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            big_capacity: DEFAULT_BIG_CAPACITY,
            small_capacity: DEFAULT_SMALL_CAPACITY,
            watchdog_capacity: DEFAULT_WATCHDOG_CAPACITY,
            cycles: CycleSizes::default(),
        }
    }
}

fn by_priority(message: &Message) -> i64 {
    message.priority() as i64
}

fn by_fewest_hops(message: &Message) -> i64 {
    -(message.hops() as i64)
}

fn newest_first(_: &Message) -> i64 {
    0
}

/// Category-based scheduler.
#[derive(Debug)]
pub struct CompositeQueue {
    buckets: Vec<Bucket>,
    cycle_sizes: [usize; 7],
    sent_this_cycle: [usize; 7],
    cursor: usize,
    len: usize,
    dropped: usize,
}

impl CompositeQueue {
    /// Queue with the standard limits.
    pub fn new() -> Self {
        Self::with_config(CompositeQueueConfig::default())
    }

    /// Queue with explicit age limit and capacities.
    pub fn with_limits(
        timeout: Duration,
        big_capacity: usize,
        small_capacity: usize,
        watchdog_capacity: usize,
    ) -> Self {
        Self::with_config(CompositeQueueConfig {
            timeout_ms: timeout.as_millis() as u64,
            big_capacity,
            small_capacity,
            watchdog_capacity,
            cycles: CycleSizes::default(),
        })
    }

    pub fn with_config(config: CompositeQueueConfig) -> Self {
        let timeout = Some(config.timeout());
        let buckets = Category::ALL
            .iter()
            .map(|&category| {
                let key: KeyFn = match category {
                    Category::Push | Category::Reply => by_priority,
                    Category::Query | Category::Pong => by_fewest_hops,
                    Category::Watchdog | Category::Ping | Category::Control => newest_first,
                };
                match category {
                    Category::Control => Bucket::Fifo(FifoBucket::new()),
                    _ => Bucket::Priority(PriorityBucket::new(
                        key,
                        config.capacity(category),
                        timeout,
                    )),
                }
            })
            .collect();

        let mut cycle_sizes = [0usize; 7];
        for category in Category::ALL {
            cycle_sizes[category.index()] = config.cycles.get(category).max(1);
        }

        Self {
            buckets,
            cycle_sizes,
            sent_this_cycle: [0; 7],
            cursor: 0,
            len: 0,
            dropped: 0,
        }
    }

    /// Messages queued in one category.
    pub fn category_len(&self, category: Category) -> usize {
        self.buckets[category.index()].len()
    }

    fn expire(&mut self) {
        for bucket in &mut self.buckets {
            bucket.expire();
        }
        self.collect_dropped();
    }

    fn collect_dropped(&mut self) {
        let mut dropped = 0;
        for bucket in &mut self.buckets {
            dropped += bucket.take_dropped();
        }
        if dropped > 0 {
            tracing::debug!("Outgoing queue dropped {} messages", dropped);
            self.dropped += dropped;
            self.len -= dropped;
        }
    }

    fn end_cycle(&mut self) {
        self.cursor = 0;
        self.sent_this_cycle = [0; 7];
    }
}

impl Default for CompositeQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue for CompositeQueue {
    fn add(&mut self, message: Message) {
        self.expire();
        let category = Category::of(&message);
        self.buckets[category.index()].add(message);
        self.len += 1;
        self.collect_dropped();
    }

    fn remove_next(&mut self) -> Option<Message> {
        self.expire();
        while self.cursor < self.buckets.len() {
            let i = self.cursor;
            if self.sent_this_cycle[i] < self.cycle_sizes[i] {
                if let Some(message) = self.buckets[i].remove_next() {
                    self.sent_this_cycle[i] += 1;
                    self.len -= 1;
                    return Some(message);
                }
            }
            self.cursor += 1;
        }
        self.end_cycle();
        None
    }

    fn reset_dropped(&mut self) -> usize {
        std::mem::take(&mut self.dropped)
    }

    fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::protocol::{vendor, Guid};
    use crate::queue::drain;

    fn roomy() -> CompositeQueue {
        CompositeQueue::with_limits(Duration::from_secs(60), 1000, 1000, 1000)
    }

    fn reply(priority: i32) -> Message {
        let mut m = Message::query_reply(Guid::new_random(), 3, vec![0u8; 26].into()).unwrap();
        m.set_priority(priority);
        m
    }

    fn query_with_hops(hops: u8) -> Message {
        let mut m = Message::query(3, 0, "x");
        for _ in 0..hops {
            m.hop();
        }
        m
    }

    fn pong_with_hops(hops: u8) -> Message {
        let mut m = Message::pong(Guid::new_random(), 5, 6346, [1, 2, 3, 4], 0, 0);
        for _ in 0..hops {
            m.hop();
        }
        m
    }

    fn push() -> Message {
        Message::push(3, Guid::new_random(), 0, [1, 2, 3, 4], 6346)
    }

    #[test]
    fn test_category_assignment() {
        assert_eq!(Category::of(&Message::ping(1)), Category::Watchdog);
        assert_eq!(Category::of(&Message::ping(4)), Category::Ping);
        assert_eq!(Category::of(&push()), Category::Push);
        assert_eq!(Category::of(&reply(0)), Category::Reply);
        assert_eq!(Category::of(&query_with_hops(0)), Category::Query);
        assert_eq!(Category::of(&pong_with_hops(1)), Category::Pong);
        assert_eq!(Category::of(&Message::route_table_reset(1, 7)), Category::Control);
        assert_eq!(
            Category::of(&Message::vendor(vendor::GTKG, 21, 1, &[])),
            Category::Control
        );
    }

    #[test]
    fn test_category_order() {
        let mut queue = roomy();
        let control = Message::vendor(vendor::NULL, 0, 1, &[]);
        let ping = Message::ping(5);
        let pong = pong_with_hops(1);
        let query = query_with_hops(1);
        let reply = reply(0);
        let push = push();
        let watchdog = Message::ping(1);

        for m in [&control, &ping, &pong, &query, &reply, &push, &watchdog] {
            queue.add((*m).clone());
        }

        let order: Vec<Guid> = drain(&mut queue).iter().map(|m| m.guid()).collect();
        let expected: Vec<Guid> = [&watchdog, &push, &reply, &query, &pong, &ping, &control]
            .iter()
            .map(|m| m.guid())
            .collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn test_replies_by_descending_priority() {
        let mut queue = roomy();
        let low = reply(1);
        let high = reply(10);
        let mid_old = reply(5);
        let mid_new = reply(5);
        for m in [&low, &mid_old, &high, &mid_new] {
            queue.add((*m).clone());
        }

        let order: Vec<Guid> = drain(&mut queue).iter().map(|m| m.guid()).collect();
        assert_eq!(order, vec![high.guid(), mid_new.guid(), mid_old.guid(), low.guid()]);
    }

    #[test]
    fn test_queries_by_ascending_hops_lifo() {
        let mut queue = roomy();
        let far = query_with_hops(2);
        let near_old = query_with_hops(0);
        let near_new = query_with_hops(0);
        let mid = query_with_hops(1);
        for m in [&far, &near_old, &near_new, &mid] {
            queue.add((*m).clone());
        }

        let order: Vec<Guid> = drain(&mut queue).iter().map(|m| m.guid()).collect();
        assert_eq!(
            order,
            vec![near_new.guid(), near_old.guid(), mid.guid(), far.guid()]
        );
    }

    #[test]
    fn test_control_fifo_survives_push_flood() {
        let mut queue = CompositeQueue::new();
        let mut controls = Vec::new();
        for i in 0..1000 {
            queue.add(push());
            if i % 10 == 0 {
                let c = Message::route_table_patch(1, 1, 0, 4, &[i as u8]);
                controls.push(c.guid());
                queue.add(c);
            }
        }

        let sent_controls: Vec<Guid> = drain(&mut queue)
            .iter()
            .filter(|m| Category::of(m) == Category::Control)
            .map(|m| m.guid())
            .collect();
        assert_eq!(sent_controls, controls);
        // Pushes beyond the big capacity were dropped.
        assert_eq!(queue.reset_dropped(), 900);
    }

    #[test]
    fn test_cycle_returns_none_between_rounds() {
        let mut queue = roomy();
        for _ in 0..3 {
            queue.add(query_with_hops(1));
        }

        assert!(queue.remove_next().is_some());
        // Query cycle size is 1: the round ends.
        assert!(queue.remove_next().is_none());
        assert_eq!(queue.len(), 2);
        assert!(queue.remove_next().is_some());
        assert!(queue.remove_next().is_none());
        assert!(queue.remove_next().is_some());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_cycle_size_interleaves_with_replies() {
        let mut queue = roomy();
        for _ in 0..8 {
            queue.add(push());
        }
        for _ in 0..2 {
            queue.add(reply(0));
        }

        let kinds: Vec<Category> = drain(&mut queue).iter().map(Category::of).collect();
        let mut expected = vec![Category::Push; 6];
        expected.extend([Category::Reply, Category::Reply, Category::Push, Category::Push]);
        assert_eq!(kinds, expected);
    }

    #[test]
    fn test_small_capacity_keeps_newest() {
        let mut queue = CompositeQueue::new();
        let old = query_with_hops(1);
        let new = query_with_hops(1);
        queue.add(old);
        queue.add(new.clone());

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.reset_dropped(), 1);
        assert_eq!(queue.reset_dropped(), 0);
        assert_eq!(queue.remove_next().unwrap().guid(), new.guid());
    }

    #[test]
    fn test_expired_messages_dropped() {
        let mut queue = CompositeQueue::with_limits(Duration::from_millis(100), 10, 10, 10);
        let long_ago = match Instant::now().checked_sub(Duration::from_secs(10)) {
            Some(t) => t,
            None => return,
        };
        queue.add(push().with_created(long_ago));
        queue.add(reply(0).with_created(long_ago));
        let fresh = push();
        queue.add(fresh.clone());

        assert_eq!(queue.reset_dropped(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.remove_next().unwrap().guid(), fresh.guid());
    }

    #[test]
    fn test_control_never_expires() {
        let mut queue = CompositeQueue::with_limits(Duration::from_millis(1), 1, 1, 1);
        let long_ago = match Instant::now().checked_sub(Duration::from_secs(10)) {
            Some(t) => t,
            None => return,
        };
        for _ in 0..5 {
            queue.add(Message::route_table_reset(1, 7).with_created(long_ago));
        }
        assert_eq!(drain(&mut queue).len(), 5);
        assert_eq!(queue.reset_dropped(), 0);
    }

    #[test]
    fn test_zero_cycle_size_still_drains() {
        let config = CompositeQueueConfig {
            cycles: CycleSizes {
                query: 0,
                ..CycleSizes::default()
            },
            ..CompositeQueueConfig::default()
        };
        assert_eq!(config.cycles.zero_category(), Some(Category::Query));
        assert_eq!(CycleSizes::default().zero_category(), None);

        let mut queue = CompositeQueue::with_config(config);
        queue.add(Message::query(3, 0, "x"));
        assert_eq!(drain(&mut queue).len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: CompositeQueueConfig =
            serde_json::from_str(r#"{"cycles": {"push": 2}}"#).unwrap();
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.cycles.push, 2);
        assert_eq!(config.cycles.reply, 6);
    }
}
