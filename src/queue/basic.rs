//! First-in, first-out queue.

use std::collections::VecDeque;

use super::MessageQueue;
use crate::protocol::Message;

/// Sends messages in the order they were added. Never drops or expires.
#[derive(Debug, Default)]
pub struct BasicQueue {
    messages: VecDeque<Message>,
}

impl BasicQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageQueue for BasicQueue {
    fn add(&mut self, message: Message) {
        self.messages.push_back(message);
    }

    fn remove_next(&mut self) -> Option<Message> {
        self.messages.pop_front()
    }

    fn reset_dropped(&mut self) -> usize {
        0
    }

    fn len(&self) -> usize {
        self.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = BasicQueue::new();
        let messages: Vec<Message> = (0..5).map(|i| Message::ping(i + 1)).collect();
        for m in &messages {
            queue.add(m.clone());
        }
        assert_eq!(queue.len(), 5);

        for expected in &messages {
            let got = queue.remove_next().unwrap();
            assert_eq!(got.guid(), expected.guid());
        }
        assert!(queue.remove_next().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_mixed_kinds_not_reordered() {
        let mut queue = BasicQueue::new();
        let query = Message::query(3, 0, "late");
        let ping = Message::ping(1);
        queue.add(query.clone());
        queue.add(ping.clone());
        assert_eq!(queue.remove_next().unwrap().guid(), query.guid());
        assert_eq!(queue.remove_next().unwrap().guid(), ping.guid());
        assert_eq!(queue.reset_dropped(), 0);
    }
}
