//! Bounded message history
//!
//! Strict FIFO window over the most recent room messages.

use std::collections::VecDeque;

use crate::message::Message;

/// Default number of retained messages per room
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// FIFO buffer capped at a fixed limit
#[derive(Debug)]
pub struct History {
    messages: VecDeque<Message>,
    limit: usize,
}

impl History {
    /// Create an empty history retaining at most `limit` messages
    pub fn new(limit: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(limit.min(DEFAULT_HISTORY_LIMIT)),
            limit,
        }
    }

    /// Append a message, evicting the oldest once the limit is exceeded
    ///
    /// Returns the evicted message, if any.
    pub fn push(&mut self, msg: Message) -> Option<Message> {
        if self.limit == 0 {
            return Some(msg);
        }
        self.messages.push_back(msg);
        if self.messages.len() > self.limit {
            self.messages.pop_front()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Oldest-first copy of the retained messages
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}
