//! Chat scrollback.
//!
//! Bounded, append-only log of chat and system messages. Delivery to the
//! application happens on the event stream; this log only serves
//! `chat_history` for late subscribers.

use chrono::{DateTime, Utc};
use signal_protocol::{ChatPayload, SessionId};
use std::collections::VecDeque;

/// One scrollback entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    /// Sender session; `None` for server-originated notices.
    pub sender_session: Option<SessionId>,
    /// Sender display name at send time, or a server label.
    pub sender_name: String,
    /// Message text.
    pub text: String,
    /// Delivery timestamp.
    pub timestamp: DateTime<Utc>,
    /// True for server-originated notices.
    pub system: bool,
}

impl ChatEntry {
    pub fn from_payload(payload: ChatPayload) -> Self {
        Self {
            sender_session: Some(payload.sender_session),
            sender_name: payload.sender_name,
            text: payload.text,
            timestamp: payload.timestamp,
            system: false,
        }
    }

    pub fn system(text: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            sender_session: None,
            sender_name: "system".to_string(),
            text,
            timestamp,
            system: true,
        }
    }
}

/// Bounded scrollback; oldest entries are evicted at capacity.
#[derive(Debug)]
pub struct ChatLog {
    entries: VecDeque<ChatEntry>,
    capacity: usize,
}

impl ChatLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub fn push(&mut self, entry: ChatEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Oldest-first copy of the scrollback.
    pub fn history(&self) -> Vec<ChatEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
