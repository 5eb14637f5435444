//! Conversation identity used to scope sessions, locks, and connections.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of one logical conversation thread.
///
/// `thread_id` is 0 when the chat has no sub-thread. In multi-party chats the
/// requester is normalized to 0 so every participant shares one agent session;
/// in one-to-one chats it is the actual participant id. At most one agent
/// session is active per key at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub chat_id: i64,
    pub thread_id: i64,
    pub requester_id: i64,
}

impl ConversationKey {
    pub fn new(chat_id: i64, thread_id: i64, requester_id: i64) -> Self {
        Self {
            chat_id,
            thread_id,
            requester_id,
        }
    }

    /// Key for a one-to-one conversation with a single requester.
    pub fn direct(chat_id: i64, thread_id: i64, requester_id: i64) -> Self {
        Self::new(chat_id, thread_id, requester_id)
    }

    /// Key for a multi-party conversation: all participants share one session.
    pub fn shared(chat_id: i64, thread_id: i64) -> Self {
        Self::new(chat_id, thread_id, 0)
    }

    /// Composite storage key: `chat_id:thread_id:requester_id`.
    pub fn storage_key(&self) -> String {
        format!("{}:{}:{}", self.chat_id, self.thread_id, self.requester_id)
    }

    /// Parse a storage key back into a `ConversationKey`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split(':');
        let chat_id = parts.next()?.parse().ok()?;
        let thread_id = parts.next()?.parse().ok()?;
        let requester_id = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(chat_id, thread_id, requester_id))
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.chat_id, self.thread_id, self.requester_id
        )
    }
}
