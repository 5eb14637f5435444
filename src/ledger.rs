//! Crash-safe ledger of in-flight generations.
//!
//! A record is written before the agent call begins and removed after it
//! ends. If the process dies in between, the record survives on disk and
//! restart recovery picks it up. Under a controlled shutdown the removal is
//! deliberately skipped for the same reason.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::key::ConversationKey;
use crate::table::{DurableTable, Result};

/// One in-flight generation, keyed in the table by the conversation's
/// storage key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub chat_id: i64,
    pub thread_id: i64,
    pub requester_id: i64,
}

impl From<&ConversationKey> for GenerationRecord {
    fn from(key: &ConversationKey) -> Self {
        Self {
            chat_id: key.chat_id,
            thread_id: key.thread_id,
            requester_id: key.requester_id,
        }
    }
}

impl GenerationRecord {
    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(self.chat_id, self.thread_id, self.requester_id)
    }
}

/// Durable set of conversations with a generation currently executing.
///
/// The backing file is removed entirely when the ledger empties, so file
/// existence is a cheap "is anything in flight" check.
pub struct GenerationLedger {
    table: DurableTable<GenerationRecord>,
}

impl GenerationLedger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            table: DurableTable::new(path.as_ref()).delete_when_empty(),
        }
    }

    /// Mark a generation as in flight. Must be called before the agent call
    /// begins; this ordering is the crash-safety guarantee.
    pub async fn add(&self, key: &ConversationKey) -> Result<()> {
        let storage_key = key.storage_key();
        let record = GenerationRecord::from(key);
        self.table
            .mutate(move |map| {
                map.insert(storage_key, record);
            })
            .await
    }

    /// Clear a completed generation.
    pub async fn remove(&self, key: &ConversationKey) -> Result<()> {
        let storage_key = key.storage_key();
        self.table
            .mutate(move |map| {
                map.remove(&storage_key);
            })
            .await
    }

    /// Keys currently marked in flight.
    pub async fn snapshot(&self) -> Vec<ConversationKey> {
        self.table
            .load()
            .await
            .values()
            .map(GenerationRecord::key)
            .collect()
    }

    /// Read all outstanding keys and delete the backing file (consumed once
    /// at startup by restart recovery).
    pub async fn drain(&self) -> Vec<ConversationKey> {
        self.table
            .drain()
            .await
            .values()
            .map(GenerationRecord::key)
            .collect()
    }

    pub fn path(&self) -> &Path {
        self.table.path()
    }
}
