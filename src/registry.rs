//! Durable mapping from conversations to resumable agent session ids.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::key::ConversationKey;
use crate::table::{DurableTable, Result};

/// One persisted session entry.
///
/// `agent_session_id` is replaced whenever the agent returns a new one;
/// sessions may rotate across generations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Durable registry of the last-known resumable session id per conversation.
///
/// Backed by one JSON table rewritten atomically on every mutation. Reads
/// always re-load from disk so multiple processes observe a consistent view.
pub struct SessionRegistry {
    table: DurableTable<SessionRecord>,
}

impl SessionRegistry {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            table: DurableTable::new(path.as_ref()),
        }
    }

    /// Look up the resumable session id for a key.
    pub async fn get(&self, key: &ConversationKey) -> Option<String> {
        self.table
            .load()
            .await
            .remove(&key.storage_key())
            .and_then(|record| record.session_id)
    }

    /// Full record for a key, including its update timestamp.
    pub async fn record(&self, key: &ConversationKey) -> Option<SessionRecord> {
        self.table.load().await.remove(&key.storage_key())
    }

    /// Store a session id for a key, stamping `updated_at`.
    pub async fn set(&self, key: &ConversationKey, session_id: &str) -> Result<()> {
        let storage_key = key.storage_key();
        let session_id = session_id.to_string();
        self.table
            .mutate(move |map| {
                map.insert(
                    storage_key,
                    SessionRecord {
                        session_id: Some(session_id),
                        updated_at: Utc::now(),
                    },
                );
            })
            .await?;
        debug!(key = %key, "Session id stored");
        Ok(())
    }

    /// Drop the entry for a key (user-initiated fresh start).
    pub async fn clear(&self, key: &ConversationKey) -> Result<()> {
        let storage_key = key.storage_key();
        self.table
            .mutate(move |map| {
                map.remove(&storage_key);
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> SessionRegistry {
        SessionRegistry::new(dir.path().join("sessions.json"))
    }

    #[tokio::test]
    async fn set_then_get_returns_id() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let key = ConversationKey::new(1, 0, 99);

        registry.set(&key, "sess-abc").await.unwrap();
        assert_eq!(registry.get(&key).await, Some("sess-abc".to_string()));
    }

    #[tokio::test]
    async fn clear_removes_entry() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let key = ConversationKey::new(1, 0, 99);

        registry.set(&key, "sess-abc").await.unwrap();
        registry.clear(&key).await.unwrap();
        assert_eq!(registry.get(&key).await, None);
    }

    #[tokio::test]
    async fn get_unknown_key_is_absent() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        assert_eq!(registry.get(&ConversationKey::new(5, 0, 5)).await, None);
    }

    #[tokio::test]
    async fn set_replaces_rotated_session_id() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let key = ConversationKey::new(1, 0, 99);

        registry.set(&key, "first").await.unwrap();
        registry.set(&key, "second").await.unwrap();
        assert_eq!(registry.get(&key).await, Some("second".to_string()));
    }

    #[tokio::test]
    async fn set_stamps_updated_at() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let key = ConversationKey::new(1, 0, 99);

        let before = Utc::now();
        registry.set(&key, "sess").await.unwrap();
        let record = registry.record(&key).await.unwrap();
        assert!(record.updated_at >= before);
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");
        std::fs::write(&path, "not json").unwrap();

        let registry = SessionRegistry::new(&path);
        assert_eq!(registry.get(&ConversationKey::new(1, 0, 99)).await, None);

        // A write must still succeed afterwards.
        registry
            .set(&ConversationKey::new(1, 0, 99), "sess")
            .await
            .unwrap();
        assert_eq!(
            registry.get(&ConversationKey::new(1, 0, 99)).await,
            Some("sess".to_string())
        );
    }

    #[tokio::test]
    async fn entries_are_isolated_per_key() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let a = ConversationKey::new(1, 0, 99);
        let b = ConversationKey::new(2, 0, 88);

        registry.set(&a, "sess-a").await.unwrap();
        registry.set(&b, "sess-b").await.unwrap();
        registry.clear(&a).await.unwrap();

        assert_eq!(registry.get(&a).await, None);
        assert_eq!(registry.get(&b).await, Some("sess-b".to_string()));
    }
}
