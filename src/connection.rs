//! Live agent connection pool with idle eviction.
//!
//! One transport at most per conversation key. Connections are opened
//! lazily, reused across generations, and torn down by a periodic sweep
//! once they have been idle past the configured threshold.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::agent::{AgentConnector, AgentOptions, AgentTransport, TransportError};
use crate::key::ConversationKey;

struct ConnectionHandle {
    transport: Arc<dyn AgentTransport>,
    last_activity: Instant,
}

/// Pool of live transports keyed by conversation.
pub struct ConnectionManager {
    connector: Arc<dyn AgentConnector>,
    handles: DashMap<String, ConnectionHandle>,
    idle_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn AgentConnector>, idle_timeout: Duration) -> Self {
        Self {
            connector,
            handles: DashMap::new(),
            idle_timeout,
        }
    }

    /// Return the live transport for a key, opening one if needed.
    ///
    /// A failed connect is retried once; the second failure propagates.
    pub async fn ensure_connected(
        &self,
        key: &ConversationKey,
        options: &AgentOptions,
    ) -> std::result::Result<Arc<dyn AgentTransport>, TransportError> {
        let storage_key = key.storage_key();

        if let Some(mut handle) = self.handles.get_mut(&storage_key) {
            handle.last_activity = Instant::now();
            return Ok(handle.transport.clone());
        }

        let transport = match self.connector.connect(options).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!(key = %key, error = %e, "Agent connect failed, retrying once");
                self.connector.connect(options).await?
            }
        };

        debug!(key = %key, "Agent session connected");
        self.handles.insert(
            storage_key,
            ConnectionHandle {
                transport: transport.clone(),
                last_activity: Instant::now(),
            },
        );
        Ok(transport)
    }

    /// Refresh the idle clock for a key after successful activity.
    pub fn touch(&self, key: &ConversationKey) {
        if let Some(mut handle) = self.handles.get_mut(&key.storage_key()) {
            handle.last_activity = Instant::now();
        }
    }

    /// Drop and close the transport for a key, if any.
    pub async fn disconnect(&self, key: &ConversationKey) {
        if let Some((_, handle)) = self.handles.remove(&key.storage_key()) {
            handle.transport.close().await;
            debug!(key = %key, "Agent session disconnected");
        }
    }

    /// Close every connection idle past the threshold. Returns how many
    /// were evicted.
    pub async fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let idle_keys: Vec<String> = self
            .handles
            .iter()
            .filter(|entry| now.duration_since(entry.value().last_activity) > self.idle_timeout)
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for storage_key in idle_keys {
            if let Some((_, handle)) = self.handles.remove(&storage_key) {
                info!(key = %storage_key, "Disconnecting idle agent session");
                handle.transport.close().await;
                evicted += 1;
            }
        }
        evicted
    }

    /// Close every live connection.
    pub async fn shutdown(&self) {
        let storage_keys: Vec<String> = self
            .handles
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for storage_key in storage_keys {
            if let Some((_, handle)) = self.handles.remove(&storage_key) {
                handle.transport.close().await;
            }
        }
    }

    pub fn contains(&self, key: &ConversationKey) -> bool {
        self.handles.contains_key(&key.storage_key())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
