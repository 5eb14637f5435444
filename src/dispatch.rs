//! Turn dispatch: batching, per-conversation serialization, and generation
//! lifecycle.
//!
//! The dispatcher is the crate's entry point. Incoming texts sit in a short
//! batch window so rapid-fire messages become one combined prompt; each
//! conversation key runs at most one generation at a time; the in-flight
//! ledger brackets every agent call for crash recovery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::{AgentConnector, OptionsProvider};
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::key::ConversationKey;
use crate::ledger::GenerationLedger;
use crate::recovery::{self, RecoveryReport, SinkFactory};
use crate::registry::SessionRegistry;
use crate::stream::{Outcome, StreamMultiplexer, StreamUpdate, UpdateSink};
use crate::sync::{KeyedLocks, DEFAULT_MAX_IDLE_AGE};
use crate::table;

struct BatchSlot {
    pending_texts: Vec<String>,
    sink: Arc<dyn UpdateSink>,
    timer: JoinHandle<()>,
}

struct DispatcherInner {
    registry: Arc<SessionRegistry>,
    ledger: GenerationLedger,
    restart: GenerationLedger,
    connections: ConnectionManager,
    options: Arc<dyn OptionsProvider>,
    locks: KeyedLocks,
    batches: DashMap<String, BatchSlot>,
    mux: StreamMultiplexer,
    batch_window: Duration,
    sweep_interval: Duration,
    model: Option<String>,
    preamble: Option<String>,
    shutting_down: AtomicBool,
}

/// The orchestration front door. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(
        config: &Config,
        connector: Arc<dyn AgentConnector>,
        options: Arc<dyn OptionsProvider>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new(&config.sessions_file));
        let mux = StreamMultiplexer::new(
            registry.clone(),
            config.partial_edit_interval(),
            config.generation_timeout(),
        );
        Self {
            inner: Arc::new(DispatcherInner {
                registry,
                ledger: GenerationLedger::new(&config.ledger_file),
                restart: GenerationLedger::new(&config.restart_file),
                connections: ConnectionManager::new(connector, config.idle_timeout()),
                options,
                locks: KeyedLocks::new(),
                batches: DashMap::new(),
                mux,
                batch_window: config.batch_window(),
                sweep_interval: config.sweep_interval(),
                model: config.model.clone(),
                preamble: config.new_session_preamble.clone(),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn the periodic sweep: idle connection eviction plus stale lock
    /// cleanup. Runs until the runtime shuts down.
    pub fn spawn_sweeper(&self) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(dispatcher.inner.sweep_interval);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = dispatcher.inner.connections.sweep_idle().await;
                let dropped = dispatcher.inner.locks.cleanup_stale(DEFAULT_MAX_IDLE_AGE);
                if evicted > 0 || dropped > 0 {
                    debug!(evicted, dropped, "Sweep pass complete");
                }
            }
        });
    }

    /// Queue one incoming text for a conversation.
    ///
    /// Texts arriving within the batch window are combined into one prompt;
    /// every new text restarts the window and the most recent sink wins.
    pub fn submit(&self, key: ConversationKey, text: impl Into<String>, sink: Arc<dyn UpdateSink>) {
        let text = text.into();
        let storage_key = key.storage_key();
        let timer = self.spawn_flush_timer(key);

        match self.inner.batches.entry(storage_key) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let slot = entry.get_mut();
                slot.pending_texts.push(text);
                slot.sink = sink;
                slot.timer.abort();
                slot.timer = timer;
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(BatchSlot {
                    pending_texts: vec![text],
                    sink,
                    timer,
                });
            }
        }
    }

    fn spawn_flush_timer(&self, key: ConversationKey) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(dispatcher.inner.batch_window).await;
            // The flush runs detached: aborting the timer must only ever
            // cancel the sleep. A flush that has already claimed the buffer
            // has to run to completion or the claimed texts are lost.
            tokio::spawn(async move {
                dispatcher.flush(key).await;
            });
        })
    }

    /// Dispatch whatever is queued for a key right now. A no-op when the
    /// batch slot is empty (the timer already fired, or nothing was queued).
    pub async fn flush(&self, key: ConversationKey) {
        let Some((_, slot)) = self.inner.batches.remove(&key.storage_key()) else {
            return;
        };
        let prompt = slot.pending_texts.join("\n\n");
        info!(
            key = %key,
            messages = slot.pending_texts.len(),
            "Dispatching batched prompt"
        );
        self.run_generation(&key, prompt, slot.sink).await;
    }

    /// Run one generation end to end under the per-conversation lock.
    pub(crate) async fn run_generation(
        &self,
        key: &ConversationKey,
        prompt: String,
        sink: Arc<dyn UpdateSink>,
    ) -> Outcome {
        let lock = self.inner.locks.get(&key.storage_key());
        let _guard = lock.lock().await;

        let resume_id = self.inner.registry.get(key).await;
        let mut options = self.inner.options.options_for(key);
        if options.model.is_none() {
            options.model = self.inner.model.clone();
        }
        options.resume_session_id = resume_id.clone();

        let prompt = match (&resume_id, &self.inner.preamble) {
            (None, Some(preamble)) => format!("{preamble}\n\n{prompt}"),
            _ => prompt,
        };

        // Ledger entry goes in before the agent is touched so a crash at any
        // point leaves a recoverable record.
        if let Err(e) = self.inner.ledger.add(key).await {
            warn!(key = %key, error = %e, "Failed to record in-flight generation");
        }

        let outcome = self.generate(key, &options, &prompt, &sink).await;

        // A silent outcome means the agent process was killed out from under
        // us (restart) or its feed just stopped; either way the turn never
        // reached the user, so the entry stays for restart recovery. Same on
        // a controlled shutdown.
        if self.inner.shutting_down.load(Ordering::SeqCst) || outcome == Outcome::Silent {
            debug!(key = %key, "Generation interrupted, leaving ledger entry for recovery");
        } else if let Err(e) = self.inner.ledger.remove(key).await {
            warn!(key = %key, error = %e, "Failed to clear in-flight generation");
        }

        outcome
    }

    async fn generate(
        &self,
        key: &ConversationKey,
        options: &crate::agent::AgentOptions,
        prompt: &str,
        sink: &Arc<dyn UpdateSink>,
    ) -> Outcome {
        let transport = match self.inner.connections.ensure_connected(key, options).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!(key = %key, error = %e, "Could not reach the agent");
                let text = format!("Failed to connect to the agent: {e}");
                sink.update(StreamUpdate::Error { text: text.clone() }).await;
                return Outcome::Error(text);
            }
        };

        let outcome = self.inner.mux.run(key, &transport, prompt, sink).await;

        match &outcome {
            Outcome::Result(_) => self.inner.connections.touch(key),
            // Drop the connection so the next turn starts from a clean
            // transport.
            Outcome::Error(_) | Outcome::Silent => self.inner.connections.disconnect(key).await,
        }
        outcome
    }

    /// Forget the conversation's session and tear down its connection. The
    /// next turn starts a brand-new agent session.
    pub async fn reset(&self, key: &ConversationKey) -> table::Result<()> {
        self.inner.connections.disconnect(key).await;
        self.inner.registry.clear(key).await?;
        info!(key = %key, "Conversation reset");
        Ok(())
    }

    /// Resume every generation that was in flight when the previous process
    /// died or restarted.
    pub async fn recover_on_startup(&self, sinks: &dyn SinkFactory) -> RecoveryReport {
        recovery::recover(self, sinks).await
    }

    /// Stop accepting completions: pending batches are dropped, ledger
    /// entries for still-running generations stay on disk for the next
    /// process, and every live connection is closed.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        let storage_keys: Vec<String> = self
            .inner
            .batches
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for storage_key in storage_keys {
            if let Some((_, slot)) = self.inner.batches.remove(&storage_key) {
                slot.timer.abort();
            }
        }

        self.inner.connections.shutdown().await;
        info!("Dispatcher shut down");
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    pub fn ledger(&self) -> &GenerationLedger {
        &self.inner.ledger
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.inner.connections
    }

    pub(crate) fn restart_ledger(&self) -> &GenerationLedger {
        &self.inner.restart
    }
}
