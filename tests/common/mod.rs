//! Shared fixtures for integration tests: a scriptable agent and capturing
//! sinks.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use tempfile::TempDir;

use courier::{
    AgentConnector, AgentEvent, AgentEventStream, AgentOptions, AgentTransport, Config,
    ConversationKey, SinkFactory, StreamUpdate, TransportError, UpdateSink,
};

/// One scripted generation feed. `Stall` never terminates after its events,
/// which is how timeout behavior gets exercised.
#[derive(Clone)]
pub enum Feed {
    Events(Vec<Result<AgentEvent, TransportError>>),
    Stall(Vec<Result<AgentEvent, TransportError>>),
}

pub fn result_event(text: &str, session_id: Option<&str>) -> Result<AgentEvent, TransportError> {
    Ok(AgentEvent::Result {
        text: text.to_string(),
        session_id: session_id.map(str::to_string),
    })
}

#[derive(Default)]
struct MockState {
    connects: AtomicUsize,
    connect_failures: AtomicUsize,
    closes: AtomicUsize,
    feeds: Mutex<VecDeque<Feed>>,
    prompts: Mutex<Vec<String>>,
    resume_ids: Mutex<Vec<Option<String>>>,
}

/// Scriptable agent backend. Feeds are consumed in order, one per request;
/// when none are scripted the request yields a plain "ok" result carrying a
/// fixed session id.
#[derive(Clone, Default)]
pub struct MockAgent {
    state: Arc<MockState>,
}

pub const DEFAULT_SESSION_ID: &str = "mock-session";

impl MockAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.state.connect_failures.store(n, Ordering::SeqCst);
    }

    pub fn push_feed(&self, feed: Feed) {
        self.state.feeds.lock().unwrap().push_back(feed);
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.state.prompts.lock().unwrap().clone()
    }

    pub fn resume_ids(&self) -> Vec<Option<String>> {
        self.state.resume_ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentConnector for MockAgent {
    async fn connect(
        &self,
        options: &AgentOptions,
    ) -> Result<Arc<dyn AgentTransport>, TransportError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.state
            .resume_ids
            .lock()
            .unwrap()
            .push(options.resume_session_id.clone());

        if self
            .state
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Connect("scripted failure".to_string()));
        }
        Ok(Arc::new(MockTransport {
            state: self.state.clone(),
        }))
    }
}

struct MockTransport {
    state: Arc<MockState>,
}

#[async_trait]
impl AgentTransport for MockTransport {
    async fn request(&self, prompt: &str) -> Result<AgentEventStream, TransportError> {
        self.state.prompts.lock().unwrap().push(prompt.to_string());

        let feed = self
            .state
            .feeds
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Feed::Events(vec![result_event("ok", Some(DEFAULT_SESSION_ID))]));

        match feed {
            Feed::Events(events) => Ok(Box::pin(stream::iter(events))),
            Feed::Stall(events) => Ok(Box::pin(stream::iter(events).chain(stream::pending()))),
        }
    }

    async fn close(&self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sink that records every update it receives.
#[derive(Default)]
pub struct CaptureSink {
    updates: Mutex<Vec<StreamUpdate>>,
}

impl CaptureSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> Vec<StreamUpdate> {
        self.updates.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter_map(|u| match u {
                StreamUpdate::Error { text } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn results(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter_map(|u| match u {
                StreamUpdate::Result { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl UpdateSink for CaptureSink {
    async fn update(&self, update: StreamUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

/// Sink factory handing out one capture sink per conversation.
#[derive(Default)]
pub struct SinkMap {
    sinks: Mutex<HashMap<String, Arc<CaptureSink>>>,
}

impl SinkMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture_for(&self, key: &ConversationKey) -> Arc<CaptureSink> {
        self.sinks
            .lock()
            .unwrap()
            .entry(key.storage_key())
            .or_default()
            .clone()
    }
}

impl SinkFactory for SinkMap {
    fn sink_for(&self, key: &ConversationKey) -> Arc<dyn UpdateSink> {
        self.capture_for(key)
    }
}

/// Route crate logs to the test output when RUST_LOG is set.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Config pointed at a temp dir with windows shrunk for real-time tests.
pub fn test_config(dir: &TempDir) -> Config {
    init_tracing();
    let mut config = Config::default();
    config.sessions_file = dir.path().join("sessions.json");
    config.ledger_file = dir.path().join("active.json");
    config.restart_file = dir.path().join("restart.json");
    config.batch_window_ms = 80;
    config.partial_edit_interval_ms = 1;
    config.generation_timeout_seconds = 2;
    config
}

/// Poll until `check` passes or the deadline hits.
pub async fn eventually<F>(deadline: Duration, mut check: F)
where
    F: FnMut() -> bool,
{
    let end = tokio::time::Instant::now() + deadline;
    loop {
        if check() {
            return;
        }
        if tokio::time::Instant::now() >= end {
            panic!("condition not met within {deadline:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
