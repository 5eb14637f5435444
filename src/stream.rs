//! Projection of the raw agent event feed into front-end updates.
//!
//! One multiplexer run covers one generation: it turns tool activity into
//! status lines, coalesces text deltas into rate-limited partial edits,
//! persists rotated session ids, and enforces the generation deadline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::agent::{AgentEvent, AgentTransport, TransportError};
use crate::key::ConversationKey;
use crate::label::{finished_label, tool_label};
use crate::registry::SessionRegistry;

/// Terse deadline message surfaced to the user; detail goes to the log.
pub const TIMEOUT_MESSAGE: &str =
    "The agent took too long to respond. Try again or reset the conversation.";

// ============================================================================
// Updates and Outcomes
// ============================================================================

/// One projected update for the front-end.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    /// A tool invocation started; `label` is the human-readable status line.
    ToolStarted { label: String },
    /// The previous tool invocation finished; `label` is its checkmark form.
    ToolFinished { label: String },
    /// Rate-limited snapshot of the answer accumulated so far.
    Partial { text: String },
    /// Terminal answer.
    Result {
        text: String,
        session_id: Option<String>,
    },
    /// Terminal user-facing error text.
    Error { text: String },
    /// The generation ended without anything to show (deliberate restart
    /// kill, or a feed that closed with no terminal event).
    Silent,
}

/// Where projected updates go. The host implements this over its front-end
/// (message edits, websockets, whatever it has).
#[async_trait]
pub trait UpdateSink: Send + Sync {
    async fn update(&self, update: StreamUpdate);
}

#[async_trait]
impl UpdateSink for tokio::sync::mpsc::Sender<StreamUpdate> {
    async fn update(&self, update: StreamUpdate) {
        // A dropped receiver just means nobody is watching anymore.
        let _ = self.send(update).await;
    }
}

/// Terminal outcome of one generation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Result(String),
    Error(String),
    Silent,
}

// ============================================================================
// Multiplexer
// ============================================================================

/// Runs one generation's event feed to completion.
pub struct StreamMultiplexer {
    registry: Arc<SessionRegistry>,
    partial_interval: Duration,
    deadline: Duration,
}

struct Projection<'a> {
    sink: &'a Arc<dyn UpdateSink>,
    active_tool: Option<String>,
    in_tool: bool,
    partial: String,
    last_partial_emit: Option<Instant>,
    last_emitted_len: usize,
}

impl<'a> Projection<'a> {
    fn new(sink: &'a Arc<dyn UpdateSink>) -> Self {
        Self {
            sink,
            active_tool: None,
            in_tool: false,
            partial: String::new(),
            last_partial_emit: None,
            last_emitted_len: 0,
        }
    }

    async fn close_tool_line(&mut self) {
        if let Some(active) = self.active_tool.take() {
            self.sink
                .update(StreamUpdate::ToolFinished {
                    label: finished_label(&active),
                })
                .await;
        }
    }

    async fn tool_started(&mut self, name: &str, input: &serde_json::Value) {
        self.close_tool_line().await;
        self.in_tool = true;
        self.partial.clear();
        self.last_emitted_len = 0;
        let label = tool_label(name, input);
        self.active_tool = Some(label.clone());
        self.sink.update(StreamUpdate::ToolStarted { label }).await;
    }

    async fn tool_finished(&mut self) {
        self.in_tool = false;
        self.close_tool_line().await;
    }

    /// Accumulate a delta and emit a partial snapshot if one is due. The
    /// first delta emits immediately; later ones respect the interval.
    async fn text_delta(&mut self, interval: Duration, delta: &str) {
        if self.in_tool {
            return;
        }
        self.partial.push_str(delta);

        let due = match self.last_partial_emit {
            None => true,
            Some(at) => at.elapsed() >= interval,
        };
        if due {
            self.last_partial_emit = Some(Instant::now());
            self.last_emitted_len = self.partial.len();
            self.sink
                .update(StreamUpdate::Partial {
                    text: self.partial.clone(),
                })
                .await;
        }
    }

    /// Emit whatever accumulated since the last partial snapshot.
    async fn flush_partial(&mut self) {
        if !self.partial.is_empty() && self.partial.len() != self.last_emitted_len {
            self.last_emitted_len = self.partial.len();
            self.sink
                .update(StreamUpdate::Partial {
                    text: self.partial.clone(),
                })
                .await;
        }
    }
}

impl StreamMultiplexer {
    pub fn new(
        registry: Arc<SessionRegistry>,
        partial_interval: Duration,
        deadline: Duration,
    ) -> Self {
        Self {
            registry,
            partial_interval,
            deadline,
        }
    }

    /// Drive one generation: send the prompt, project the feed into the
    /// sink, and return the terminal outcome.
    pub async fn run(
        &self,
        key: &ConversationKey,
        transport: &Arc<dyn AgentTransport>,
        prompt: &str,
        sink: &Arc<dyn UpdateSink>,
    ) -> Outcome {
        let mut feed = match transport.request(prompt).await {
            Ok(feed) => feed,
            Err(TransportError::ExpectedTermination) => {
                info!(key = %key, "Agent terminated for restart before streaming");
                sink.update(StreamUpdate::Silent).await;
                return Outcome::Silent;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Agent request failed");
                let text = stream_error_text(&e);
                sink.update(StreamUpdate::Error { text: text.clone() }).await;
                return Outcome::Error(text);
            }
        };

        let hard_deadline = Instant::now() + self.deadline;
        let mut projection = Projection::new(sink);

        loop {
            let item = match tokio::time::timeout_at(hard_deadline, feed.next()).await {
                Ok(item) => item,
                Err(_) => {
                    warn!(key = %key, deadline = ?self.deadline, "Generation deadline exceeded");
                    transport.close().await;
                    projection.close_tool_line().await;
                    sink.update(StreamUpdate::Error {
                        text: TIMEOUT_MESSAGE.to_string(),
                    })
                    .await;
                    return Outcome::Error(TIMEOUT_MESSAGE.to_string());
                }
            };

            match item {
                Some(Ok(AgentEvent::ToolUse { name, input })) => {
                    projection.tool_started(&name, &input).await;
                }
                Some(Ok(AgentEvent::ToolResult)) => {
                    projection.tool_finished().await;
                }
                Some(Ok(AgentEvent::TextDelta(delta))) => {
                    projection.text_delta(self.partial_interval, &delta).await;
                }
                Some(Ok(AgentEvent::Result { text, session_id })) => {
                    projection.close_tool_line().await;
                    projection.flush_partial().await;

                    if let Some(sid) = &session_id {
                        // Persist before the front-end sees the result so a
                        // crash in between cannot lose the rotation.
                        match self.registry.set(key, sid).await {
                            Ok(()) => info!(key = %key, "Session updated"),
                            Err(e) => {
                                warn!(key = %key, error = %e, "Failed to persist session id");
                            }
                        }
                    }

                    sink.update(StreamUpdate::Result {
                        text: text.clone(),
                        session_id,
                    })
                    .await;
                    return Outcome::Result(text);
                }
                Some(Ok(AgentEvent::Error(text))) => {
                    projection.close_tool_line().await;
                    warn!(key = %key, error = %text, "Agent reported an error");
                    sink.update(StreamUpdate::Error { text: text.clone() }).await;
                    return Outcome::Error(text);
                }
                Some(Err(TransportError::ExpectedTermination)) => {
                    info!(key = %key, "Agent terminated for restart mid-generation");
                    sink.update(StreamUpdate::Silent).await;
                    return Outcome::Silent;
                }
                Some(Err(e)) => {
                    warn!(key = %key, error = %e, "Agent stream failed");
                    projection.close_tool_line().await;
                    let text = stream_error_text(&e);
                    sink.update(StreamUpdate::Error { text: text.clone() }).await;
                    return Outcome::Error(text);
                }
                None => {
                    info!(key = %key, "Agent feed ended without a result");
                    sink.update(StreamUpdate::Silent).await;
                    return Outcome::Silent;
                }
            }
        }
    }
}

fn stream_error_text(e: &TransportError) -> String {
    format!("Agent error: {e}. Try again or reset the conversation.")
}
