//! Agent service interface: connectors, transports, and the raw event feed.
//!
//! The agent is an external, session-oriented process. This module defines
//! the seams the orchestration core talks through; concrete transports live
//! with the host.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use crate::key::ConversationKey;

// ============================================================================
// Permissions
// ============================================================================

/// Decision returned by the injected tool-gating callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny { reason: String },
}

/// Pure function applied to agent tool calls before they execute. The rule
/// engine behind it lives outside this core's concurrency boundary.
pub type PermissionCallback =
    Arc<dyn Fn(&str, &serde_json::Value) -> PermissionDecision + Send + Sync>;

// ============================================================================
// Options
// ============================================================================

/// Options bundle for opening an agent transport.
#[derive(Clone, Default)]
pub struct AgentOptions {
    /// Working directory the agent operates in.
    pub working_dir: PathBuf,
    /// Model name override, if any.
    pub model: Option<String>,
    /// Resumable session id from the registry, if any.
    pub resume_session_id: Option<String>,
    /// Tool-gating callback.
    pub permission: Option<PermissionCallback>,
}

/// Supplies per-conversation agent options (working directory, model,
/// permission callback). Workspace provisioning itself is the host's job.
pub trait OptionsProvider: Send + Sync {
    fn options_for(&self, key: &ConversationKey) -> AgentOptions;
}

/// The same options for every conversation.
pub struct FixedOptions(pub AgentOptions);

impl OptionsProvider for FixedOptions {
    fn options_for(&self, _key: &ConversationKey) -> AgentOptions {
        self.0.clone()
    }
}

// ============================================================================
// Events
// ============================================================================

/// One event from the agent's raw feed for a single generation.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// The agent started a tool invocation.
    ToolUse {
        name: String,
        input: serde_json::Value,
    },
    /// A tool invocation produced its result.
    ToolResult,
    /// Incremental fragment of the answer text.
    TextDelta(String),
    /// Terminal result, possibly carrying a rotated session id.
    Result {
        text: String,
        session_id: Option<String>,
    },
    /// Terminal agent-reported error, forwarded verbatim to the user.
    Error(String),
}

// ============================================================================
// Errors
// ============================================================================

/// Errors from the agent transport layer.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Could not open a channel to the agent service.
    #[error("failed to connect to agent: {0}")]
    Connect(String),

    /// The channel broke mid-generation.
    #[error("agent stream failed: {0}")]
    Stream(String),

    /// The agent process was killed by a deliberate, externally triggered
    /// restart. Suppressed from the user; the ledger entry stays for
    /// recovery.
    #[error("agent terminated for restart")]
    ExpectedTermination,
}

/// The raw event feed for one generation.
pub type AgentEventStream =
    Pin<Box<dyn Stream<Item = std::result::Result<AgentEvent, TransportError>> + Send>>;

// ============================================================================
// Transport Traits
// ============================================================================

/// A live, resumable, session-oriented channel to the agent service.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Send one prompt and return the raw event feed for that generation.
    async fn request(&self, prompt: &str) -> std::result::Result<AgentEventStream, TransportError>;

    /// Tear the channel down. Safe to call more than once.
    async fn close(&self);
}

/// Opens transports. Every call constructs a fresh channel.
#[async_trait]
pub trait AgentConnector: Send + Sync {
    async fn connect(
        &self,
        options: &AgentOptions,
    ) -> std::result::Result<Arc<dyn AgentTransport>, TransportError>;
}
