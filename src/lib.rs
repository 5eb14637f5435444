//! Courier - session and stream orchestration between a messaging front-end
//! and a long-running generative agent.

// ============================================================================
// Core Infrastructure
// ============================================================================

pub mod config;
pub mod key;
pub mod sync;
pub mod table;

// ============================================================================
// Durable State
// ============================================================================

pub mod ledger;
pub mod registry;

// ============================================================================
// Agent & Connections
// ============================================================================

pub mod agent;
pub mod connection;

// ============================================================================
// Orchestration
// ============================================================================

pub mod dispatch;
pub mod label;
pub mod recovery;
pub mod stream;

pub use agent::{
    AgentConnector, AgentEvent, AgentEventStream, AgentOptions, AgentTransport, FixedOptions,
    OptionsProvider, PermissionCallback, PermissionDecision, TransportError,
};
pub use config::{Config, ConfigError};
pub use dispatch::Dispatcher;
pub use key::ConversationKey;
pub use recovery::{RecoveryReport, SinkFactory, RESUME_DIRECTIVE};
pub use stream::{Outcome, StreamUpdate, UpdateSink, TIMEOUT_MESSAGE};
