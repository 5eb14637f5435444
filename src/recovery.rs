//! Restart recovery: resume generations the previous process left behind.
//!
//! Two durable sources feed recovery: the in-flight ledger (crashes and
//! controlled shutdowns) and the restart snapshot an external supervisor
//! writes before killing the process. Both are consumed exactly once at
//! startup.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::key::ConversationKey;
use crate::stream::{Outcome, StreamUpdate, UpdateSink};

/// Prompt sent in place of the lost user turn when resuming.
pub const RESUME_DIRECTIVE: &str = "[System: The process just restarted. \
Continue where you left off and deliver the result to the user.]";

/// Builds the front-end sink for a recovered conversation.
pub trait SinkFactory: Send + Sync {
    fn sink_for(&self, key: &ConversationKey) -> Arc<dyn UpdateSink>;
}

/// Tally of one recovery pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Generations resumed to a terminal result.
    pub recovered: usize,
    /// Keys with no resumable session record.
    pub skipped: usize,
    /// Resumptions that ended in an error.
    pub failed: usize,
}

/// Suppresses intermediate updates on a resumed generation. The user never
/// asked for this turn's play-by-play; only the terminal update matters.
struct FinalOnlySink {
    inner: Arc<dyn UpdateSink>,
}

#[async_trait]
impl UpdateSink for FinalOnlySink {
    async fn update(&self, update: StreamUpdate) {
        match update {
            StreamUpdate::Result { .. } | StreamUpdate::Error { .. } | StreamUpdate::Silent => {
                self.inner.update(update).await;
            }
            StreamUpdate::ToolStarted { .. }
            | StreamUpdate::ToolFinished { .. }
            | StreamUpdate::Partial { .. } => {}
        }
    }
}

enum Resumption {
    Recovered,
    Skipped,
    Failed,
}

pub(crate) async fn recover(dispatcher: &Dispatcher, sinks: &dyn SinkFactory) -> RecoveryReport {
    let mut keys: HashSet<ConversationKey> = HashSet::new();
    keys.extend(dispatcher.ledger().drain().await);
    keys.extend(dispatcher.restart_ledger().drain().await);

    if keys.is_empty() {
        debug!("No interrupted generations to recover");
        return RecoveryReport::default();
    }
    info!(count = keys.len(), "Resuming interrupted generations");

    let mut tasks = Vec::with_capacity(keys.len());
    for key in keys {
        let dispatcher = dispatcher.clone();
        let sink: Arc<dyn UpdateSink> = Arc::new(FinalOnlySink {
            inner: sinks.sink_for(&key),
        });
        tasks.push(tokio::spawn(async move {
            if dispatcher.registry().get(&key).await.is_none() {
                warn!(key = %key, "No session to resume, skipping");
                return Resumption::Skipped;
            }
            match dispatcher
                .run_generation(&key, RESUME_DIRECTIVE.to_string(), sink)
                .await
            {
                Outcome::Error(text) => {
                    warn!(key = %key, error = %text, "Resumed generation failed");
                    Resumption::Failed
                }
                Outcome::Result(_) | Outcome::Silent => {
                    info!(key = %key, "Resumed generation finished");
                    Resumption::Recovered
                }
            }
        }));
    }

    let mut report = RecoveryReport::default();
    for task in tasks {
        match task.await {
            Ok(Resumption::Recovered) => report.recovered += 1,
            Ok(Resumption::Skipped) => report.skipped += 1,
            Ok(Resumption::Failed) => report.failed += 1,
            Err(e) => {
                warn!(error = %e, "Recovery task panicked");
                report.failed += 1;
            }
        }
    }

    info!(
        recovered = report.recovered,
        skipped = report.skipped,
        failed = report.failed,
        "Recovery pass complete"
    );
    report
}
