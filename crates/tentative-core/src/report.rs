//! Result reporting
//!
//! Every command produces one [`CommandReport`] after it has released its
//! slot. Reports go to a [`ResultSink`]; the engine logs them through
//! [`TracingSink`] unless told otherwise.

use crate::phase::TerminalState;
use crate::types::{CommandId, CommandKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tentative_record::{Record, RecordKey};
use tokio::sync::mpsc;

/// Terminal outcome of one command, with before/after snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandReport {
    /// Command identity
    pub command: CommandId,
    /// Target record (provisional for creations)
    pub key: RecordKey,
    /// Command kind
    pub kind: CommandKind,
    /// Terminal state
    pub terminal: TerminalState,
    /// Committed value when the command took its slot
    pub before: Option<Record>,
    /// Committed value when the command finished
    pub after: Option<Record>,
    /// Why the command did not succeed
    pub reason: Option<String>,
    /// Command issued in its place after release
    pub follow_up: Option<CommandId>,
    /// Accepted signal the command ended without acting on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropped_signal: Option<&'static str>,
    /// When the command finished
    pub finished_at: DateTime<Utc>,
}

impl CommandReport {
    /// Check if the command committed
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.terminal == TerminalState::Successful
    }

    /// Durable identity of the record after the command, if any
    #[must_use]
    pub fn resolved_key(&self) -> RecordKey {
        self.after.as_ref().map_or(self.key, |record| record.key)
    }

    /// One-line human-readable summary
    #[must_use]
    pub fn summary(&self) -> String {
        let mut line = format!("{} {} {}", self.kind, self.resolved_key(), self.terminal);
        if let Some(reason) = &self.reason {
            line.push_str(": ");
            line.push_str(reason);
        }
        if let Some(signal) = self.dropped_signal {
            line.push_str(&format!(" ({signal} signal dropped)"));
        }
        line
    }
}

/// Receives the terminal outcome of every command
pub trait ResultSink: Send + Sync {
    /// Handle one report
    fn report(&self, report: &CommandReport);
}

/// Logs reports as structured `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ResultSink for TracingSink {
    fn report(&self, report: &CommandReport) {
        let before = report.before.as_ref().map(|r| r.fields.to_string());
        let after = report.after.as_ref().map(|r| r.fields.to_string());
        match report.terminal {
            TerminalState::Successful => tracing::info!(
                command = %report.command,
                key = %report.resolved_key(),
                kind = %report.kind,
                before = before.as_deref(),
                after = after.as_deref(),
                "command committed"
            ),
            TerminalState::Cancelled => tracing::info!(
                command = %report.command,
                key = %report.key,
                kind = %report.kind,
                reason = report.reason.as_deref(),
                follow_up = ?report.follow_up,
                "command cancelled"
            ),
            TerminalState::Failed => tracing::warn!(
                command = %report.command,
                key = %report.key,
                kind = %report.kind,
                reason = report.reason.as_deref(),
                "command failed"
            ),
        }
    }
}

/// Forwards reports to a bounded channel
///
/// Reports that do not fit are dropped with a warning; a slow consumer never
/// holds up a command.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<CommandReport>,
}

impl ChannelSink {
    /// Create sink and its receiving end
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<CommandReport>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ResultSink for ChannelSink {
    fn report(&self, report: &CommandReport) {
        if let Err(err) = self.tx.try_send(report.clone()) {
            tracing::warn!(command = %report.command, error = %err, "report dropped");
        }
    }
}

/// Sends every report to several sinks
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl FanoutSink {
    /// Create empty fan-out
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    #[inline]
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl ResultSink for FanoutSink {
    fn report(&self, report: &CommandReport) {
        for sink in &self.sinks {
            sink.report(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tentative_record::{Fields, RecordId};

    fn report(terminal: TerminalState) -> CommandReport {
        let key = RecordKey::from(RecordId::new(42));
        CommandReport {
            command: CommandId::new(),
            key,
            kind: CommandKind::Modify,
            terminal,
            before: Some(Record::new(key, Fields::new().with("city", "Oslo"))),
            after: Some(Record::new(key, Fields::new().with("city", "X"))),
            reason: None,
            follow_up: None,
            dropped_signal: None,
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn summary_includes_reason() {
        let mut failed = report(TerminalState::Failed);
        failed.reason = Some("identity conflict on #42".into());
        assert_eq!(
            failed.summary(),
            "modify #42 failed: identity conflict on #42"
        );
        assert!(!failed.is_success());
    }

    #[test]
    fn resolved_key_follows_committed_record() {
        let mut created = report(TerminalState::Successful);
        created.key = RecordKey::provisional();
        assert_eq!(created.resolved_key(), RecordKey::from(RecordId::new(42)));
    }

    #[tokio::test]
    async fn channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new(4);
        let sent = report(TerminalState::Successful);
        sink.report(&sent);
        assert_eq!(rx.recv().await, Some(sent));
    }

    #[test]
    fn channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelSink::new(1);
        sink.report(&report(TerminalState::Successful));
        sink.report(&report(TerminalState::Cancelled));
        assert_eq!(
            rx.try_recv().unwrap().terminal,
            TerminalState::Successful
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let (a, mut rx_a) = ChannelSink::new(2);
        let (b, mut rx_b) = ChannelSink::new(2);
        let fanout = FanoutSink::new()
            .with(Arc::new(a))
            .with(Arc::new(b))
            .with(Arc::new(TracingSink));

        fanout.report(&report(TerminalState::Failed));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }
}
