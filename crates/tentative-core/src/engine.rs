//! Command engine
//!
//! Spawns one task per change command and wires every command to the shared
//! record store, pending-change registry, backing store and result sink.
//! Follow-up commands produced by redirects are submitted here, after the
//! originating command has released its slot.

use crate::backing::{BackingStore, MemoryBackingStore};
use crate::command::{Capture, ChangeCommand, CommandHandle, CommandOutcome, CommandRegistry};
use crate::config::EngineConfig;
use crate::error::{EngineError, SignalError};
use crate::kind::FollowUp;
use crate::phase::TerminalState;
use crate::report::{CommandReport, ResultSink, TracingSink};
use crate::types::{Captured, CommandId, CommandKind, CommandOptions};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tentative_record::{Fields, RecordId, RecordKey, RecordStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Engine statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Commands spawned, follow-ups included
    pub submitted: usize,
    /// Commands not yet terminal
    pub in_flight: usize,
    /// Commands that committed
    pub successful: usize,
    /// Commands abandoned, cancelled or redirected
    pub cancelled: usize,
    /// Commands rejected or without a target
    pub failed: usize,
    /// Follow-up commands issued by redirects
    pub follow_ups: usize,
}

struct EngineInner {
    config: EngineConfig,
    store: Arc<RecordStore>,
    registry: CommandRegistry,
    backing: Arc<dyn BackingStore>,
    sink: Arc<dyn ResultSink>,
    in_flight: watch::Sender<usize>,
    stats: Mutex<EngineStats>,
}

/// Runs change commands against one record store
#[derive(Clone)]
pub struct CommandEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for CommandEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandEngine")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Builder for [`CommandEngine`]
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<RecordStore>>,
    backing: Option<Arc<dyn BackingStore>>,
    sink: Option<Arc<dyn ResultSink>>,
}

impl EngineBuilder {
    /// Create builder with default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With configuration
    #[inline]
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// With record store
    #[inline]
    #[must_use]
    pub fn with_store(mut self, store: Arc<RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// With backing store
    #[inline]
    #[must_use]
    pub fn with_backing(mut self, backing: Arc<dyn BackingStore>) -> Self {
        self.backing = Some(backing);
        self
    }

    /// With result sink
    #[inline]
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the engine
    ///
    /// Without a backing store, an in-memory one seeded from the record
    /// store's committed view is used. Without a sink, outcomes are logged.
    ///
    /// # Errors
    /// Returns `EngineError::Config` if the configuration is invalid
    pub fn build(self) -> Result<CommandEngine, EngineError> {
        self.config.validate()?;
        let store = self.store.unwrap_or_default();
        let backing = self.backing.unwrap_or_else(|| {
            Arc::new(MemoryBackingStore::with_records(store.committed_records()))
        });
        Ok(CommandEngine {
            inner: Arc::new(EngineInner {
                config: self.config,
                store,
                registry: CommandRegistry::new(),
                backing,
                sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
                in_flight: watch::channel(0).0,
                stats: Mutex::new(EngineStats::default()),
            }),
        })
    }
}

/// A spawned command
#[derive(Debug)]
pub struct CommandTicket {
    handle: CommandHandle,
    join: JoinHandle<CommandReport>,
}

impl CommandTicket {
    /// Handle of the spawned command
    #[inline]
    #[must_use]
    pub fn handle(&self) -> &CommandHandle {
        &self.handle
    }

    /// Command identity
    #[inline]
    #[must_use]
    pub fn id(&self) -> CommandId {
        self.handle.id()
    }

    /// Wait for the command's report
    ///
    /// # Errors
    /// Returns `EngineError::Join` if the command task panicked or was aborted
    pub async fn outcome(self) -> Result<CommandReport, EngineError> {
        self.join
            .await
            .map_err(|err| EngineError::Join(err.to_string()))
    }
}

impl CommandEngine {
    /// Start building an engine
    #[inline]
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Create a new record from captured fields
    pub fn create<F>(&self, capture: F, options: CommandOptions) -> CommandTicket
    where
        F: FnOnce() -> Captured + Send + 'static,
    {
        self.submit(CommandKind::Create, RecordKey::provisional(), capture, options)
    }

    /// Replace the fields of record `id` with captured fields
    pub fn modify<F>(&self, id: RecordId, capture: F, options: CommandOptions) -> CommandTicket
    where
        F: FnOnce() -> Captured + Send + 'static,
    {
        self.submit(CommandKind::Modify, id.into(), capture, options)
    }

    /// Remove record `id`
    pub fn remove(&self, id: RecordId, options: CommandOptions) -> CommandTicket {
        self.submit(
            CommandKind::Remove,
            id.into(),
            || Captured::Fields(Fields::new()),
            options,
        )
    }

    /// Spawn a command of any kind against `key`
    pub fn submit<F>(
        &self,
        kind: CommandKind,
        key: RecordKey,
        capture: F,
        options: CommandOptions,
    ) -> CommandTicket
    where
        F: FnOnce() -> Captured + Send + 'static,
    {
        self.spawn(CommandId::new(), kind, key, Box::new(capture), options)
    }

    fn spawn(
        &self,
        id: CommandId,
        kind: CommandKind,
        key: RecordKey,
        capture: Capture,
        options: CommandOptions,
    ) -> CommandTicket {
        let handle = CommandHandle::new(id, kind, key);
        let command = ChangeCommand {
            handle: handle.clone(),
            capture,
            timer: self.inner.config.grace_timer(&options),
            store: Arc::clone(&self.inner.store),
            registry: self.inner.registry.clone(),
            backing: Arc::clone(&self.inner.backing),
            sink: Arc::clone(&self.inner.sink),
        };

        self.inner.stats.lock().submitted += 1;
        self.inner.in_flight.send_modify(|n| *n += 1);

        let span = tracing::info_span!("command", command = %id, kind = %kind, key = %key);
        let engine = self.clone();
        let watched = handle.clone();
        let join = tokio::spawn(
            async move {
                let outcome = match AssertUnwindSafe(command.execute()).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => ChangeCommand::panicked(&watched, engine.inner.sink.as_ref()),
                };
                engine.finish(outcome)
            }
            .instrument(span),
        );

        CommandTicket { handle, join }
    }

    /// Record the outcome and submit its follow-up
    fn finish(&self, outcome: CommandOutcome) -> CommandReport {
        let CommandOutcome { report, follow_up } = outcome;
        {
            let mut stats = self.inner.stats.lock();
            match report.terminal {
                TerminalState::Successful => stats.successful += 1,
                TerminalState::Cancelled => stats.cancelled += 1,
                TerminalState::Failed => stats.failed += 1,
            }
            if follow_up.is_some() {
                stats.follow_ups += 1;
            }
        }

        if let Some((id, follow_up)) = follow_up {
            let kind = follow_up.kind();
            let captured = match follow_up {
                FollowUp::Remove => Captured::Fields(Fields::new()),
                FollowUp::Modify(fields) => Captured::Fields(fields),
            };
            tracing::info!(
                command = %id,
                parent = %report.command,
                key = %report.key,
                kind = %kind,
                "submitting follow-up"
            );
            let _follow_up = self.spawn(
                id,
                kind,
                report.key,
                Box::new(move || captured),
                CommandOptions::new(),
            );
        }

        self.inner.in_flight.send_modify(|n| *n = n.saturating_sub(1));
        report
    }

    /// Active command for `key`
    #[must_use]
    pub fn active_command_for(&self, key: RecordKey) -> Option<CommandHandle> {
        self.inner.registry.active_command_for(&key)
    }

    fn active(&self, key: RecordKey) -> Result<CommandHandle, SignalError> {
        self.active_command_for(key).ok_or_else(|| {
            tracing::warn!(key = %key, "signal for record without active command");
            SignalError::NoActiveCommand(key)
        })
    }

    /// Redirect the active command on `key` to an edit
    ///
    /// # Errors
    /// Returns `SignalError` if no command is active on `key` or the signal
    /// was not accepted
    pub fn redirect_edit(
        &self,
        key: RecordKey,
        captured: impl Into<Captured>,
    ) -> Result<CommandId, SignalError> {
        let handle = self.active(key)?;
        handle.redirect_edit(captured)?;
        Ok(handle.id())
    }

    /// Redirect the active command on `key` to a removal
    ///
    /// # Errors
    /// Returns `SignalError` if no command is active on `key` or the signal
    /// was not accepted
    pub fn redirect_remove(&self, key: RecordKey) -> Result<CommandId, SignalError> {
        let handle = self.active(key)?;
        handle.redirect_remove()?;
        Ok(handle.id())
    }

    /// Cancel the active command on `key`
    ///
    /// # Errors
    /// Returns `SignalError` if no command is active on `key` or the signal
    /// was not accepted
    pub fn cancel(&self, key: RecordKey) -> Result<CommandId, SignalError> {
        let handle = self.active(key)?;
        handle.cancel()?;
        Ok(handle.id())
    }

    /// Shared record store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.inner.store
    }

    /// Pending-change registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &CommandRegistry {
        &self.inner.registry
    }

    /// Engine configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Get engine statistics
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            in_flight: *self.inner.in_flight.borrow(),
            ..*self.inner.stats.lock()
        }
    }

    /// Wait until no command is in flight
    ///
    /// Follow-ups are counted before their parent finishes, so a redirect
    /// chain is waited for as a whole.
    pub async fn idle(&self) {
        let mut in_flight = self.inner.in_flight.subscribe();
        let reached = in_flight.wait_for(|n| *n == 0).await.is_ok();
        if !reached {
            tracing::debug!("in-flight counter closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;
    use crate::report::ChannelSink;
    use std::time::Duration;
    use tentative_record::Record;

    fn engine() -> CommandEngine {
        let store = Arc::new(RecordStore::with_records([Record::new(
            RecordId::new(7).into(),
            Fields::new().with("city", "Oslo"),
        )]));
        CommandEngine::builder()
            .with_config(EngineConfig::new().with_grace_period(2))
            .with_store(store)
            .build()
            .unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = CommandEngine::builder()
            .with_config(EngineConfig::new().with_tick(Duration::ZERO))
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn create_assigns_durable_identity() {
        let engine = engine();
        let ticket = engine.create(
            || Fields::new().with("city", "Bergen").into(),
            CommandOptions::new(),
        );
        let provisional = ticket.handle().key();
        assert!(provisional.is_provisional());

        let report = ticket.outcome().await.unwrap();

        assert!(report.is_success());
        let durable = report.resolved_key();
        assert_eq!(durable, RecordKey::from(RecordId::new(8)));
        assert!(engine.store().visible(&provisional).is_none());
        assert!(engine.store().is_consistent(&durable));
    }

    #[tokio::test(start_paused = true)]
    async fn signal_without_active_command() {
        let engine = engine();
        let key = RecordId::new(7).into();
        assert_eq!(
            engine.cancel(key),
            Err(SignalError::NoActiveCommand(key))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn redirect_by_key() {
        let engine = engine();
        let ticket = engine.modify(
            RecordId::new(7),
            || Fields::new().with("city", "X").into(),
            CommandOptions::new(),
        );
        ticket
            .handle()
            .wait_for_phase(|p| p == Phase::GracePeriod)
            .await;

        let id = engine.redirect_edit(RecordId::new(7).into(), Fields::new().with("city", "Y"));
        assert_eq!(id, Ok(ticket.id()));

        let report = ticket.outcome().await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.after.unwrap().fields.get("city"), Some("Y"));
    }

    #[tokio::test(start_paused = true)]
    async fn remove_redirected_to_edit_issues_modify() {
        let (sink, mut reports) = ChannelSink::new(8);
        let engine = CommandEngine::builder()
            .with_store(Arc::new(RecordStore::with_records([Record::new(
                RecordId::new(7).into(),
                Fields::new().with("city", "Oslo"),
            )])))
            .with_sink(Arc::new(sink))
            .build()
            .unwrap();

        let ticket = engine.remove(RecordId::new(7), CommandOptions::new().with_grace_period(3));
        ticket
            .handle()
            .redirect_edit(Fields::new().with("city", "Z"))
            .unwrap();
        engine.idle().await;

        let first = reports.recv().await.unwrap();
        let second = reports.recv().await.unwrap();
        assert_eq!(first.terminal, TerminalState::Cancelled);
        assert_eq!(first.follow_up, Some(second.command));
        assert_eq!(second.kind, CommandKind::Modify);
        assert!(second.is_success());

        let stats = engine.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.follow_ups, 1);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(
            engine
                .store()
                .committed(&RecordId::new(7).into())
                .unwrap()
                .fields
                .get("city"),
            Some("Z")
        );
    }
}
