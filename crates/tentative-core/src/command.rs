//! Change command state machine
//!
//! One [`ChangeCommand`] runs on one task, from input capture to its terminal
//! state. Callers interact with it through a cloneable [`CommandHandle`]: the
//! handle exposes the countdown and phase observables and delivers interrupt
//! signals.

use crate::backing::BackingStore;
use crate::error::{Rejection, SignalError};
use crate::gate::InterruptGate;
use crate::grace::GraceTimer;
use crate::kind::{FollowUp, Resolution};
use crate::phase::{validate_transition, Phase, TerminalState};
use crate::report::{CommandReport, ResultSink};
use crate::types::{Captured, CommandId, CommandKind, Signal};
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tentative_record::{Fields, Record, RecordKey, RecordStore};
use tentative_registry::PendingRegistry;
use tokio::sync::watch;

/// Input-capture callback of a command
pub type Capture = Box<dyn FnOnce() -> Captured + Send>;

/// Registry of active commands, keyed by target record
pub type CommandRegistry = PendingRegistry<RecordKey, CommandHandle>;

#[derive(Debug)]
struct HandleInner {
    id: CommandId,
    kind: CommandKind,
    key: RecordKey,
    gate: InterruptGate,
    countdown: watch::Sender<Option<u64>>,
    phase: watch::Sender<Phase>,
}

/// Shared view of one command
#[derive(Debug, Clone)]
pub struct CommandHandle {
    inner: Arc<HandleInner>,
}

impl CommandHandle {
    pub(crate) fn new(id: CommandId, kind: CommandKind, key: RecordKey) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id,
                kind,
                key,
                gate: InterruptGate::new(),
                countdown: watch::channel(None).0,
                phase: watch::channel(Phase::AwaitingInput).0,
            }),
        }
    }

    /// Command identity
    #[inline]
    #[must_use]
    pub fn id(&self) -> CommandId {
        self.inner.id
    }

    /// Command kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        self.inner.kind
    }

    /// Target record
    #[inline]
    #[must_use]
    pub fn key(&self) -> RecordKey {
        self.inner.key
    }

    /// Offer an interrupt signal
    ///
    /// Signals delivered before the grace period starts are held and honoured
    /// when it does.
    ///
    /// # Errors
    /// - `SignalError::WindowClosed` if the grace period already ended
    /// - `SignalError::AlreadyRedirected` if another signal was accepted first
    pub fn deliver(&self, signal: Signal) -> Result<(), SignalError> {
        let name = signal.name();
        let result = self.inner.gate.deliver(signal);
        match &result {
            Ok(()) => tracing::debug!(command = %self.id(), signal = name, "signal accepted"),
            Err(err) => tracing::warn!(
                command = %self.id(),
                key = %self.key(),
                signal = name,
                error = %err,
                "signal rejected"
            ),
        }
        result
    }

    /// Replace the pending change with new data
    ///
    /// # Errors
    /// See [`CommandHandle::deliver`]
    pub fn redirect_edit(&self, captured: impl Into<Captured>) -> Result<(), SignalError> {
        self.deliver(Signal::Edit(captured.into()))
    }

    /// Turn the pending change into a removal
    ///
    /// # Errors
    /// See [`CommandHandle::deliver`]
    pub fn redirect_remove(&self) -> Result<(), SignalError> {
        self.deliver(Signal::Remove)
    }

    /// Undo the pending change
    ///
    /// # Errors
    /// See [`CommandHandle::deliver`]
    pub fn cancel(&self) -> Result<(), SignalError> {
        self.deliver(Signal::Cancel)
    }

    /// Observe the grace-period countdown
    #[must_use]
    pub fn countdown(&self) -> watch::Receiver<Option<u64>> {
        self.inner.countdown.subscribe()
    }

    /// Seconds left in the grace period, if one is running
    #[must_use]
    pub fn seconds_remaining(&self) -> Option<u64> {
        *self.inner.countdown.borrow()
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.inner.phase.borrow()
    }

    /// Observe phase changes
    #[must_use]
    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.inner.phase.subscribe()
    }

    /// Wait until the phase satisfies `pred`, returning that phase
    pub async fn wait_for_phase(&self, mut pred: impl FnMut(Phase) -> bool) -> Phase {
        let mut phases = self.watch_phase();
        let reached = phases.wait_for(|phase| pred(*phase)).await.map(|p| *p);
        reached.unwrap_or_else(|_| self.phase())
    }

    /// Wait for the terminal state
    pub async fn finished(&self) -> TerminalState {
        let phase = self.wait_for_phase(Phase::is_terminal).await;
        phase.terminal().unwrap_or(TerminalState::Failed)
    }

    fn set_phase(&self, phase: Phase) {
        self.inner.phase.send_replace(phase);
    }
}

/// Result of one command run
#[derive(Debug)]
pub(crate) struct CommandOutcome {
    pub(crate) report: CommandReport,
    pub(crate) follow_up: Option<(CommandId, FollowUp)>,
}

/// One change command, ready to run
pub(crate) struct ChangeCommand {
    pub(crate) handle: CommandHandle,
    pub(crate) capture: Capture,
    pub(crate) timer: GraceTimer,
    pub(crate) store: Arc<RecordStore>,
    pub(crate) registry: CommandRegistry,
    pub(crate) backing: Arc<dyn BackingStore>,
    pub(crate) sink: Arc<dyn ResultSink>,
}

/// How the post-grace work ended
struct Settled {
    terminal: TerminalState,
    after: Option<Record>,
    reason: Option<String>,
    follow_up: Option<FollowUp>,
}

impl ChangeCommand {
    /// Run the command to its terminal state
    ///
    /// The slot is released before the outcome is reported; a follow-up is
    /// returned for the caller to submit.
    pub(crate) async fn execute(self) -> CommandOutcome {
        let Self {
            handle,
            capture,
            timer,
            store,
            registry,
            backing,
            sink,
        } = self;
        let mut run = Run::new(&handle);
        let key = handle.key();
        let kind = handle.kind();

        let Some(fields) = capture().into_fields() else {
            let dropped = close_gate(&handle);
            let mut report = run.report(
                TerminalState::Cancelled,
                None,
                None,
                Some("input abandoned".into()),
                None,
            );
            report.dropped_signal = dropped;
            sink.report(&report);
            run.advance(Phase::Finished(TerminalState::Cancelled));
            return CommandOutcome {
                report,
                follow_up: None,
            };
        };

        run.advance(Phase::AcquiringSlot);
        if registry.has_active(&key) {
            tracing::debug!(command = %handle.id(), key = %key, "waiting for slot");
        }
        let slot = registry.acquire(key, handle.clone()).await;
        let before = store.committed(&key);

        let settled = match kind.simulate(&store, key, &fields) {
            Ok(()) => {
                run.advance(Phase::Simulated);
                run.advance(Phase::GracePeriod);
                let outcome = timer.run(&handle.inner.gate, &handle.inner.countdown).await;
                tracing::debug!(command = %handle.id(), outcome = ?outcome, "grace period over");
                match kind.resolve(outcome) {
                    Resolution::Commit(replacement) => {
                        run.advance(Phase::Committing);
                        let fields = match replacement {
                            Some(replacement) => {
                                store.stage(key, replacement.clone());
                                replacement
                            }
                            None => fields,
                        };
                        commit(kind, key, &fields, &store, backing.as_ref()).await
                    }
                    Resolution::Cancel => {
                        run.advance(Phase::Cancelling);
                        store.rollback(&key);
                        Settled {
                            terminal: TerminalState::Cancelled,
                            after: store.committed(&key),
                            reason: Some("cancelled during grace period".into()),
                            follow_up: None,
                        }
                    }
                    Resolution::Handoff(follow_up) => {
                        run.advance(Phase::Cancelling);
                        store.rollback(&key);
                        Settled {
                            terminal: TerminalState::Cancelled,
                            after: store.committed(&key),
                            reason: Some(format!("redirected to {}", follow_up.kind())),
                            follow_up: Some(follow_up),
                        }
                    }
                }
            }
            Err(err) => Settled {
                terminal: TerminalState::Failed,
                after: None,
                reason: Some(err.to_string()),
                follow_up: None,
            },
        };

        let dropped = close_gate(&handle);
        run.advance(Phase::Releasing);
        slot.release();

        let follow_up = settled.follow_up.map(|f| (CommandId::new(), f));
        let mut report = run.report(
            settled.terminal,
            before,
            settled.after,
            settled.reason,
            follow_up.as_ref().map(|(id, _)| *id),
        );
        report.dropped_signal = dropped;
        sink.report(&report);
        run.advance(Phase::Finished(settled.terminal));

        CommandOutcome { report, follow_up }
    }

    /// Outcome of a command whose task panicked
    ///
    /// The slot guard was released while unwinding. The report goes to
    /// `sink` unless the panic came from the sink itself.
    pub(crate) fn panicked(handle: &CommandHandle, sink: &dyn ResultSink) -> CommandOutcome {
        let phase = handle.phase();
        tracing::error!(
            command = %handle.id(),
            key = %handle.key(),
            phase = ?phase,
            "command task panicked"
        );
        let dropped = close_gate(handle);
        let mut report = Run::new(handle).report(
            TerminalState::Failed,
            None,
            None,
            Some(format!("command panicked in phase {phase:?}")),
            None,
        );
        report.dropped_signal = dropped;
        if phase != Phase::Releasing {
            sink.report(&report);
        }
        handle.set_phase(Phase::Finished(TerminalState::Failed));
        CommandOutcome {
            report,
            follow_up: None,
        }
    }
}

/// Close the signal window, returning the name of a signal it still held
///
/// A held signal here was accepted but never acted on.
fn close_gate(handle: &CommandHandle) -> Option<&'static str> {
    let signal = handle.inner.gate.close()?;
    tracing::warn!(
        command = %handle.id(),
        key = %handle.key(),
        signal = signal.name(),
        "accepted signal dropped, command ended before its grace period"
    );
    Some(signal.name())
}

/// Send the change to the backing store and settle both views
async fn commit(
    kind: CommandKind,
    key: RecordKey,
    fields: &Fields,
    store: &RecordStore,
    backing: &dyn BackingStore,
) -> Settled {
    let result = match kind.commit_request(key, fields) {
        Ok(request) => AssertUnwindSafe(backing.commit(request))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(Rejection::Unavailable("commit panicked".into()))),
        Err(rejection) => Err(rejection),
    };
    match result {
        Ok(record) => {
            let after = (kind != CommandKind::Remove).then(|| record.clone());
            kind.settle(store, key, record);
            Settled {
                terminal: TerminalState::Successful,
                after,
                reason: None,
                follow_up: None,
            }
        }
        Err(rejection) => rejected(key, store, &rejection),
    }
}

fn rejected(key: RecordKey, store: &RecordStore, rejection: &Rejection) -> Settled {
    tracing::warn!(key = %key, error = %rejection, "commit rejected, rolling back");
    store.rollback(&key);
    Settled {
        terminal: TerminalState::Failed,
        after: store.committed(&key),
        reason: Some(rejection.to_string()),
        follow_up: None,
    }
}

/// Phase bookkeeping of one run
struct Run<'a> {
    handle: &'a CommandHandle,
    phase: Phase,
}

impl<'a> Run<'a> {
    fn new(handle: &'a CommandHandle) -> Self {
        Self {
            handle,
            phase: handle.phase(),
        }
    }

    fn advance(&mut self, to: Phase) {
        if let Err(err) = validate_transition(self.phase, to) {
            tracing::error!(command = %self.handle.id(), error = %err, "phase machine violated");
        }
        tracing::debug!(
            command = %self.handle.id(),
            key = %self.handle.key(),
            kind = %self.handle.kind(),
            from = ?self.phase,
            to = ?to,
            "phase transition"
        );
        self.phase = to;
        self.handle.set_phase(to);
    }

    fn report(
        &self,
        terminal: TerminalState,
        before: Option<Record>,
        after: Option<Record>,
        reason: Option<String>,
        follow_up: Option<CommandId>,
    ) -> CommandReport {
        CommandReport {
            command: self.handle.id(),
            key: self.handle.key(),
            kind: self.handle.kind(),
            terminal,
            before,
            after,
            reason,
            follow_up,
            dropped_signal: None,
            finished_at: Utc::now(),
        }
    }
}
