//! Named scenarios
//!
//! Each scenario drives a handful of commands against a fresh engine and
//! checks the expected outcome. Time runs at the configured tick length.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tentative_core::{
    Captured, ChannelSink, CommandEngine, CommandKind, CommandOptions, CommandReport,
    EngineConfig, MemoryBackingStore, Phase, Rejection, TerminalState,
};
use tentative_record::{Fields, Record, RecordId, RecordKey, RecordStore, VisibleState};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// A named, self-checking scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Modify record 42, cancel at once
    ImmediateCancel,
    /// Two modifies on record 7, one after the other
    BackToBack,
    /// Modify redirected to a removal
    RedirectRemove,
    /// Create redirected to new field values
    RedirectEdit,
    /// Input capture abandoned
    Abandon,
    /// Backing store refuses the commit
    RejectedCommit,
}

impl Scenario {
    /// Every scenario, in run order
    pub const ALL: [Self; 6] = [
        Self::ImmediateCancel,
        Self::BackToBack,
        Self::RedirectRemove,
        Self::RedirectEdit,
        Self::Abandon,
        Self::RejectedCommit,
    ];

    /// Command-line name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ImmediateCancel => "immediate-cancel",
            Self::BackToBack => "back-to-back",
            Self::RedirectRemove => "redirect-remove",
            Self::RedirectEdit => "redirect-edit",
            Self::Abandon => "abandon",
            Self::RejectedCommit => "rejected-commit",
        }
    }

    /// Look a scenario up by name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }
}

/// Result of one scenario run
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    /// Scenario name
    pub name: &'static str,
    /// Whether every check held
    pub passed: bool,
    /// Wall time, in milliseconds
    pub elapsed_ms: u64,
    /// Checks that did not hold
    pub failures: Vec<String>,
    /// Reports delivered to the sink
    pub reports: Vec<CommandReport>,
}

impl ScenarioOutcome {
    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut text = format!("=== Scenario: {} ===\n", self.name);
        for report in &self.reports {
            text.push_str(&format!("  {}\n", report.summary()));
        }
        for failure in &self.failures {
            text.push_str(&format!("  FAILED CHECK: {failure}\n"));
        }
        text.push_str(&format!(
            "Result: {} ({}ms)\n",
            if self.passed { "PASS" } else { "FAIL" },
            self.elapsed_ms
        ));
        text
    }
}

struct Bench {
    engine: CommandEngine,
    backing: Arc<MemoryBackingStore>,
    rx: mpsc::Receiver<CommandReport>,
    failures: Vec<String>,
}

impl Bench {
    fn new(config: &EngineConfig, records: Vec<Record>) -> anyhow::Result<Self> {
        let backing = Arc::new(MemoryBackingStore::with_records(records.clone()));
        let (sink, rx) = ChannelSink::new(config.report_channel_capacity);
        let engine = CommandEngine::builder()
            .with_config(config.clone())
            .with_store(Arc::new(RecordStore::with_records(records)))
            .with_backing(backing.clone())
            .with_sink(Arc::new(sink))
            .build()?;
        Ok(Self {
            engine,
            backing,
            rx,
            failures: Vec::new(),
        })
    }

    fn check(&mut self, ok: bool, what: &str) {
        if !ok {
            self.failures.push(what.to_string());
        }
    }

    fn city(&self, key: RecordKey) -> Option<String> {
        self.engine
            .store()
            .committed(&key)
            .and_then(|r| r.fields.get("city").map(str::to_string))
    }

    async fn finish(mut self, name: &'static str, started: Instant) -> ScenarioOutcome {
        self.engine.idle().await;
        let store = self.engine.store();
        let quiescent = store.diverged_keys().is_empty()
            && self.engine.registry().is_empty()
            && store.committed_records() == self.backing.records();
        self.check(quiescent, "views agree and no slot is held");

        let mut reports = Vec::new();
        while let Ok(report) = self.rx.try_recv() {
            reports.push(report);
        }
        ScenarioOutcome {
            name,
            passed: self.failures.is_empty(),
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            failures: self.failures,
            reports,
        }
    }
}

fn city(name: &str) -> Fields {
    Fields::new().with("city", name)
}

fn oslo(id: u64) -> Vec<Record> {
    vec![Record::new(RecordId::new(id).into(), city("Oslo"))]
}

/// Run one scenario with countdown seconds of length `tick`
///
/// # Errors
/// Returns an error if the engine cannot be built or a command task panicked
pub async fn run_scenario(scenario: Scenario, tick: Duration) -> anyhow::Result<ScenarioOutcome> {
    let config = EngineConfig::new().with_grace_period(1).with_tick(tick);
    let started = Instant::now();
    let name = scenario.name();

    let bench = match scenario {
        Scenario::ImmediateCancel => {
            let mut bench = Bench::new(&config, oslo(42))?;
            let key = RecordId::new(42).into();
            let ticket = bench.engine.modify(
                RecordId::new(42),
                || city("X").into(),
                CommandOptions::new(),
            );
            bench.check(ticket.handle().cancel().is_ok(), "cancel accepted");
            let report = ticket.outcome().await?;
            bench.check(report.terminal == TerminalState::Cancelled, "command cancelled");
            let visible = bench.engine.store().visible(&key);
            bench.check(
                visible.is_some_and(|v| {
                    v.state == VisibleState::Settled && v.fields().get("city") == Some("Oslo")
                }),
                "record 42 unchanged",
            );
            bench.check(
                !bench.engine.registry().has_active(&key),
                "slot for 42 empty",
            );
            bench
        }
        Scenario::BackToBack => {
            let mut bench = Bench::new(&config, oslo(7))?;
            let first = bench.engine.modify(
                RecordId::new(7),
                || city("A").into(),
                CommandOptions::new(),
            );
            let second = bench.engine.modify(
                RecordId::new(7),
                || city("B").into(),
                CommandOptions::new(),
            );
            second.handle().wait_for_phase(Phase::holds_slot).await;
            bench.check(
                !first.handle().phase().holds_slot(),
                "first released before second simulated",
            );
            bench.check(
                started.elapsed() >= config.tick(),
                "second waited for first grace period",
            );
            let first = first.outcome().await?;
            let second = second.outcome().await?;
            bench.check(
                first.is_success() && second.is_success(),
                "both committed",
            );
            bench.check(
                bench.city(RecordId::new(7).into()).as_deref() == Some("B"),
                "second value wins",
            );
            bench
        }
        Scenario::RedirectRemove => {
            let mut bench = Bench::new(&config, oslo(7))?;
            let key = RecordId::new(7).into();
            let ticket = bench.engine.modify(
                RecordId::new(7),
                || city("X").into(),
                CommandOptions::new().with_grace_period(5),
            );
            ticket
                .handle()
                .wait_for_phase(|p| p == Phase::GracePeriod)
                .await;
            bench.check(
                bench.engine.redirect_remove(key).is_ok(),
                "redirect accepted",
            );
            let report = ticket.outcome().await?;
            bench.check(
                report.terminal == TerminalState::Cancelled && report.follow_up.is_some(),
                "modify cancelled with follow-up",
            );
            bench.engine.idle().await;
            bench.check(
                bench.engine.store().committed(&key).is_none(),
                "record removed",
            );
            bench.check(bench.engine.stats().follow_ups == 1, "one follow-up");
            bench
        }
        Scenario::RedirectEdit => {
            let mut bench = Bench::new(&config, Vec::new())?;
            let ticket = bench.engine.create(
                || city("Bergen").into(),
                CommandOptions::new().with_grace_period(5),
            );
            ticket
                .handle()
                .wait_for_phase(|p| p == Phase::GracePeriod)
                .await;
            bench.check(
                ticket.handle().redirect_edit(city("Tromsø")).is_ok(),
                "redirect accepted",
            );
            let report = ticket.outcome().await?;
            bench.check(report.is_success(), "create committed");
            bench.check(
                started.elapsed() < config.tick() * 5,
                "grace period not restarted",
            );
            bench.check(
                bench.city(report.resolved_key()).as_deref() == Some("Tromsø"),
                "replacement committed",
            );
            bench
        }
        Scenario::Abandon => {
            let mut bench = Bench::new(&config, oslo(7))?;
            let ticket = bench.engine.modify(
                RecordId::new(7),
                || Captured::Abandoned,
                CommandOptions::new(),
            );
            let report = ticket.outcome().await?;
            bench.check(report.terminal == TerminalState::Cancelled, "command cancelled");
            bench.check(bench.backing.commit_count() == 0, "nothing committed");
            bench
        }
        Scenario::RejectedCommit => {
            let mut bench = Bench::new(&config, oslo(7))?;
            bench
                .backing
                .reject_next(Rejection::Conflict(RecordId::new(7)));
            let ticket = bench.engine.modify(
                RecordId::new(7),
                || city("X").into(),
                CommandOptions::new(),
            );
            let report = ticket.outcome().await?;
            bench.check(report.terminal == TerminalState::Failed, "command failed");
            bench.check(report.kind == CommandKind::Modify, "modify reported");
            bench.check(
                bench.city(RecordId::new(7).into()).as_deref() == Some("Oslo"),
                "record rolled back",
            );
            bench
        }
    };

    Ok(bench.finish(name, started).await)
}
