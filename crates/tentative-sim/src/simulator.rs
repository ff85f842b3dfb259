//! Tentative Simulator - Randomized Command Workloads
//!
//! Seeds an in-memory backing store, drives a random mix of create, modify
//! and remove commands against it, fires random redirects and cancels at
//! them, and finally checks that:
//! - Every record's visible value agrees with its committed value
//! - No registry slot is left occupied
//! - The local committed view matches the backing store
//! - No two commands ever held the same record at once
//! - Every command produced exactly one report

use crate::flaky::FlakyBackingStore;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tentative_core::{
    Captured, CommandEngine, CommandHandle, CommandOptions, CommandReport, EngineConfig,
    EngineStats, FanoutSink, MemoryBackingStore, ResultSink, TerminalState, TracingSink,
};
use tentative_record::{Fields, Record, RecordId, RecordKey, RecordStore};
use tokio::task::JoinSet;

const CITIES: &[&str] = &["Oslo", "Bergen", "Tromsø", "Bodø", "Ålesund", "Narvik"];

/// Simulator configuration
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Records seeded before the run
    pub records: u64,
    /// Commands to submit
    pub operations: u64,
    /// Share of commits the backing store rejects
    pub reject_rate: f64,
    /// Share of commands that receive a signal
    pub signal_rate: f64,
    /// Share of commands whose input is abandoned
    pub abandon_rate: f64,
    /// Engine configuration
    pub engine: EngineConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            records: 20,
            operations: 200,
            reject_rate: 0.05,
            signal_rate: 0.3,
            abandon_rate: 0.05,
            engine: EngineConfig::new()
                .with_grace_period(3)
                .with_tick(Duration::from_millis(10)),
        }
    }
}

/// A violation detected during simulation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum Violation {
    /// Visible and committed views disagree after the run
    Diverged { keys: Vec<String> },
    /// Slots still held after every command finished
    SlotLeftOccupied { keys: Vec<String> },
    /// Local committed view differs from the backing store
    BackingMismatch { local: usize, backing: usize },
    /// Two commands held the same record at once
    ConcurrentHolders { key: String, holders: usize },
    /// Reports do not match submitted commands
    MissingReports { submitted: usize, reported: usize },
}

/// Statistics for simulation
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulatorStats {
    pub creates: u64,
    pub modifies: u64,
    pub removes: u64,
    pub abandoned: u64,
    pub signals_sent: u64,
    pub signals_accepted: u64,
    pub signals_rejected: u64,
    pub injected_rejections: u64,
    pub samples: u64,
}

/// Final report from simulator
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorReport {
    pub config: SimulatorConfig,
    pub stats: SimulatorStats,
    pub engine: EngineStats,
    pub records_committed: usize,
    pub elapsed_ms: u64,
    pub violations: Vec<Violation>,
}

impl SimulatorReport {
    /// Check if simulation passed all criteria
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Tentative Simulator Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!(
            "Grace Period: {}s x {}ms\n",
            self.config.engine.grace_period_secs, self.config.engine.tick_ms
        ));
        report.push_str(&format!(
            "Commands: {} create, {} modify, {} remove ({} abandoned)\n",
            self.stats.creates, self.stats.modifies, self.stats.removes, self.stats.abandoned
        ));
        report.push_str(&format!(
            "Submitted: {} ({} follow-ups)\n",
            self.engine.submitted, self.engine.follow_ups
        ));
        report.push_str(&format!("Successful: {}\n", self.engine.successful));
        report.push_str(&format!("Cancelled: {}\n", self.engine.cancelled));
        report.push_str(&format!("Failed: {}\n", self.engine.failed));
        report.push_str(&format!(
            "Signals: {} sent, {} accepted, {} rejected\n",
            self.stats.signals_sent, self.stats.signals_accepted, self.stats.signals_rejected
        ));
        report.push_str(&format!(
            "Injected Rejections: {}\n",
            self.stats.injected_rejections
        ));
        report.push_str(&format!("Exclusivity Samples: {}\n", self.stats.samples));
        report.push_str(&format!("Records Committed: {}\n", self.records_committed));
        report.push_str(&format!("Elapsed: {}ms\n", self.elapsed_ms));
        report.push_str(&format!("Violations: {}\n", self.violations.len()));

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                report.push_str(&format!("{}. {:?}\n", i + 1, v));
            }
        }

        report.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));

        report
    }
}

/// Counts reports as they arrive
#[derive(Debug, Default)]
struct Tally {
    reports: Mutex<HashMap<TerminalState, usize>>,
}

impl Tally {
    fn total(&self) -> usize {
        self.reports.lock().values().sum()
    }
}

impl ResultSink for Tally {
    fn report(&self, report: &CommandReport) {
        *self.reports.lock().entry(report.terminal).or_default() += 1;
    }
}

fn random_fields(rng: &mut StdRng, name: &str) -> Fields {
    Fields::new()
        .with("name", name)
        .with("city", CITIES[rng.gen_range(0..CITIES.len())])
}

fn seed_records(rng: &mut StdRng, count: u64) -> Vec<Record> {
    (1..=count)
        .map(|id| {
            Record::new(
                RecordId::new(id).into(),
                random_fields(rng, &format!("record-{id}")),
            )
        })
        .collect()
}

/// Check that at most one command holds each record
///
/// Phases are read one handle at a time, so an apparent overlap is read
/// again before it counts: a holder seen after another one implies the
/// earlier one has released by the time it is read again.
fn sample_holders(handles: &mut Vec<CommandHandle>, violations: &mut Vec<Violation>) {
    handles.retain(|h| !h.phase().is_terminal());
    let mut holders: HashMap<RecordKey, Vec<&CommandHandle>> = HashMap::new();
    for handle in handles.iter().filter(|h| h.phase().holds_slot()) {
        holders.entry(handle.key()).or_default().push(handle);
    }
    for (key, suspects) in holders {
        if suspects.len() < 2 {
            continue;
        }
        let count = suspects.iter().filter(|h| h.phase().holds_slot()).count();
        if count > 1 {
            violations.push(Violation::ConcurrentHolders {
                key: key.to_string(),
                holders: count,
            });
        }
    }
}

/// Run the simulator
///
/// # Errors
/// Returns an error if the engine cannot be built or a signal task panicked
pub async fn run_simulator(config: SimulatorConfig) -> anyhow::Result<SimulatorReport> {
    let started = Instant::now();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let seeded = seed_records(&mut rng, config.records);

    let memory = Arc::new(MemoryBackingStore::with_records(seeded.clone()));
    let flaky = Arc::new(FlakyBackingStore::new(
        memory.clone(),
        config.reject_rate,
        config.seed.wrapping_add(1),
    ));
    let tally = Arc::new(Tally::default());
    let engine = CommandEngine::builder()
        .with_config(config.engine.clone())
        .with_store(Arc::new(RecordStore::with_records(seeded)))
        .with_backing(flaky.clone())
        .with_sink(Arc::new(
            FanoutSink::new()
                .with(tally.clone())
                .with(Arc::new(TracingSink)),
        ))
        .build()?;

    let tick = config.engine.tick();
    let grace_span = tick * u32::try_from(config.engine.grace_period_secs + 1).unwrap_or(u32::MAX);
    let mut stats = SimulatorStats::default();
    let mut violations = Vec::new();
    let mut handles = Vec::new();
    let mut signals = JoinSet::new();
    let abandon_rate = config.abandon_rate.clamp(0.0, 1.0);
    let signal_rate = config.signal_rate.clamp(0.0, 1.0);

    for op in 0..config.operations {
        let captured = if rng.gen_bool(abandon_rate) {
            stats.abandoned += 1;
            Captured::Abandoned
        } else {
            Captured::Fields(random_fields(&mut rng, &format!("op-{op}")))
        };
        let existing: Vec<RecordId> = engine
            .store()
            .committed_records()
            .iter()
            .filter_map(Record::id)
            .collect();

        let roll: f64 = rng.gen();
        let ticket = if existing.is_empty() || roll < 0.25 {
            stats.creates += 1;
            engine.create(move || captured, CommandOptions::new())
        } else {
            let target = existing[rng.gen_range(0..existing.len())];
            if roll < 0.8 {
                stats.modifies += 1;
                engine.modify(target, move || captured, CommandOptions::new())
            } else {
                stats.removes += 1;
                engine.remove(target, CommandOptions::new())
            }
        };

        if rng.gen_bool(signal_rate) {
            stats.signals_sent += 1;
            let handle = ticket.handle().clone();
            let delay = grace_span.mul_f64(rng.gen_range(0.0..1.0));
            let pick = rng.gen_range(0..3);
            let edit = random_fields(&mut rng, &format!("edit-{op}"));
            signals.spawn(async move {
                tokio::time::sleep(delay).await;
                let delivered = match pick {
                    0 => handle.redirect_edit(edit),
                    1 => handle.redirect_remove(),
                    _ => handle.cancel(),
                };
                delivered.is_ok()
            });
        }
        handles.push(ticket.handle().clone());

        tokio::time::sleep(tick.mul_f64(rng.gen_range(0.0..0.5))).await;
        sample_holders(&mut handles, &mut violations);
        stats.samples += 1;
    }

    while engine.stats().in_flight > 0 {
        sample_holders(&mut handles, &mut violations);
        stats.samples += 1;
        tokio::time::sleep(tick / 2).await;
    }
    engine.idle().await;

    while let Some(accepted) = signals.join_next().await {
        if accepted? {
            stats.signals_accepted += 1;
        } else {
            stats.signals_rejected += 1;
        }
    }
    stats.injected_rejections = flaky.injected();

    let store = engine.store();
    let diverged = store.diverged_keys();
    if !diverged.is_empty() {
        violations.push(Violation::Diverged {
            keys: diverged.iter().map(ToString::to_string).collect(),
        });
    }
    let occupied = engine.registry().active_keys();
    if !occupied.is_empty() {
        violations.push(Violation::SlotLeftOccupied {
            keys: occupied.iter().map(ToString::to_string).collect(),
        });
    }
    let local = store.committed_records();
    let backing = memory.records();
    if local != backing {
        violations.push(Violation::BackingMismatch {
            local: local.len(),
            backing: backing.len(),
        });
    }
    let engine_stats = engine.stats();
    if tally.total() != engine_stats.submitted {
        violations.push(Violation::MissingReports {
            submitted: engine_stats.submitted,
            reported: tally.total(),
        });
    }

    Ok(SimulatorReport {
        config,
        stats,
        engine: engine_stats,
        records_committed: local.len(),
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        violations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn small(seed: u64) -> SimulatorConfig {
        SimulatorConfig {
            seed,
            records: 5,
            operations: 40,
            ..SimulatorConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn simulation_passes() {
        let report = run_simulator(small(42)).await.unwrap();
        assert!(report.passed(), "{}", report.generate_text());
        assert_eq!(
            report.stats.creates + report.stats.modifies + report.stats.removes,
            40
        );
        assert!(report.engine.submitted >= 40);
    }

    #[tokio::test(start_paused = true)]
    async fn simulation_survives_rejections() {
        let config = SimulatorConfig {
            reject_rate: 0.5,
            ..small(7)
        };
        let report = run_simulator(config).await.unwrap();
        assert!(report.passed(), "{}", report.generate_text());
        assert!(report.stats.injected_rejections > 0);
        assert!(report.engine.failed > 0);
    }

    #[test]
    fn text_report_lists_violations() {
        let report = SimulatorReport {
            config: SimulatorConfig::default(),
            stats: SimulatorStats::default(),
            engine: EngineStats::default(),
            records_committed: 0,
            elapsed_ms: 0,
            violations: vec![Violation::BackingMismatch {
                local: 1,
                backing: 2,
            }],
        };
        let text = report.generate_text();
        assert!(text.contains("BackingMismatch"));
        assert!(text.contains("Result: FAIL"));
    }
}
