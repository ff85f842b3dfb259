//! Testing utilities for the Tentative workspace
//!
//! Shared test helpers, fixtures, and assertions.

#![allow(missing_docs)]

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tentative_core::{
    CommandEngine, CommandReport, EngineConfig, MemoryBackingStore, ResultSink, TerminalState,
};
use tentative_record::{Fields, Record, RecordId, RecordKey, RecordStore};
use tokio::sync::Notify;

pub fn fields(pairs: &[(&str, &str)]) -> Fields {
    pairs.iter().copied().collect()
}

pub fn record(id: u64, pairs: &[(&str, &str)]) -> Record {
    Record::new(RecordId::new(id).into(), fields(pairs))
}

pub fn key(id: u64) -> RecordKey {
    RecordId::new(id).into()
}

/// Result sink that keeps every report for later inspection
#[derive(Debug, Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<CommandReport>>,
    arrived: Notify,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<CommandReport> {
        self.reports.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }

    pub fn for_key(&self, key: RecordKey) -> Vec<CommandReport> {
        self.reports
            .lock()
            .iter()
            .filter(|r| r.key == key || r.resolved_key() == key)
            .cloned()
            .collect()
    }

    pub fn terminals(&self) -> Vec<TerminalState> {
        self.reports.lock().iter().map(|r| r.terminal).collect()
    }

    /// Wait until at least `count` reports arrived
    pub async fn wait_for(&self, count: usize) -> Vec<CommandReport> {
        loop {
            let arrived = self.arrived.notified();
            if self.len() >= count {
                return self.reports();
            }
            arrived.await;
        }
    }
}

impl ResultSink for RecordingSink {
    fn report(&self, report: &CommandReport) {
        self.reports.lock().push(report.clone());
        self.arrived.notify_waiters();
    }
}

/// Engine wired to an in-memory backing store and a recording sink
pub struct TestBed {
    pub engine: CommandEngine,
    pub backing: Arc<MemoryBackingStore>,
    pub sink: Arc<RecordingSink>,
}

impl TestBed {
    pub fn store(&self) -> &Arc<RecordStore> {
        self.engine.store()
    }

    /// Assert that both views agree for every record and no slot is held
    pub fn assert_quiescent(&self) {
        assert_eq!(self.store().diverged_keys(), Vec::<RecordKey>::new());
        assert!(self.engine.registry().is_empty(), "slot left occupied");
        assert_eq!(self.store().committed_records(), self.backing.records());
    }
}

pub fn setup_engine(records: Vec<Record>, grace_period_secs: u64) -> TestBed {
    setup_engine_with(
        records,
        EngineConfig::new().with_grace_period(grace_period_secs),
        |backing| backing,
    )
}

pub fn setup_slow_engine(records: Vec<Record>, grace_period_secs: u64, latency: Duration) -> TestBed {
    setup_engine_with(
        records,
        EngineConfig::new().with_grace_period(grace_period_secs),
        |backing| backing.with_latency(latency),
    )
}

/// Like [`setup_engine`] with a custom configuration and backing-store tweaks
pub fn setup_engine_with(
    records: Vec<Record>,
    config: EngineConfig,
    tweak: impl FnOnce(MemoryBackingStore) -> MemoryBackingStore,
) -> TestBed {
    let backing = Arc::new(tweak(MemoryBackingStore::with_records(records.clone())));
    let sink = Arc::new(RecordingSink::new());
    let engine = CommandEngine::builder()
        .with_config(config)
        .with_store(Arc::new(RecordStore::with_records(records)))
        .with_backing(backing.clone())
        .with_sink(sink.clone())
        .build()
        .unwrap();
    TestBed {
        engine,
        backing,
        sink,
    }
}
