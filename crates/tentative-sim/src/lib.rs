//! Tentative Simulator
//!
//! Randomized workloads and named scenarios for exercising change commands
//! against an in-memory backing store.

#![allow(missing_docs)]

pub mod flaky;
pub mod scenario;
pub mod simulator;

pub use flaky::FlakyBackingStore;
pub use scenario::{run_scenario, Scenario, ScenarioOutcome};
pub use simulator::{run_simulator, SimulatorConfig, SimulatorReport, SimulatorStats, Violation};
