//! Scenario and stress harness for the exit-function registry.
//!
//! This crate provides:
//! - Scenarios: small deterministic runs against a four-slot-block registry
//!   that check walk order, slot reuse and rejection paths
//! - Stress: many threads registering (and optionally consuming) at once
//! - Structured JSONL logs for every run, plus a validator for them

#![forbid(unsafe_code)]

pub mod error;
pub mod scenario;
pub mod stress;
pub mod structured_log;

pub use error::HarnessError;
pub use scenario::{ScenarioKind, ScenarioReport, run_scenario};
pub use stress::{StressConfig, StressReport, run_stress};
