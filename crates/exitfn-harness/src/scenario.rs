//! Deterministic registry scenarios.
//!
//! Every scenario runs against its own four-slot-block registry, so block
//! boundaries are crossed after a handful of registrations. Callbacks are
//! never invoked: "consuming" a slot means taking it off the walk, the way the
//! shutdown sequence does before calling it.

use std::ffi::{c_int, c_void};
use std::io::Write;
use std::time::Instant;

use exitfn_core::stdlib::{ChainSnapshot, CxaCallback, ExitArg, OwnerHandle, SlotId, SlotKind};
use exitfn_core::{RegisterError, Registry, RegistryConfig};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::HarnessError;
use crate::structured_log::{LogEmitter, LogLevel, Outcome};

/// Block capacity used by every scenario.
pub const SCENARIO_BLOCK_CAPACITY: usize = 4;

type ScenarioRegistry = Registry<SCENARIO_BLOCK_CAPACITY>;

extern "C" fn scenario_callback(_arg: *mut c_void, _status: c_int) {}

const SCENARIO_CALLBACK: CxaCallback = scenario_callback;

// ---------------------------------------------------------------------------
// Scenario catalogue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioKind {
    /// Ten registrations walk back newest first.
    LifoOrder,
    /// Five registrations: a second block becomes the head.
    BlockOverflow,
    /// Partially drained initial block takes the next registration at index 1.
    PartialReuse,
    /// Four consumed slots absorb four new registrations without a third block.
    FreedSlotReuse,
    /// Registration after close fails and leaves the chain untouched.
    ClosedRejection,
    /// Null callback fails before any allocation.
    NullRejection,
    /// Hitting the block budget fails cleanly and is retryable after a consume.
    AllocationFailure,
    /// Freed slots in a full interior block stay unused while newer blocks hold entries.
    InteriorStranding,
}

impl ScenarioKind {
    pub const ALL: [Self; 8] = [
        Self::LifoOrder,
        Self::BlockOverflow,
        Self::PartialReuse,
        Self::FreedSlotReuse,
        Self::ClosedRejection,
        Self::NullRejection,
        Self::AllocationFailure,
        Self::InteriorStranding,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LifoOrder => "lifo-order",
            Self::BlockOverflow => "block-overflow",
            Self::PartialReuse => "partial-reuse",
            Self::FreedSlotReuse => "freed-slot-reuse",
            Self::ClosedRejection => "closed-rejection",
            Self::NullRejection => "null-rejection",
            Self::AllocationFailure => "allocation-failure",
            Self::InteriorStranding => "interior-stranding",
        }
    }

    /// Look up a scenario by its [`as_str`](Self::as_str) name.
    pub fn from_name(name: &str) -> Result<Self, HarnessError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| HarnessError::UnknownScenario(name.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub block_capacity: usize,
    pub passed: bool,
    pub registered: usize,
    /// errno of every rejected registration, in order.
    pub rejected_errnos: Vec<i32>,
    /// Callback arguments in walk order at the end of the run.
    pub walk_order: Vec<usize>,
    /// Hex SHA-256 of `walk_order`, one decimal argument per line.
    pub walk_digest: String,
    /// `used` per block, head first.
    pub used_counts: Vec<usize>,
    pub allocations_total: u64,
    pub blocks_allocated: u64,
    pub slots_reused: u64,
    pub elapsed_ns: u64,
    pub checks: Vec<CheckResult>,
}

/// Hex SHA-256 over a walk order, one decimal argument per line.
#[must_use]
pub fn walk_digest(walk: &[usize]) -> String {
    let mut hasher = Sha256::new();
    for arg in walk {
        hasher.update(arg.to_string().as_bytes());
        hasher.update(b"\n");
    }
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

struct ScenarioRun {
    registry: ScenarioRegistry,
    registered: usize,
    rejected_errnos: Vec<i32>,
    checks: Vec<CheckResult>,
}

impl ScenarioRun {
    fn new(config: RegistryConfig) -> Self {
        Self {
            registry: Registry::with_config(config),
            registered: 0,
            rejected_errnos: Vec::new(),
            checks: Vec::new(),
        }
    }

    fn try_register(&mut self, arg: usize) -> Result<SlotId, RegisterError> {
        self.record(
            self.registry
                .register(Some(SCENARIO_CALLBACK), ExitArg(arg), OwnerHandle::NONE),
        )
    }

    fn try_register_null(&mut self) -> Result<SlotId, RegisterError> {
        self.record(self.registry.register(None, ExitArg::NULL, OwnerHandle::NONE))
    }

    fn record(
        &mut self,
        result: Result<SlotId, RegisterError>,
    ) -> Result<SlotId, RegisterError> {
        match result {
            Ok(_) => self.registered += 1,
            Err(err) => self.rejected_errnos.push(err.errno()),
        }
        result
    }

    /// Register each argument; the first failure is recorded as a check.
    fn register_all(&mut self, args: impl IntoIterator<Item = usize>) {
        for arg in args {
            if let Err(err) = self.try_register(arg) {
                self.check(format!("register {arg}"), false, err.to_string());
                return;
            }
        }
    }

    fn walk(&self) -> Vec<usize> {
        self.registry
            .lock()
            .pending()
            .map(|(_, handler)| handler.arg.0)
            .collect()
    }

    fn snapshot(&self) -> ChainSnapshot {
        self.registry.snapshot()
    }

    /// Take `count` entries off the front of the walk.
    fn consume(&mut self, count: usize) -> Vec<usize> {
        let mut guard = self.registry.lock();
        (0..count)
            .map_while(|_| guard.take_next())
            .map(|(_, handler)| handler.arg.0)
            .collect()
    }

    /// Mark the slots holding `args` free, as an owner-scoped unload would.
    fn release(&mut self, args: &[usize]) -> usize {
        let mut guard = self.registry.lock();
        let ids: Vec<SlotId> = guard
            .pending()
            .filter(|(_, handler)| args.contains(&handler.arg.0))
            .map(|(id, _)| id)
            .collect();
        ids.into_iter().filter(|&id| guard.mark_free(id)).count()
    }

    fn check(&mut self, name: impl Into<String>, passed: bool, detail: impl Into<String>) {
        self.checks.push(CheckResult {
            name: name.into(),
            passed,
            detail: detail.into(),
        });
    }

    fn check_eq<T: PartialEq + std::fmt::Debug>(
        &mut self,
        name: impl Into<String>,
        actual: T,
        expected: T,
    ) {
        let passed = actual == expected;
        let detail = if passed {
            format!("{actual:?}")
        } else {
            format!("expected {expected:?}, got {actual:?}")
        };
        self.check(name, passed, detail);
    }

    fn finish(self, kind: ScenarioKind, started: Instant) -> ScenarioReport {
        let walk_order = self.walk();
        let snapshot = self.snapshot();
        let stats = self.registry.stats();
        ScenarioReport {
            scenario: kind.as_str().to_string(),
            block_capacity: SCENARIO_BLOCK_CAPACITY,
            passed: self.checks.iter().all(|c| c.passed),
            registered: self.registered,
            rejected_errnos: self.rejected_errnos,
            walk_digest: walk_digest(&walk_order),
            walk_order,
            used_counts: snapshot.used_counts(),
            allocations_total: stats.allocations_total,
            blocks_allocated: stats.blocks_allocated,
            slots_reused: stats.slots_reused,
            elapsed_ns: u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX),
            checks: self.checks,
        }
    }
}

/// Run one scenario on a fresh registry.
#[must_use]
pub fn run_scenario(kind: ScenarioKind) -> ScenarioReport {
    let started = Instant::now();
    let config = match kind {
        ScenarioKind::AllocationFailure => RegistryConfig::with_max_blocks(1),
        _ => RegistryConfig::unbounded(),
    };
    let mut run = ScenarioRun::new(config);

    match kind {
        ScenarioKind::LifoOrder => {
            run.register_all(1..=10);
            let walk = run.walk();
            run.check_eq("walk newest first", walk, (1..=10).rev().collect());
            run.check_eq("blocks", run.snapshot().block_count(), 3);
        }
        ScenarioKind::BlockOverflow => {
            run.register_all(1..=5);
            let snapshot = run.snapshot();
            run.check_eq("blocks", snapshot.block_count(), 2);
            run.check_eq("used counts", snapshot.used_counts(), vec![1, 4]);
            let head = run.registry.lock().pending().next().map(|(id, h)| (id, h.arg.0));
            run.check_eq(
                "newest at head index 0",
                head,
                Some((SlotId { block: 1, index: 0 }, 5)),
            );
            let walk = run.walk();
            run.check_eq("walk", walk, vec![5, 4, 3, 2, 1]);
        }
        ScenarioKind::PartialReuse => {
            run.register_all(1..=4);
            let released = run.release(&[2, 3, 4]);
            run.check_eq("released", released, 3);
            match run.try_register(5) {
                Ok(id) => run.check_eq("reused slot", id, SlotId { block: 0, index: 1 }),
                Err(err) => run.check("register 5", false, err.to_string()),
            }
            let snapshot = run.snapshot();
            run.check_eq("blocks", snapshot.block_count(), 1);
            run.check_eq("used counts", snapshot.used_counts(), vec![2]);
            let walk = run.walk();
            run.check_eq("walk", walk, vec![5, 1]);
        }
        ScenarioKind::FreedSlotReuse => {
            let b = SCENARIO_BLOCK_CAPACITY;
            run.register_all(1..=b + 1);
            let consumed = run.consume(b);
            run.check_eq("consumed newest", consumed, vec![5, 4, 3, 2]);
            run.register_all(b + 2..=2 * b + 1);
            run.check_eq("blocks allocated", run.registry.stats().blocks_allocated, 1);
            let walk = run.walk();
            run.check_eq("walk", walk, vec![9, 8, 7, 6, 1]);
        }
        ScenarioKind::ClosedRejection => {
            run.register_all(1..=3);
            let before = {
                let mut guard = run.registry.lock();
                guard.close();
                guard.snapshot()
            };
            for arg in 4..=6 {
                let result = run.try_register(arg);
                run.check_eq(
                    format!("register {arg} after close"),
                    result,
                    Err(RegisterError::RegistryClosed),
                );
            }
            run.check_eq("chain unchanged", run.snapshot(), before);
        }
        ScenarioKind::NullRejection => {
            run.register_all(1..=4);
            let before = run.snapshot();
            let result = run.try_register_null();
            run.check_eq("null rejected", result, Err(RegisterError::InvalidArgument));
            let after = run.snapshot();
            run.check_eq("no new block", after.block_count(), before.block_count());
            run.check_eq(
                "allocation counter unchanged",
                after.allocations_total,
                before.allocations_total,
            );
        }
        ScenarioKind::AllocationFailure => {
            run.register_all(1..=4);
            let before = run.snapshot();
            let result = run.try_register(5);
            run.check_eq(
                "budget exhausted",
                result,
                Err(RegisterError::AllocationFailure),
            );
            run.check_eq("chain unchanged", run.snapshot(), before);
            run.consume(1);
            match run.try_register(5) {
                Ok(id) => run.check_eq("retry reuses slot", id, SlotId { block: 0, index: 3 }),
                Err(err) => run.check("retry", false, err.to_string()),
            }
        }
        ScenarioKind::InteriorStranding => {
            run.register_all(1..=9);
            let released = run.release(&[2, 3, 4]);
            run.check_eq("released", released, 3);
            match run.try_register(10) {
                Ok(id) => run.check_eq("lands in head", id, SlotId { block: 2, index: 1 }),
                Err(err) => run.check("register 10", false, err.to_string()),
            }
            let snapshot = run.snapshot();
            run.check_eq("used counts", snapshot.used_counts(), vec![2, 4, 4]);
            let tail = snapshot.blocks.last().map(|block| block.slots.clone());
            run.check_eq(
                "tail still stranded",
                tail,
                Some(vec![
                    SlotKind::Cxa,
                    SlotKind::Free,
                    SlotKind::Free,
                    SlotKind::Free,
                ]),
            );
        }
    }

    run.check_eq(
        "no unassigned slot",
        run.snapshot().count(SlotKind::Unassigned),
        0,
    );
    run.finish(kind, started)
}

/// Run `kinds` in order, logging one entry per scenario.
pub fn run_scenarios_logged<W: Write>(
    kinds: &[ScenarioKind],
    mode: &str,
    emitter: &mut LogEmitter<W>,
) -> Result<Vec<ScenarioReport>, HarnessError> {
    let mut reports = Vec::with_capacity(kinds.len());
    for &kind in kinds {
        let report = run_scenario(kind);
        let level = if report.passed {
            LogLevel::Info
        } else {
            LogLevel::Error
        };
        let mut entry = emitter
            .entry(level, "scenario_result")
            .with_mode(mode)
            .with_list("local")
            .with_scenario(kind.as_str())
            .with_outcome(Outcome::from_passed(report.passed))
            .with_latency_ns(report.elapsed_ns)
            .with_details(serde_json::json!({
                "walk_digest": report.walk_digest,
                "used_counts": report.used_counts,
                "allocations_total": report.allocations_total,
                "failed_checks": report
                    .checks
                    .iter()
                    .filter(|c| !c.passed)
                    .map(|c| format!("{}: {}", c.name, c.detail))
                    .collect::<Vec<_>>(),
            }));
        if let Some(&errno) = report.rejected_errnos.last() {
            entry = entry.with_errno(errno);
        }
        emitter.emit_entry(entry)?;
        reports.push(report);
    }
    emitter.flush()?;
    Ok(reports)
}
