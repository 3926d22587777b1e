//! Concurrent registration stress.
//!
//! `threads` workers each register `per_thread` callbacks on one shared
//! registry, released together by a barrier. An optional consumer thread takes
//! entries off the walk while the workers run and checks that no snapshot ever
//! shows a reserved-but-unfilled slot.

use std::collections::HashSet;
use std::ffi::{c_int, c_void};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Instant;

use exitfn_core::stdlib::{CxaCallback, ExitArg, OwnerHandle, SlotKind};
use exitfn_core::{RegisterError, Registry};
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;
use crate::scenario::walk_digest;
use crate::structured_log::{LogEmitter, LogLevel, Outcome};

/// Distance between the argument ranges of two workers.
pub const ARG_STRIDE: usize = 1_000_000;

extern "C" fn stress_callback(_arg: *mut c_void, _status: c_int) {}

const STRESS_CALLBACK: CxaCallback = stress_callback;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressConfig {
    pub threads: usize,
    pub per_thread: usize,
    /// Run a consumer thread alongside the workers.
    pub consume: bool,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 8,
            per_thread: 500,
            consume: false,
        }
    }
}

impl StressConfig {
    fn validate(&self) -> Result<(), HarnessError> {
        if self.threads == 0 {
            return Err(HarnessError::InvalidConfig("threads must be > 0".into()));
        }
        if self.per_thread == 0 || self.per_thread >= ARG_STRIDE {
            return Err(HarnessError::InvalidConfig(format!(
                "per_thread must be in 1..{ARG_STRIDE}"
            )));
        }
        if self.threads > usize::MAX / ARG_STRIDE - 1 {
            return Err(HarnessError::InvalidConfig("too many threads".into()));
        }
        Ok(())
    }
}

/// Argument registered by worker `thread` for its `i`-th callback. Never zero.
#[must_use]
pub const fn arg_for(thread: usize, i: usize) -> usize {
    (thread + 1) * ARG_STRIDE + i
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressReport {
    pub config: StressConfig,
    pub passed: bool,
    pub registered: usize,
    pub consumed: usize,
    pub remaining: usize,
    pub blocks: usize,
    /// Arguments seen more than once across remaining and consumed entries.
    pub duplicates: usize,
    /// Arguments registered but neither remaining nor consumed.
    pub missing: usize,
    /// Adjacent same-worker pairs in the walk that are not newest first.
    pub order_violations: usize,
    pub unassigned_observed: usize,
    pub slowest_register_ns: u64,
    pub elapsed_ns: u64,
    pub walk_digest: String,
}

fn nanos(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Run one stress round on a fresh registry.
pub fn run_stress(config: StressConfig) -> Result<StressReport, HarnessError> {
    config.validate()?;
    let started = Instant::now();
    let registry: Arc<Registry> = Arc::new(Registry::new());
    let parties = config.threads + usize::from(config.consume);
    let barrier = Arc::new(Barrier::new(parties));
    let done = Arc::new(AtomicBool::new(false));

    let consumer = config.consume.then(|| {
        let registry = Arc::clone(&registry);
        let barrier = Arc::clone(&barrier);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            barrier.wait();
            let mut consumed = Vec::new();
            let mut unassigned = 0;
            loop {
                let finished = done.load(Ordering::Acquire);
                let mut guard = registry.lock();
                unassigned += guard.snapshot().count(SlotKind::Unassigned);
                if let Some((_, handler)) = guard.take_next() {
                    consumed.push(handler.arg.0);
                }
                drop(guard);
                if finished {
                    break;
                }
                std::thread::yield_now();
            }
            (consumed, unassigned)
        })
    });

    let workers: Vec<_> = (0..config.threads)
        .map(|thread| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || -> Result<u64, RegisterError> {
                barrier.wait();
                let mut slowest = 0;
                for i in 0..config.per_thread {
                    let t0 = Instant::now();
                    registry.register(
                        Some(STRESS_CALLBACK),
                        ExitArg(arg_for(thread, i)),
                        OwnerHandle::NONE,
                    )?;
                    slowest = slowest.max(nanos(t0.elapsed()));
                }
                Ok(slowest)
            })
        })
        .collect();

    let mut slowest_register_ns = 0;
    let mut first_error = None;
    for (thread, handle) in workers.into_iter().enumerate() {
        let error = match handle.join() {
            Ok(Ok(slowest)) => {
                slowest_register_ns = slowest_register_ns.max(slowest);
                continue;
            }
            Ok(Err(err)) => HarnessError::Register(err),
            Err(_) => HarnessError::WorkerPanicked(thread),
        };
        if first_error.is_none() {
            first_error = Some(error);
        }
    }
    done.store(true, Ordering::Release);

    let (consumed, unassigned_observed) = match consumer {
        Some(handle) => handle
            .join()
            .map_err(|_| HarnessError::WorkerPanicked(config.threads))?,
        None => (Vec::new(), 0),
    };
    if let Some(err) = first_error {
        return Err(err);
    }

    let guard = registry.lock();
    let walk: Vec<usize> = guard.pending().map(|(_, handler)| handler.arg.0).collect();
    let snapshot = guard.snapshot();
    drop(guard);

    let registered = config.threads * config.per_thread;
    let mut seen = HashSet::with_capacity(registered);
    let duplicates = walk
        .iter()
        .chain(&consumed)
        .filter(|&&arg| !seen.insert(arg))
        .count();
    let missing = (0..config.threads)
        .flat_map(|t| (0..config.per_thread).map(move |i| arg_for(t, i)))
        .filter(|arg| !seen.contains(arg))
        .count();

    // Per worker, the walk must visit its callbacks newest first.
    let mut last_by_thread = vec![usize::MAX; config.threads];
    let mut order_violations = 0;
    for &arg in &walk {
        let thread = arg / ARG_STRIDE - 1;
        let Some(last) = last_by_thread.get_mut(thread) else {
            continue;
        };
        if arg >= *last {
            order_violations += 1;
        }
        *last = arg;
    }

    let unassigned_observed = unassigned_observed + snapshot.count(SlotKind::Unassigned);
    let passed = duplicates == 0
        && missing == 0
        && order_violations == 0
        && unassigned_observed == 0
        && walk.len() + consumed.len() == registered;

    Ok(StressReport {
        config,
        passed,
        registered,
        consumed: consumed.len(),
        remaining: walk.len(),
        blocks: snapshot.block_count(),
        duplicates,
        missing,
        order_violations,
        unassigned_observed,
        slowest_register_ns,
        elapsed_ns: nanos(started.elapsed()),
        walk_digest: walk_digest(&walk),
    })
}

/// Run a stress round and log its result.
pub fn run_stress_logged<W: Write>(
    config: StressConfig,
    mode: &str,
    emitter: &mut LogEmitter<W>,
) -> Result<StressReport, HarnessError> {
    let report = match run_stress(config) {
        Ok(report) => report,
        Err(err) => {
            let mut entry = emitter
                .entry(LogLevel::Error, "stress_error")
                .with_mode(mode)
                .with_list("local")
                .with_outcome(Outcome::Error)
                .with_details(serde_json::json!({ "error": err.to_string() }));
            if let HarnessError::Register(register_err) = &err {
                entry = entry.with_errno(register_err.errno());
            }
            emitter.emit_entry(entry)?;
            emitter.flush()?;
            return Err(err);
        }
    };

    let level = if report.passed {
        LogLevel::Info
    } else {
        LogLevel::Error
    };
    let entry = emitter
        .entry(level, "stress_result")
        .with_mode(mode)
        .with_list("local")
        .with_outcome(Outcome::from_passed(report.passed))
        .with_latency_ns(report.slowest_register_ns)
        .with_details(serde_json::to_value(&report)?);
    emitter.emit_entry(entry)?;
    emitter.flush()?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_configs() {
        for config in [
            StressConfig {
                threads: 0,
                ..StressConfig::default()
            },
            StressConfig {
                per_thread: 0,
                ..StressConfig::default()
            },
            StressConfig {
                per_thread: ARG_STRIDE,
                ..StressConfig::default()
            },
        ] {
            assert!(matches!(
                run_stress(config),
                Err(HarnessError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn args_are_distinct_per_worker() {
        assert_ne!(arg_for(0, 0), 0);
        assert_eq!(arg_for(1, 0) - arg_for(0, 0), ARG_STRIDE);
        assert_eq!(arg_for(2, 5) / ARG_STRIDE - 1, 2);
    }

    #[test]
    fn single_worker_keeps_everything_in_order() {
        let report = run_stress(StressConfig {
            threads: 1,
            per_thread: 100,
            consume: false,
        })
        .unwrap();
        assert!(report.passed, "{report:?}");
        assert_eq!(report.remaining, 100);
        assert_eq!(report.blocks, 4);
    }
}
