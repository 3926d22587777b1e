//! Integration test: concurrent registration stress through the harness.

use exitfn_harness::stress::run_stress_logged;
use exitfn_harness::structured_log::{LogEmitter, Outcome, validate_log_line};
use exitfn_harness::{StressConfig, run_stress};

#[test]
fn concurrent_registration_stores_every_callback_once() {
    let report = run_stress(StressConfig {
        threads: 8,
        per_thread: 400,
        consume: false,
    })
    .unwrap();
    assert!(report.passed, "{report:?}");
    assert_eq!(report.registered, 3200);
    assert_eq!(report.remaining, 3200);
    assert_eq!(report.consumed, 0);
    assert_eq!(report.duplicates, 0);
    assert_eq!(report.missing, 0);
    assert_eq!(report.order_violations, 0);
    assert_eq!(report.blocks, 100);
}

#[test]
fn concurrent_consumer_never_sees_unfilled_slots() {
    let report = run_stress(StressConfig {
        threads: 4,
        per_thread: 300,
        consume: true,
    })
    .unwrap();
    assert!(report.passed, "{report:?}");
    assert_eq!(report.unassigned_observed, 0);
    assert_eq!(report.remaining + report.consumed, 1200);
    assert_eq!(report.duplicates, 0);
    assert_eq!(report.missing, 0);
}

#[test]
fn logged_stress_emits_valid_result_line() {
    let mut emitter = LogEmitter::to_buffer("stress", "it-1");
    let config = StressConfig {
        threads: 2,
        per_thread: 50,
        consume: false,
    };
    let report = run_stress_logged(config, "hardened", &mut emitter).unwrap();
    assert!(report.passed);

    let contents = emitter.contents();
    let entry = validate_log_line(contents.trim(), 1).unwrap();
    assert_eq!(entry.trace_id, "stress::it-1::001");
    assert_eq!(entry.event, "stress_result");
    assert_eq!(entry.mode.as_deref(), Some("hardened"));
    assert_eq!(entry.outcome, Some(Outcome::Pass));
    let details = entry.details.unwrap();
    assert_eq!(details["registered"], 100);
    assert_eq!(details["walk_digest"], report.walk_digest);
}

#[test]
fn invalid_config_is_logged_as_error() {
    let mut emitter = LogEmitter::to_buffer("stress", "it-2");
    let config = StressConfig {
        threads: 0,
        per_thread: 10,
        consume: false,
    };
    assert!(run_stress_logged(config, "strict", &mut emitter).is_err());

    let entry = validate_log_line(emitter.contents().trim(), 1).unwrap();
    assert_eq!(entry.event, "stress_error");
    assert_eq!(entry.outcome, Some(Outcome::Error));
    assert!(entry.errno.is_none());
}
