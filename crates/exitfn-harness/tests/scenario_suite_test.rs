//! Integration test: every registry scenario passes and logs a valid record.

use exitfn_harness::scenario::{SCENARIO_BLOCK_CAPACITY, run_scenarios_logged, walk_digest};
use exitfn_harness::structured_log::{LogEmitter, Outcome, validate_log_line};
use exitfn_harness::{ScenarioKind, run_scenario};

#[test]
fn every_scenario_passes() {
    for kind in ScenarioKind::ALL {
        let report = run_scenario(kind);
        assert_eq!(report.scenario, kind.as_str());
        assert_eq!(report.block_capacity, SCENARIO_BLOCK_CAPACITY);
        assert!(
            report.passed,
            "{} failed: {:#?}",
            kind.as_str(),
            report.checks.iter().filter(|c| !c.passed).collect::<Vec<_>>()
        );
        assert!(!report.checks.is_empty());
    }
}

#[test]
fn walk_digests_are_reproducible() {
    for kind in ScenarioKind::ALL {
        let first = run_scenario(kind);
        let second = run_scenario(kind);
        assert_eq!(first.walk_order, second.walk_order);
        assert_eq!(first.walk_digest, second.walk_digest);
        assert_eq!(first.walk_digest, walk_digest(&first.walk_order));
    }
}

#[test]
fn lifo_scenario_walks_newest_first() {
    let report = run_scenario(ScenarioKind::LifoOrder);
    assert_eq!(report.walk_order, (1..=10).rev().collect::<Vec<_>>());
    assert_eq!(report.used_counts, vec![2, 4, 4]);
    assert_eq!(report.allocations_total, 10);
    assert!(report.rejected_errnos.is_empty());
}

#[test]
fn reuse_scenarios_do_not_grow_the_chain() {
    let partial = run_scenario(ScenarioKind::PartialReuse);
    assert_eq!(partial.used_counts, vec![2]);
    assert_eq!(partial.blocks_allocated, 0);
    assert_eq!(partial.slots_reused, 1);

    let freed = run_scenario(ScenarioKind::FreedSlotReuse);
    assert_eq!(freed.blocks_allocated, 1);
    assert_eq!(freed.walk_order, vec![9, 8, 7, 6, 1]);
}

#[test]
fn stranding_scenario_reports_interior_free_slots() {
    let report = run_scenario(ScenarioKind::InteriorStranding);
    assert!(report.passed, "{:?}", report.checks);
    assert_eq!(report.used_counts, vec![2, 4, 4]);
    assert_eq!(report.walk_order, vec![10, 9, 8, 7, 6, 5, 1]);
}

#[test]
fn logged_run_emits_one_valid_line_per_scenario() {
    let mut emitter = LogEmitter::to_buffer("scenario", "it-1");
    let reports = run_scenarios_logged(&ScenarioKind::ALL, "strict", &mut emitter).unwrap();
    assert_eq!(reports.len(), ScenarioKind::ALL.len());

    let contents = emitter.contents();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), ScenarioKind::ALL.len());

    for (i, (line, kind)) in lines.iter().zip(ScenarioKind::ALL).enumerate() {
        let entry = validate_log_line(line, i + 1).unwrap_or_else(|errs| {
            panic!("line {} invalid: {:?}", i + 1, errs);
        });
        assert_eq!(entry.trace_id, format!("scenario::it-1::{:03}", i + 1));
        assert_eq!(entry.event, "scenario_result");
        assert_eq!(entry.scenario.as_deref(), Some(kind.as_str()));
        assert_eq!(entry.outcome, Some(Outcome::Pass));
        assert_eq!(entry.list.as_deref(), Some("local"));
        let details = entry.details.unwrap();
        assert_eq!(details["failed_checks"].as_array().map(Vec::len), Some(0));
    }

    let closed: serde_json::Value = serde_json::from_str(lines[4]).unwrap();
    assert_eq!(closed["scenario"], "closed-rejection");
    assert_eq!(closed["errno"], 125);
}
