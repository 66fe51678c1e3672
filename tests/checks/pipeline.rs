use stagegate::checks::pipeline::{
    PhaseRegistry, RunMode, Step, ToleranceLedger, TransitionRule, OrderMachine, validate_run,
};
use stagegate::core::error::StagegateError;
use stagegate::core::records::{DecisionRecord, HandoffRecord, TeamRecord};
use stagegate::core::store::{Row, Rows, parse_csv_rows};
use std::collections::BTreeMap;

const TEAMS: &str = "team_id,phase_order,optional_in_modes
blue,1,
red,2,
green,3,
black,4,
white,5,
grey,6,
qa_fixer,7,
";

/// Optional phases declared through config, not the registry column.
fn lite_registry() -> PhaseRegistry {
    let rows: Rows<TeamRecord> = parse_csv_rows("team_registry.csv", TEAMS).unwrap();
    let mut optional = BTreeMap::new();
    optional.insert(
        "lite".to_string(),
        vec!["green".to_string(), "black".to_string(), "grey".to_string()],
    );
    PhaseRegistry::load(&rows, &optional).unwrap()
}

fn handoffs(run_id: &str, pairs: &[(&str, &str)]) -> Vec<Row<HandoffRecord>> {
    pairs
        .iter()
        .enumerate()
        .map(|(i, (from, to))| Row {
            line: i as u64 + 2,
            index: i,
            record: HandoffRecord {
                entry_id: format!("H-{}", i + 1),
                run_id: run_id.to_string(),
                timestamp_utc: format!("2026-02-10T{:02}:00:00Z", 8 + i),
                from_team: from.to_string(),
                to_team: to.to_string(),
                ..Default::default()
            },
        })
        .collect()
}

const SCENARIO: &[(&str, &str)] = &[("blue", "red"), ("red", "white"), ("white", "qa_fixer")];

#[test]
fn scenario_a_lite_run_skipping_only_optional_phases_passes() {
    let registry = lite_registry();
    let rows = handoffs("R1", SCENARIO);
    let refs: Vec<&Row<HandoffRecord>> = rows.iter().collect();
    let verdict = validate_run("R1", &refs, "handoff_log.csv", &registry, RunMode::Lite, &[]);
    assert!(verdict.passed(), "{:?}", verdict.violations);
    assert_eq!(verdict.states, vec![2, 5, 7]);
    assert_eq!(verdict.transitions, 3);
}

#[test]
fn scenario_b_same_run_in_full_mode_fails_on_the_skip() {
    let registry = lite_registry();
    let rows = handoffs("R1", SCENARIO);
    let refs: Vec<&Row<HandoffRecord>> = rows.iter().collect();
    let verdict = validate_run("R1", &refs, "handoff_log.csv", &registry, RunMode::Full, &[]);
    assert!(!verdict.passed());
    assert_eq!(verdict.violations.len(), 1);
    let v = &verdict.violations[0];
    assert_eq!(v.rule_id, TransitionRule::StrictAdvance.rule_id());
    assert_eq!(v.line, Some(3));
    assert!(v.message.contains("observed red->white"), "{}", v.message);
    assert!(v.message.contains("expected red->green"), "{}", v.message);
    assert!(v.message.contains("green, black"), "{}", v.message);
    assert!(v.message.contains("phase delta 3"), "{}", v.message);
}

#[test]
fn mode_spelling_does_not_change_skip_legality() {
    for raw in ["lite", "LITE", " Lite "] {
        assert_eq!(RunMode::parse(raw), Some(RunMode::Lite));
    }
    let registry = lite_registry();
    let mut machine = OrderMachine::new(&registry, RunMode::parse("LiTe").unwrap());
    assert_eq!(machine.step("blue", "red"), Step::Advanced(2));
    match machine.step("red", "grey") {
        Step::Illegal(illegal) => {
            assert_eq!(illegal.rule, TransitionRule::SkipRequired);
            assert!(illegal.detail.contains("required (white)"));
        }
        other => panic!("expected skip_required, got {other:?}"),
    }
}

#[test]
fn phase_state_is_non_decreasing_and_regressions_fail_in_full_mode() {
    let registry = lite_registry();
    let rows = handoffs(
        "R2",
        &[("blue", "red"), ("red", "green"), ("red", "green"), ("green", "red")],
    );
    let refs: Vec<&Row<HandoffRecord>> = rows.iter().collect();
    let verdict = validate_run("R2", &refs, "handoff_log.csv", &registry, RunMode::Full, &[]);
    assert_eq!(verdict.states, vec![2, 3]);
    assert_eq!(verdict.repeats, 1);
    assert_eq!(verdict.violations.len(), 1);
    assert_eq!(verdict.violations[0].rule_id, "pipeline.regression");
    assert!(verdict.states.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn acknowledged_incident_is_contained_once() {
    let registry = lite_registry();
    let decisions: Rows<DecisionRecord> = parse_csv_rows(
        "decision_log.csv",
        "decision_id,run_id,timestamp_utc,decision_code,status,summary,supersedes_decision_id
D-1,R3,2026-02-10T12:00:00Z,pipeline_order_violation,blocked,red skipped to white,
D-2,R3,2026-02-10T12:30:00Z,pipeline_order_violation,resolved,not a block,
",
    )
    .unwrap();
    let ledger = ToleranceLedger::from_decisions(&decisions, "pipeline_order_violation");
    assert_eq!(ledger.for_run("R3"), ["D-1".to_string()]);

    let rows = handoffs(
        "R3",
        &[("blue", "red"), ("red", "white"), ("white", "qa_fixer")],
    );
    let refs: Vec<&Row<HandoffRecord>> = rows.iter().collect();
    let verdict = validate_run(
        "R3",
        &refs,
        "handoff_log.csv",
        &registry,
        RunMode::Full,
        ledger.for_run("R3"),
    );
    // red->white is tolerated; white->qa_fixer still skips grey in full mode.
    assert!(verdict.observations[0].starts_with("tolerated by decision D-1"));
    assert_eq!(verdict.violations.len(), 1);
    assert_eq!(verdict.violations[0].line, Some(4));
}

#[test]
fn duplicate_phase_numbers_are_structural() {
    let rows: Rows<TeamRecord> = parse_csv_rows(
        "team_registry.csv",
        "team_id,phase_order,optional_in_modes\nblue,1,\nred,2,\ngreen,2,\n",
    )
    .unwrap();
    let err = PhaseRegistry::load(&rows, &BTreeMap::new()).unwrap_err();
    assert!(matches!(err, StagegateError::DuplicatePhase { phase_order: 2, .. }));
    assert_eq!(err.exit_code(), 2);
}
