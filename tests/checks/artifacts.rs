use serde_json::{Value, json};
use stagegate::checks::artifacts::{check_review_artifacts, validate_artifact};
use stagegate::core::config::{ArtifactConfig, GateConfig};
use stagegate::core::report::CheckStatus;
use stagegate::core::store::RecordStore;
use std::fs;
use tempfile::TempDir;

fn approved_artifact() -> Value {
    json!({
        "artifact_id": "ART-0042",
        "run_id": "R1",
        "mode_label": "approved",
        "confidence_label": "medium",
        "claim_class": "descriptive",
        "source_classes": ["observed"],
        "analytics_path": "observed",
        "lifecycle_stage": "scaling",
        "publication_lane": "paid",
        "action_scope": "execute",
        "evidence_caveat_map": [
            {"claim": "CTR was 2.1% across the spring flight", "evidence_refs": ["ads:spring"], "caveat": "Two weeks of data."}
        ],
        "editor_log": ["white: removed superlative"],
        "provenance": {"author_team": "green", "generated_at_utc": "2026-02-10T08:00:00Z", "source_refs": ["ads"]},
        "narrative": "Spring flight CTR held at 2.1 percent.",
        "lexical_hard_fail_count": 0,
        "prohibited_implication_hits": 0,
        "approved_at_utc": "2026-02-12 16:45:00",
        "connector_authenticity": {"identity_verified": true, "freshness_window_ok": true, "replay_check_pass": true}
    })
}

fn rule_ids(doc: &Value) -> Vec<String> {
    validate_artifact("data/review_artifacts/R1/art.json", doc, &ArtifactConfig::default())
        .violations
        .into_iter()
        .map(|v| v.rule_id)
        .collect()
}

#[test]
fn scenario_c_lexical_hard_fail_blocks_an_otherwise_valid_approval() {
    let mut doc = approved_artifact();
    assert!(rule_ids(&doc).is_empty());
    doc["lexical_hard_fail_count"] = json!(1);
    let verdict = validate_artifact("data/review_artifacts/R1/art.json", &doc, &ArtifactConfig::default());
    assert_eq!(verdict.violations.len(), 1);
    let v = &verdict.violations[0];
    assert_eq!(v.rule_id, "artifact.approval.lexical_hard_fail");
    assert_eq!(v.field.as_deref(), Some("lexical_hard_fail_count"));
    assert_eq!(v.value.as_deref(), Some("1"));
    assert_eq!(v.file.as_deref(), Some("data/review_artifacts/R1/art.json"));
}

#[test]
fn scenario_d_high_impact_replay_failure_blocks_approval() {
    let mut doc = approved_artifact();
    doc["is_high_impact"] = json!(true);
    doc["connector_authenticity"]["replay_check_pass"] = json!(false);
    assert_eq!(rule_ids(&doc), vec!["artifact.approval.connector_authenticity"]);

    // Not approved: the approval gate does not apply.
    doc["mode_label"] = json!("draft");
    assert!(rule_ids(&doc).is_empty());
}

#[test]
fn spend_threshold_comes_from_config() {
    let mut doc = approved_artifact();
    doc["spend_usd"] = json!(250.0);
    doc["connector_authenticity"] = Value::Null;
    assert!(rule_ids(&doc).is_empty());

    let strict = ArtifactConfig {
        high_impact_spend_usd: 200.0,
        ..ArtifactConfig::default()
    };
    let verdict = validate_artifact("a.json", &doc, &strict);
    assert!(verdict.high_impact);
    assert_eq!(verdict.violations.len(), 3);
}

#[test]
fn each_artifact_is_reported_separately_in_path_order() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("data/review_artifacts/R1");
    fs::create_dir_all(&dir).unwrap();

    let mut bad = approved_artifact();
    bad["lexical_hard_fail_count"] = json!(2);
    fs::write(dir.join("b_bad.json"), serde_json::to_vec_pretty(&bad).unwrap()).unwrap();
    fs::write(
        dir.join("a_good.json"),
        serde_json::to_vec_pretty(&approved_artifact()).unwrap(),
    )
    .unwrap();
    fs::write(dir.join("c_broken.json"), "{ not json").unwrap();

    let config = GateConfig::default();
    let store = RecordStore::new(tmp.path(), &config.stores);
    let outcome = check_review_artifacts(&store, &config).unwrap();
    assert_eq!(outcome.status, CheckStatus::Fail);
    assert_eq!(outcome.metrics["artifacts"], json!(3));
    assert_eq!(outcome.metrics["artifacts_failed"], json!(2));
    let cited: Vec<(&str, &str)> = outcome
        .violations
        .iter()
        .map(|v| (v.file.as_deref().unwrap(), v.rule_id.as_str()))
        .collect();
    assert_eq!(
        cited,
        vec![
            ("data/review_artifacts/R1/b_bad.json", "artifact.approval.lexical_hard_fail"),
            ("data/review_artifacts/R1/c_broken.json", "artifact.parse"),
        ]
    );
}

#[test]
fn empty_artifact_store_passes() {
    let tmp = TempDir::new().unwrap();
    let config = GateConfig::default();
    let store = RecordStore::new(tmp.path(), &config.stores);
    let outcome = check_review_artifacts(&store, &config).unwrap();
    assert_eq!(outcome.status, CheckStatus::Pass);
    assert_eq!(outcome.metrics["artifacts"], json!(0));
}
