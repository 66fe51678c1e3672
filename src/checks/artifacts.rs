//! Review-artifact claim-safety contract.
//!
//! Each artifact is one JSON document. The base contract (required fields,
//! closed value sets, non-empty lists) applies to every artifact; the
//! conditional rules layer on top. Violations are per file and per rule, never
//! merged across artifacts.

use crate::core::config::{ArtifactConfig, GateConfig};
use crate::core::error::StagegateError;
use crate::core::patterns::{self, CAUSAL_PATTERNS, PROHIBITED_IMPLICATION_PATTERNS};
use crate::core::report::{CheckId, CheckOutcome, Violation};
use crate::core::store::RecordStore;
use crate::core::time::parse_utc;
use rayon::prelude::*;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;

pub const REQUIRED_FIELDS: [&str; 14] = [
    "artifact_id",
    "run_id",
    "mode_label",
    "confidence_label",
    "claim_class",
    "source_classes",
    "analytics_path",
    "lifecycle_stage",
    "publication_lane",
    "action_scope",
    "evidence_caveat_map",
    "editor_log",
    "provenance",
    "narrative",
];

const MODE_LABELS: &[&str] = &["explore", "draft", "approved"];
const CONFIDENCE_LABELS: &[&str] = &["low", "medium", "high"];
const CLAIM_CLASSES: &[&str] = &["descriptive", "diagnostic", "causal", "predictive"];
const SOURCE_CLASSES: &[&str] = &["observed", "scraped_first_party", "simulated", "connector_derived"];
const ANALYTICS_PATHS: &[&str] = &["observed", "modeled", "simulated", "blended"];
const LIFECYCLE_STAGES: &[&str] = &["intake", "pilot", "scaling", "mature"];
const PUBLICATION_LANES: &[&str] = &["internal", "owned", "paid", "earned"];
const ACTION_SCOPES: &[&str] = &["inform", "recommend", "execute"];

const ENUM_FIELDS: [(&str, &[&str]); 7] = [
    ("mode_label", MODE_LABELS),
    ("confidence_label", CONFIDENCE_LABELS),
    ("claim_class", CLAIM_CLASSES),
    ("analytics_path", ANALYTICS_PATHS),
    ("lifecycle_stage", LIFECYCLE_STAGES),
    ("publication_lane", PUBLICATION_LANES),
    ("action_scope", ACTION_SCOPES),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Bool,
    Count,
    Number,
}

/// Optional fields whose presence is only meaningful with the right JSON type.
const TYPED_FIELDS: [(&str, Shape); 14] = [
    ("is_high_impact", Shape::Bool),
    ("spend_usd", Shape::Number),
    ("reach", Shape::Count),
    ("lexical_hard_fail_count", Shape::Count),
    ("prohibited_implication_hits", Shape::Count),
    ("connector_authenticity.identity_verified", Shape::Bool),
    ("connector_authenticity.freshness_window_ok", Shape::Bool),
    ("connector_authenticity.replay_check_pass", Shape::Bool),
    ("rollout_eligibility.claims_social_signal_influence", Shape::Bool),
    ("rollout_eligibility.stability_count", Shape::Count),
    ("rollout_eligibility.incident_count", Shape::Count),
    ("rollout_eligibility.continuity_note_present", Shape::Bool),
    ("fallback_state.active", Shape::Bool),
    ("fallback_state.disclosure_present", Shape::Bool),
];

const TEXT_IDENTITY_FIELDS: [&str; 3] = ["artifact_id", "run_id", "narrative"];

const APPROVED: &str = "approved";
const EXPLORE: &str = "explore";
const HIGHEST_CONFIDENCE: &str = "high";
const EARLIEST_STAGE: &str = "intake";
const TERMINAL_STAGE: &str = "mature";
const OBSERVED: &str = "observed";
const SIMULATED: &str = "simulated";
const MIN_STABILITY_COUNT: i64 = 2;

#[derive(Debug, Clone, Default)]
pub struct ArtifactVerdict {
    pub path: String,
    pub violations: Vec<Violation>,
    pub warnings: Vec<String>,
    pub approved: bool,
    pub high_impact: bool,
}

impl ArtifactVerdict {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Short rendering of a JSON value for the `value` column of a violation.
fn show(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "missing".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn text<'a>(doc: &'a Value, key: &str) -> Option<&'a str> {
    doc.get(key).and_then(Value::as_str).map(str::trim)
}

fn non_empty_text(doc: &Value, key: &str) -> bool {
    text(doc, key).is_some_and(|s| !s.is_empty())
}

fn flag(doc: &Value, key: &str) -> bool {
    doc.get(key).and_then(Value::as_bool).unwrap_or(false)
}

struct Ctx<'a> {
    path: &'a str,
    doc: &'a Value,
    verdict: ArtifactVerdict,
}

impl<'a> Ctx<'a> {
    fn fail(&mut self, rule_id: &str, field: &str, value: impl Into<String>, message: impl Into<String>) {
        self.verdict
            .violations
            .push(Violation::new(rule_id, message).at(self.path, None).field(field, value));
    }

    fn label(&self, key: &str) -> Option<&'a str> {
        text(self.doc, key)
    }

    /// Require a non-negative integer counter equal to zero.
    fn require_zero(&mut self, key: &str, rule_id: &str, what: &str) {
        let raw = self.doc.get(key);
        match raw.and_then(Value::as_i64) {
            Some(0) => {}
            Some(n) => self.fail(rule_id, key, n.to_string(), format!("approved artifact has {n} {what}")),
            None => self.fail(
                rule_id,
                key,
                show(raw),
                format!("approved artifact must report {key} as an integer"),
            ),
        }
    }
}

fn check_base_contract(ctx: &mut Ctx<'_>) {
    let doc = ctx.doc;
    for field in REQUIRED_FIELDS {
        if doc.get(field).is_none_or(Value::is_null) {
            ctx.fail("artifact.required_field", field, "missing", format!("required field {field} is missing"));
        }
    }

    for (field, allowed) in ENUM_FIELDS {
        let Some(raw) = doc.get(field).filter(|v| !v.is_null()) else {
            continue;
        };
        let ok = raw.as_str().is_some_and(|s| allowed.contains(&s.trim()));
        if !ok {
            ctx.fail(
                "artifact.enum_value",
                field,
                show(Some(raw)),
                format!("{field} must be one of {}", allowed.join("|")),
            );
        }
    }

    match doc.get("source_classes") {
        Some(Value::Array(items)) if items.is_empty() => {
            ctx.fail("artifact.empty_list", "source_classes", "[]", "source_classes cannot be empty")
        }
        Some(Value::Array(items)) => {
            for item in items {
                if !item.as_str().is_some_and(|s| SOURCE_CLASSES.contains(&s.trim())) {
                    ctx.fail(
                        "artifact.enum_value",
                        "source_classes",
                        show(Some(item)),
                        format!("source class must be one of {}", SOURCE_CLASSES.join("|")),
                    );
                }
            }
        }
        Some(Value::Null) | None => {}
        Some(other) => ctx.fail(
            "artifact.enum_value",
            "source_classes",
            show(Some(other)),
            "source_classes must be a list",
        ),
    }

    match doc.get("evidence_caveat_map") {
        Some(Value::Array(entries)) if entries.is_empty() => ctx.fail(
            "artifact.empty_list",
            "evidence_caveat_map",
            "[]",
            "evidence_caveat_map cannot be empty",
        ),
        Some(Value::Array(entries)) => {
            for (i, entry) in entries.iter().enumerate() {
                let claim_ok = non_empty_text(entry, "claim");
                let caveat_ok = non_empty_text(entry, "caveat");
                let refs_ok = entry
                    .get("evidence_refs")
                    .and_then(Value::as_array)
                    .is_some_and(|r| !r.is_empty());
                if !(claim_ok && caveat_ok && refs_ok) {
                    ctx.fail(
                        "artifact.evidence_entry",
                        &format!("evidence_caveat_map[{i}]"),
                        show(Some(entry)),
                        "each evidence entry needs a claim, evidence_refs and a caveat",
                    );
                }
            }
        }
        Some(Value::Null) | None => {}
        Some(other) => ctx.fail(
            "artifact.evidence_entry",
            "evidence_caveat_map",
            show(Some(other)),
            "evidence_caveat_map must be a list",
        ),
    }

    if let Some(log) = doc.get("editor_log").filter(|v| !v.is_null()) {
        if !log.as_array().is_some_and(|l| !l.is_empty()) {
            ctx.fail("artifact.empty_list", "editor_log", show(Some(log)), "editor_log cannot be empty");
        }
    }

    if let Some(prov) = doc.get("provenance").filter(|v| !v.is_null()) {
        if !non_empty_text(prov, "author_team") {
            ctx.fail(
                "artifact.required_field",
                "provenance.author_team",
                show(prov.get("author_team")),
                "provenance.author_team cannot be empty",
            );
        }
    }

    for field in TEXT_IDENTITY_FIELDS {
        if let Some(raw) = doc.get(field).filter(|v| !v.is_null()) {
            if !raw.as_str().is_some_and(|s| !s.trim().is_empty()) {
                ctx.fail(
                    "artifact.required_field",
                    field,
                    show(Some(raw)),
                    format!("{field} must be non-empty text"),
                );
            }
        }
    }

    for (field, shape) in TYPED_FIELDS {
        let pointer = format!("/{}", field.replace('.', "/"));
        let Some(raw) = doc.pointer(&pointer).filter(|v| !v.is_null()) else {
            continue;
        };
        let (ok, expected) = match shape {
            Shape::Bool => (raw.is_boolean(), "true or false"),
            Shape::Count => (raw.is_u64(), "a non-negative integer"),
            Shape::Number => (raw.is_number(), "a number"),
        };
        if !ok {
            ctx.fail("artifact.type", field, show(Some(raw)), format!("{field} must be {expected}"));
        }
    }
}

fn source_classes(doc: &Value) -> BTreeSet<&str> {
    doc.get("source_classes")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::trim).collect())
        .unwrap_or_default()
}

fn check_mixed_source(ctx: &mut Ctx<'_>, sources: &BTreeSet<&str>) {
    if sources.len() <= 1 {
        return;
    }
    let mode = ctx.label("mode_label").unwrap_or_default();
    let joined = sources.iter().copied().collect::<Vec<_>>().join(",");

    if !non_empty_text(ctx.doc, "uncertainty_caveat") {
        let message = format!("mixed sources ({joined}) require an uncertainty_caveat sentence");
        if mode == EXPLORE {
            ctx.verdict.warnings.push(format!("{}: {message}", ctx.path));
        } else {
            ctx.fail(
                "artifact.mixed_source.caveat",
                "uncertainty_caveat",
                show(ctx.doc.get("uncertainty_caveat")),
                message,
            );
        }
    }
    if ctx.label("confidence_label") == Some(HIGHEST_CONFIDENCE) {
        ctx.fail(
            "artifact.mixed_source.confidence",
            "confidence_label",
            HIGHEST_CONFIDENCE,
            format!("mixed sources ({joined}) cannot carry the highest confidence label"),
        );
    }
    if mode == APPROVED && sources.contains(SIMULATED) {
        ctx.fail(
            "artifact.mixed_source.contamination",
            "source_classes",
            joined,
            "simulated data contributes to an approved mixed-source artifact",
        );
    }
}

fn check_lifecycle(ctx: &mut Ctx<'_>, sources: &BTreeSet<&str>) {
    if ctx.label("mode_label") != Some(APPROVED) {
        return;
    }
    match ctx.label("lifecycle_stage") {
        Some(EARLIEST_STAGE) => ctx.fail(
            "artifact.lifecycle.earliest",
            "lifecycle_stage",
            EARLIEST_STAGE,
            "intake-stage artifacts cannot be approved",
        ),
        Some(TERMINAL_STAGE) => {
            let non_observed_source = sources.iter().any(|s| *s != OBSERVED);
            let analytics = ctx.label("analytics_path").unwrap_or(OBSERVED);
            if non_observed_source || analytics != OBSERVED {
                ctx.fail(
                    "artifact.lifecycle.terminal",
                    "analytics_path",
                    analytics,
                    "mature-stage artifacts relying on non-observed evidence cannot be approved",
                );
            }
        }
        _ => {}
    }
}

fn is_high_impact(doc: &Value, config: &ArtifactConfig) -> bool {
    flag(doc, "is_high_impact")
        || doc
            .get("spend_usd")
            .and_then(Value::as_f64)
            .is_some_and(|s| s >= config.high_impact_spend_usd)
        || doc
            .get("reach")
            .and_then(Value::as_u64)
            .is_some_and(|r| r >= config.high_impact_reach)
}

fn check_approval_gate(ctx: &mut Ctx<'_>, config: &ArtifactConfig) {
    if ctx.label("mode_label") != Some(APPROVED) {
        return;
    }
    ctx.verdict.approved = true;
    ctx.require_zero(
        "lexical_hard_fail_count",
        "artifact.approval.lexical_hard_fail",
        "lexical hard fail(s)",
    );
    ctx.require_zero(
        "prohibited_implication_hits",
        "artifact.approval.prohibited_implication",
        "prohibited implication hit(s)",
    );

    let reported_zero = ctx.doc.get("prohibited_implication_hits").and_then(Value::as_i64) == Some(0);
    let narrative = text(ctx.doc, "narrative").unwrap_or_default();
    let scanned = patterns::matching_rules(&PROHIBITED_IMPLICATION_PATTERNS, narrative);
    if reported_zero && !scanned.is_empty() {
        ctx.fail(
            "artifact.approval.prohibited_scan_mismatch",
            "prohibited_implication_hits",
            scanned.join(","),
            format!(
                "artifact reports zero prohibited implications but the narrative matches {}",
                scanned.join(", ")
            ),
        );
    }

    let approved_at = ctx.doc.get("approved_at_utc");
    if !approved_at
        .and_then(Value::as_str)
        .is_some_and(|s| parse_utc(s).is_some())
    {
        ctx.fail(
            "artifact.approval.timestamp",
            "approved_at_utc",
            show(approved_at),
            "approved_at_utc must be a valid UTC timestamp",
        );
    }

    if is_high_impact(ctx.doc, config) {
        ctx.verdict.high_impact = true;
        let auth = ctx.doc.get("connector_authenticity").cloned().unwrap_or(Value::Null);
        for key in ["identity_verified", "freshness_window_ok", "replay_check_pass"] {
            if !flag(&auth, key) {
                ctx.fail(
                    "artifact.approval.connector_authenticity",
                    &format!("connector_authenticity.{key}"),
                    show(auth.get(key)),
                    format!("high-impact approved artifact requires connector_authenticity.{key} = true"),
                );
            }
        }
    }
}

fn check_rollout(ctx: &mut Ctx<'_>) {
    let Some(rollout) = ctx.doc.get("rollout_eligibility") else {
        return;
    };
    if !flag(rollout, "claims_social_signal_influence") {
        return;
    }
    let stability = rollout.get("stability_count");
    if !stability
        .and_then(Value::as_i64)
        .is_some_and(|n| n >= MIN_STABILITY_COUNT)
    {
        ctx.fail(
            "artifact.rollout.stability",
            "rollout_eligibility.stability_count",
            show(stability),
            format!("social-signal influence needs stability_count >= {MIN_STABILITY_COUNT}"),
        );
    }
    let incidents = rollout.get("incident_count");
    if incidents.and_then(Value::as_i64) != Some(0) {
        ctx.fail(
            "artifact.rollout.incidents",
            "rollout_eligibility.incident_count",
            show(incidents),
            "social-signal influence needs incident_count = 0",
        );
    }
    if !flag(rollout, "continuity_note_present") {
        ctx.fail(
            "artifact.rollout.continuity",
            "rollout_eligibility.continuity_note_present",
            show(rollout.get("continuity_note_present")),
            "social-signal influence needs a continuity note",
        );
    }
}

fn check_causal_language(ctx: &mut Ctx<'_>) {
    let mut texts: Vec<&str> = Vec::new();
    if let Some(narrative) = text(ctx.doc, "narrative") {
        texts.push(narrative);
    }
    if let Some(entries) = ctx.doc.get("evidence_caveat_map").and_then(Value::as_array) {
        texts.extend(entries.iter().filter_map(|e| text(e, "claim")));
    }

    let mut triggered: BTreeSet<&'static str> = BTreeSet::new();
    for t in &texts {
        triggered.extend(patterns::matching_rules(&CAUSAL_PATTERNS, t));
    }
    if ctx.label("claim_class") == Some("causal") && triggered.is_empty() {
        triggered.insert("artifact.causal.claim_class");
    }
    if triggered.is_empty() {
        return;
    }

    let guard = ctx.doc.get("causal_guard").cloned().unwrap_or(Value::Null);
    let missing: Vec<&str> = ["method", "uncertainty", "counterfactual"]
        .into_iter()
        .filter(|k| !non_empty_text(&guard, k))
        .collect();
    if missing.is_empty() {
        return;
    }
    let fields = missing
        .iter()
        .map(|k| format!("causal_guard.{k}"))
        .collect::<Vec<_>>()
        .join(",");
    for rule_id in triggered {
        ctx.fail(
            rule_id,
            &fields,
            "missing",
            format!("causal language requires populated {}", missing.join("/")),
        );
    }
}

fn check_fallback_state(ctx: &mut Ctx<'_>) {
    let Some(state) = ctx.doc.get("fallback_state") else {
        return;
    };
    if !flag(state, "active") {
        return;
    }
    if !non_empty_text(state, "template_id") {
        ctx.fail(
            "artifact.fallback_state",
            "fallback_state.template_id",
            show(state.get("template_id")),
            "active fallback state needs a template_id",
        );
    }
    if !flag(state, "disclosure_present") {
        ctx.fail(
            "artifact.fallback_state",
            "fallback_state.disclosure_present",
            show(state.get("disclosure_present")),
            "active fallback state needs a disclosure",
        );
    }
}

/// Validate one parsed artifact document.
pub fn validate_artifact(path: &str, doc: &Value, config: &ArtifactConfig) -> ArtifactVerdict {
    let mut ctx = Ctx {
        path,
        doc,
        verdict: ArtifactVerdict {
            path: path.to_string(),
            ..Default::default()
        },
    };
    if !doc.is_object() {
        ctx.fail("artifact.parse", "$", show(Some(doc)), "artifact must be a JSON object");
        return ctx.verdict;
    }
    let sources = source_classes(doc);
    check_base_contract(&mut ctx);
    check_mixed_source(&mut ctx, &sources);
    check_lifecycle(&mut ctx, &sources);
    check_approval_gate(&mut ctx, config);
    check_rollout(&mut ctx);
    check_causal_language(&mut ctx);
    check_fallback_state(&mut ctx);
    ctx.verdict
}

fn validate_file(store: &RecordStore, rel: &str, config: &ArtifactConfig) -> ArtifactVerdict {
    let parsed = fs::read_to_string(store.root.join(rel))
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str::<Value>(&text).map_err(|e| e.to_string()));
    match parsed {
        Ok(doc) => validate_artifact(rel, &doc, config),
        Err(e) => ArtifactVerdict {
            path: rel.to_string(),
            violations: vec![
                Violation::new("artifact.parse", format!("unreadable artifact: {e}")).at(rel, None),
            ],
            ..Default::default()
        },
    }
}

pub fn check_review_artifacts(store: &RecordStore, config: &GateConfig) -> Result<CheckOutcome, StagegateError> {
    let paths = store.artifact_paths()?;
    let verdicts: Vec<ArtifactVerdict> = paths
        .par_iter()
        .map(|rel| validate_file(store, rel, &config.artifacts))
        .collect();

    let mut outcome = CheckOutcome::new(CheckId::ReviewArtifacts);
    let mut failed = 0usize;
    let mut approved = 0usize;
    let mut high_impact = 0usize;
    for verdict in verdicts {
        if !verdict.passed() {
            failed += 1;
        }
        approved += usize::from(verdict.approved);
        high_impact += usize::from(verdict.high_impact);
        outcome.warnings.extend(verdict.warnings);
        outcome.violations.extend(verdict.violations);
    }
    tracing::debug!(artifacts = paths.len(), failed, "review artifacts validated");

    outcome.metric("artifacts", paths.len());
    outcome.metric("artifacts_failed", failed);
    outcome.metric("approved", approved);
    outcome.metric("high_impact_approved", high_impact);
    Ok(outcome.finish(
        &format!("{} artifact(s) satisfy the claim-safety contract", paths.len()),
        config.append_only.preview_limit,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn approved_doc() -> Value {
        json!({
            "artifact_id": "ART-1",
            "run_id": "R1",
            "mode_label": "approved",
            "confidence_label": "medium",
            "claim_class": "descriptive",
            "source_classes": ["observed"],
            "analytics_path": "observed",
            "lifecycle_stage": "scaling",
            "publication_lane": "owned",
            "action_scope": "recommend",
            "evidence_caveat_map": [
                {"claim": "Open rate was 41% in week 6", "evidence_refs": ["ga4:w6"], "caveat": "One send only."}
            ],
            "editor_log": ["white: tightened subject line"],
            "provenance": {"author_team": "red", "generated_at_utc": "2026-02-10T08:00:00Z", "source_refs": ["ga4"]},
            "narrative": "Week 6 email open rate was 41 percent.",
            "lexical_hard_fail_count": 0,
            "prohibited_implication_hits": 0,
            "approved_at_utc": "2026-02-11T09:30:00Z"
        })
    }

    fn rules(verdict: &ArtifactVerdict) -> Vec<&str> {
        verdict.violations.iter().map(|v| v.rule_id.as_str()).collect()
    }

    #[test]
    fn clean_approved_artifact_passes() {
        let verdict = validate_artifact("a.json", &approved_doc(), &ArtifactConfig::default());
        assert!(verdict.passed(), "{:?}", verdict.violations);
        assert!(verdict.approved);
        assert!(!verdict.high_impact);
    }

    #[test]
    fn missing_and_out_of_set_fields() {
        let mut doc = approved_doc();
        doc.as_object_mut().unwrap().remove("editor_log");
        doc["publication_lane"] = json!("billboard");
        doc["source_classes"] = json!([]);
        let verdict = validate_artifact("a.json", &doc, &ArtifactConfig::default());
        let rules = rules(&verdict);
        assert!(rules.contains(&"artifact.required_field"));
        assert!(rules.contains(&"artifact.enum_value"));
        assert!(rules.contains(&"artifact.empty_list"));
        let lane = verdict
            .violations
            .iter()
            .find(|v| v.field.as_deref() == Some("publication_lane"))
            .unwrap();
        assert_eq!(lane.value.as_deref(), Some("billboard"));
        assert_eq!(lane.file.as_deref(), Some("a.json"));
    }

    #[test]
    fn mixed_source_caveat_warns_in_explore_and_fails_otherwise() {
        let mut doc = approved_doc();
        doc["mode_label"] = json!("explore");
        doc["source_classes"] = json!(["observed", "connector_derived"]);
        let verdict = validate_artifact("a.json", &doc, &ArtifactConfig::default());
        assert!(verdict.passed());
        assert_eq!(verdict.warnings.len(), 1);

        doc["mode_label"] = json!("draft");
        doc["confidence_label"] = json!("high");
        let verdict = validate_artifact("a.json", &doc, &ArtifactConfig::default());
        assert_eq!(
            rules(&verdict),
            vec!["artifact.mixed_source.caveat", "artifact.mixed_source.confidence"]
        );
    }

    #[test]
    fn simulated_contamination_blocks_approval() {
        let mut doc = approved_doc();
        doc["source_classes"] = json!(["observed", "simulated"]);
        doc["uncertainty_caveat"] = json!("Part of this estimate is simulated.");
        let verdict = validate_artifact("a.json", &doc, &ArtifactConfig::default());
        assert_eq!(rules(&verdict), vec!["artifact.mixed_source.contamination"]);
    }

    #[test]
    fn lifecycle_bounds_on_approval() {
        let mut doc = approved_doc();
        doc["lifecycle_stage"] = json!("intake");
        assert_eq!(
            rules(&validate_artifact("a.json", &doc, &ArtifactConfig::default())),
            vec!["artifact.lifecycle.earliest"]
        );
        doc["lifecycle_stage"] = json!("mature");
        doc["analytics_path"] = json!("modeled");
        assert_eq!(
            rules(&validate_artifact("a.json", &doc, &ArtifactConfig::default())),
            vec!["artifact.lifecycle.terminal"]
        );
        doc["mode_label"] = json!("draft");
        assert!(validate_artifact("a.json", &doc, &ArtifactConfig::default()).passed());
    }

    #[test]
    fn high_impact_by_threshold_needs_authenticity() {
        let mut doc = approved_doc();
        doc["reach"] = json!(75_000);
        doc["connector_authenticity"] = json!({"identity_verified": true, "freshness_window_ok": false});
        let verdict = validate_artifact("a.json", &doc, &ArtifactConfig::default());
        assert!(verdict.high_impact);
        let fields: Vec<&str> = verdict.violations.iter().filter_map(|v| v.field.as_deref()).collect();
        assert_eq!(
            fields,
            vec![
                "connector_authenticity.freshness_window_ok",
                "connector_authenticity.replay_check_pass"
            ]
        );
    }

    #[test]
    fn prohibited_scan_catches_underreported_hits() {
        let mut doc = approved_doc();
        doc["narrative"] = json!("Guaranteed results for every pet.");
        let verdict = validate_artifact("a.json", &doc, &ArtifactConfig::default());
        assert_eq!(rules(&verdict), vec!["artifact.approval.prohibited_scan_mismatch"]);
        assert_eq!(verdict.violations[0].value.as_deref(), Some("artifact.prohibited.guarantee"));
    }

    #[test]
    fn bad_approval_timestamp() {
        let mut doc = approved_doc();
        doc["approved_at_utc"] = json!("yesterday");
        assert_eq!(
            rules(&validate_artifact("a.json", &doc, &ArtifactConfig::default())),
            vec!["artifact.approval.timestamp"]
        );
    }

    #[test]
    fn rollout_claim_needs_stability_and_continuity() {
        let mut doc = approved_doc();
        doc["rollout_eligibility"] = json!({
            "claims_social_signal_influence": true,
            "stability_count": 1,
            "incident_count": 0,
            "continuity_note_present": false
        });
        assert_eq!(
            rules(&validate_artifact("a.json", &doc, &ArtifactConfig::default())),
            vec!["artifact.rollout.stability", "artifact.rollout.continuity"]
        );
    }

    #[test]
    fn causal_language_requires_guard() {
        let mut doc = approved_doc();
        doc["narrative"] = json!("The new subject line drove a lift in opens.");
        doc["causal_guard"] = json!({"method": "holdout", "uncertainty": ""});
        let verdict = validate_artifact("a.json", &doc, &ArtifactConfig::default());
        assert_eq!(rules(&verdict), vec!["artifact.causal.drives"]);
        assert_eq!(
            verdict.violations[0].field.as_deref(),
            Some("causal_guard.uncertainty,causal_guard.counterfactual")
        );

        doc["causal_guard"] = json!({"method": "holdout", "uncertainty": "±4pp", "counterfactual": "no-send cell"});
        assert!(validate_artifact("a.json", &doc, &ArtifactConfig::default()).passed());
    }

    #[test]
    fn active_fallback_needs_template_and_disclosure() {
        let mut doc = approved_doc();
        doc["fallback_state"] = json!({"active": true, "template_id": "", "disclosure_present": true});
        let verdict = validate_artifact("a.json", &doc, &ArtifactConfig::default());
        assert_eq!(rules(&verdict), vec!["artifact.fallback_state"]);
        assert_eq!(verdict.violations[0].field.as_deref(), Some("fallback_state.template_id"));
    }

    #[test]
    fn string_flags_and_counters_are_type_violations() {
        let mut doc = approved_doc();
        doc["is_high_impact"] = json!("true");
        doc["reach"] = json!(75_000.5);
        doc["fallback_state"] = json!({"active": "true", "template_id": ""});
        let verdict = validate_artifact("a.json", &doc, &ArtifactConfig::default());
        let typed: Vec<&str> = verdict
            .violations
            .iter()
            .filter(|v| v.rule_id == "artifact.type")
            .filter_map(|v| v.field.as_deref())
            .collect();
        assert_eq!(typed, vec!["is_high_impact", "reach", "fallback_state.active"]);
        assert!(!verdict.passed());

        doc["is_high_impact"] = json!(false);
        doc["reach"] = json!(10);
        doc["fallback_state"] = json!({"active": false});
        assert!(validate_artifact("a.json", &doc, &ArtifactConfig::default()).passed());
    }

    #[test]
    fn blank_identity_fields_are_rejected() {
        let mut doc = approved_doc();
        doc["artifact_id"] = json!("");
        doc["run_id"] = json!("  ");
        let verdict = validate_artifact("a.json", &doc, &ArtifactConfig::default());
        assert_eq!(rules(&verdict), vec!["artifact.required_field", "artifact.required_field"]);
        let fields: Vec<&str> = verdict.violations.iter().filter_map(|v| v.field.as_deref()).collect();
        assert_eq!(fields, vec!["artifact_id", "run_id"]);
    }

    #[test]
    fn causal_claim_in_evidence_map_requires_guard() {
        let mut doc = approved_doc();
        doc["evidence_caveat_map"] = json!([
            {"claim": "The resend drove a lift in opens", "evidence_refs": ["ga4:w7"], "caveat": "Small cell."}
        ]);
        let verdict = validate_artifact("a.json", &doc, &ArtifactConfig::default());
        assert!(rules(&verdict).contains(&"artifact.causal.drives"));
        assert_eq!(
            verdict.violations[0].field.as_deref(),
            Some("causal_guard.method,causal_guard.uncertainty,causal_guard.counterfactual")
        );
    }

    #[test]
    fn causal_claim_class_requires_guard_without_causal_wording() {
        let mut doc = approved_doc();
        doc["claim_class"] = json!("causal");
        let verdict = validate_artifact("a.json", &doc, &ArtifactConfig::default());
        assert_eq!(rules(&verdict), vec!["artifact.causal.claim_class"]);

        doc["causal_guard"] = json!({"method": "holdout", "uncertainty": "±4pp", "counterfactual": "no-send cell"});
        assert!(validate_artifact("a.json", &doc, &ArtifactConfig::default()).passed());
    }

    #[test]
    fn non_object_document_is_a_parse_violation() {
        let verdict = validate_artifact("a.json", &json!([1, 2]), &ArtifactConfig::default());
        assert_eq!(rules(&verdict), vec!["artifact.parse"]);
    }
}
