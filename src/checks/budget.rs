//! Budget envelope and release-gate validation for one run.
//!
//! The envelope is checked first. A run without a complete, positive
//! envelope is never gate-evaluated: the gate record would be judging an
//! unbudgeted run.

use crate::core::config::GateConfig;
use crate::core::error::StagegateError;
use crate::core::records::{BudgetEnvelopeRecord, ReleaseGateRecord};
use crate::core::report::{CheckId, CheckOutcome, Violation};
use crate::core::store::{RecordStore, Row, Rows};
use std::collections::BTreeMap;

pub const RULE_ENVELOPE_MISSING: &str = "budget.envelope_missing";
pub const RULE_REQUIRED_FIELD: &str = "budget.required_field";
pub const RULE_CAP_INVALID: &str = "budget.cap_invalid";
pub const RULE_CAP_NOT_POSITIVE: &str = "budget.cap_not_positive";
pub const RULE_GATE_RECORD_MISSING: &str = "release.record_missing";
pub const RULE_GATE_METADATA: &str = "release.metadata_missing";
pub const RULE_GATE_VALUE_MISSING: &str = "release.gate_value_missing";
pub const RULE_GATE_VALUE_INVALID: &str = "release.gate_value_invalid";
pub const RULE_GATE_RED: &str = "release.gate_red";

const GATE_VALUES: [&str; 3] = ["green", "yellow", "red"];

fn gate_is_publish_blocking(value: &str) -> bool {
    value == "red"
}

/// Violations of one envelope row. Caps must parse as numbers > 0; text
/// fields must be non-empty.
pub fn validate_envelope(row: &Row<BudgetEnvelopeRecord>, path: &str) -> Vec<Violation> {
    let rec = &row.record;
    let run = rec.run_id.trim();
    let mut violations = Vec::new();

    for (field, value) in [
        ("run_id", rec.run_id.as_str()),
        ("workflow_id", rec.workflow_id.as_str()),
        ("subsystem", rec.subsystem.as_str()),
        ("stop_condition", rec.stop_condition.as_str()),
        ("fallback_mode", rec.fallback_mode.as_str()),
        ("owner_role", rec.owner_role.as_str()),
    ] {
        if value.trim().is_empty() {
            violations.push(
                Violation::new(
                    RULE_REQUIRED_FIELD,
                    format!("run {run}: budget.{field} cannot be empty"),
                )
                .at(path, Some(row.line))
                .field(field, ""),
            );
        }
    }

    for (field, value) in [
        ("per_run_cap_usd", rec.per_run_cap_usd.as_str()),
        ("daily_cap_usd", rec.daily_cap_usd.as_str()),
        ("monthly_cap_usd", rec.monthly_cap_usd.as_str()),
    ] {
        let raw = value.trim();
        if raw.is_empty() {
            violations.push(
                Violation::new(
                    RULE_REQUIRED_FIELD,
                    format!("run {run}: budget.{field} cannot be empty"),
                )
                .at(path, Some(row.line))
                .field(field, ""),
            );
            continue;
        }
        match raw.parse::<f64>() {
            Ok(cap) if cap.is_finite() && cap > 0.0 => {}
            Ok(_) => violations.push(
                Violation::new(
                    RULE_CAP_NOT_POSITIVE,
                    format!("run {run}: budget.{field} must be > 0"),
                )
                .at(path, Some(row.line))
                .field(field, raw),
            ),
            Err(_) => violations.push(
                Violation::new(
                    RULE_CAP_INVALID,
                    format!("run {run}: budget.{field} is not a number"),
                )
                .at(path, Some(row.line))
                .field(field, raw),
            ),
        }
    }
    violations
}

/// Latest envelope row per `(workflow_id, subsystem)` for `run_id`.
pub fn current_envelopes<'a>(
    envelopes: &'a Rows<BudgetEnvelopeRecord>,
    run_id: &str,
) -> Vec<&'a Row<BudgetEnvelopeRecord>> {
    let mut latest: BTreeMap<(String, String), &Row<BudgetEnvelopeRecord>> = BTreeMap::new();
    for row in envelopes.iter().filter(|r| r.record.run_id.trim() == run_id) {
        let key = (
            row.record.workflow_id.trim().to_string(),
            row.record.subsystem.trim().to_string(),
        );
        latest.insert(key, row);
    }
    let mut rows: Vec<_> = latest.into_values().collect();
    rows.sort_by_key(|r| r.index);
    rows
}

/// Latest release-gate row for `run_id` (append order is authoritative).
pub fn current_release_gate<'a>(
    gates: &'a Rows<ReleaseGateRecord>,
    run_id: &str,
) -> Option<&'a Row<ReleaseGateRecord>> {
    gates
        .rows
        .iter()
        .rev()
        .find(|r| r.record.run_id.trim() == run_id)
}

/// Violations of the run's release gate. A missing record or value ("never
/// gated") and a red gate ("explicitly blocked") carry different rule ids.
pub fn validate_release_gate(
    row: Option<&Row<ReleaseGateRecord>>,
    run_id: &str,
    path: &str,
) -> Vec<Violation> {
    let Some(row) = row else {
        return vec![
            Violation::new(
                RULE_GATE_RECORD_MISSING,
                format!("run {run_id} was never gated: no release-gate record"),
            )
            .at(path, None)
            .field("run_id", run_id),
        ];
    };
    let rec = &row.record;
    let mut violations = Vec::new();

    for (field, value) in [
        ("release_id", rec.release_id.as_str()),
        ("scope", rec.scope.as_str()),
        ("checked_by", rec.checked_by.as_str()),
        ("checked_at_utc", rec.checked_at_utc.as_str()),
    ] {
        if value.trim().is_empty() {
            violations.push(
                Violation::new(RULE_GATE_METADATA, format!("run {run_id}: {field} cannot be empty"))
                    .at(path, Some(row.line))
                    .field(field, ""),
            );
        }
    }

    for (name, raw) in rec.gates() {
        let value = raw.trim().to_ascii_lowercase();
        if value.is_empty() {
            violations.push(
                Violation::new(
                    RULE_GATE_VALUE_MISSING,
                    format!("run {run_id}: {name} was never set"),
                )
                .at(path, Some(row.line))
                .field(name, ""),
            );
        } else if !GATE_VALUES.contains(&value.as_str()) {
            violations.push(
                Violation::new(
                    RULE_GATE_VALUE_INVALID,
                    format!("run {run_id}: {name} must be one of green|yellow|red"),
                )
                .at(path, Some(row.line))
                .field(name, raw.trim()),
            );
        } else if gate_is_publish_blocking(&value) {
            violations.push(
                Violation::new(
                    RULE_GATE_RED,
                    format!("run {run_id}: {name} is red; publish/execution blocked"),
                )
                .at(path, Some(row.line))
                .field(name, raw.trim()),
            );
        }
    }
    violations
}

/// Envelope then gate, for `target_run` or the most recently registered run.
pub fn check_budget_release(
    store: &RecordStore,
    target_run: Option<&str>,
    config: &GateConfig,
) -> Result<CheckOutcome, StagegateError> {
    let mut outcome = CheckOutcome::new(CheckId::BudgetRelease);
    let run_id = match target_run {
        Some(run) => run.trim().to_string(),
        None => {
            let runs = store.runs()?;
            match runs.last() {
                Some(row) => row.record.run_id.trim().to_string(),
                None => {
                    outcome
                        .observations
                        .push("run registry is empty; nothing to gate".to_string());
                    return Ok(outcome.finish("no registered run", config.append_only.preview_limit));
                }
            }
        }
    };

    let envelopes = store.budget_envelopes()?;
    let current = current_envelopes(&envelopes, &run_id);
    outcome.metric("run_id", run_id.clone());
    outcome.metric("envelopes", current.len());

    if current.is_empty() {
        outcome.violations.push(
            Violation::new(
                RULE_ENVELOPE_MISSING,
                format!("run {run_id} has no budget envelope"),
            )
            .at(&envelopes.path, None)
            .field("run_id", run_id.clone()),
        );
    }
    for row in &current {
        outcome
            .violations
            .extend(validate_envelope(row, &envelopes.path));
    }

    if !outcome.violations.is_empty() {
        tracing::debug!(run = %run_id, "envelope incomplete; release gate not evaluated");
        outcome.observations.push(format!(
            "run {run_id}: release gate not evaluated until the budget envelope is complete"
        ));
        return Ok(outcome.finish("", config.append_only.preview_limit));
    }

    let gates = store.release_gates()?;
    let gate = current_release_gate(&gates, &run_id);
    if let Some(row) = gate {
        outcome.metric("release_id", row.record.release_id.trim().to_string());
    }
    outcome
        .violations
        .extend(validate_release_gate(gate, &run_id, &gates.path));
    tracing::debug!(run = %run_id, violations = outcome.violations.len(), "release gate evaluated");

    Ok(outcome.finish(
        &format!("run {run_id}: budget envelope complete and no release gate blocking"),
        config.append_only.preview_limit,
    ))
}
