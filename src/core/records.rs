//! Typed rows of the append-only team-ops stores.
//!
//! Columns are read as strings and interpreted by the checks, so a bad value
//! is reported against its field instead of failing the whole file.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunRecord {
    pub run_id: String,
    pub created_utc: String,
    pub status: String,
    pub current_phase: String,
    pub run_mode: String,
    pub supersedes_run_id: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct HandoffRecord {
    pub entry_id: String,
    pub run_id: String,
    pub timestamp_utc: String,
    pub from_team: String,
    pub to_team: String,
    /// JSON array string.
    pub blocking_flags: String,
    pub supersedes_entry_id: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChangeRequestRecord {
    pub request_id: String,
    pub run_id: String,
    pub source_team: String,
    pub status: String,
    pub created_utc: String,
    pub statement: String,
    pub supersedes_request_id: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct TeamRecord {
    pub team_id: String,
    pub phase_order: String,
    /// JSON array string of run modes in which this phase may be skipped.
    pub optional_in_modes: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct DecisionRecord {
    pub decision_id: String,
    pub run_id: String,
    pub timestamp_utc: String,
    pub decision_code: String,
    pub status: String,
    pub summary: String,
    pub supersedes_decision_id: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct BudgetEnvelopeRecord {
    pub run_id: String,
    pub workflow_id: String,
    pub subsystem: String,
    pub per_run_cap_usd: String,
    pub daily_cap_usd: String,
    pub monthly_cap_usd: String,
    pub stop_condition: String,
    pub fallback_mode: String,
    pub owner_role: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReleaseGateRecord {
    pub release_id: String,
    pub run_id: String,
    pub scope: String,
    pub security_gate: String,
    pub budget_gate: String,
    pub evidence_gate: String,
    pub role_gate: String,
    pub change_gate: String,
    pub checked_by: String,
    pub checked_at_utc: String,
}

impl ReleaseGateRecord {
    /// The five named gates in a fixed order.
    pub fn gates(&self) -> [(&'static str, &str); 5] {
        [
            ("security_gate", self.security_gate.as_str()),
            ("budget_gate", self.budget_gate.as_str()),
            ("evidence_gate", self.evidence_gate.as_str()),
            ("role_gate", self.role_gate.as_str()),
            ("change_gate", self.change_gate.as_str()),
        ]
    }
}

fn norm(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Active,
    Blocked,
    Terminal,
    Missing,
}

impl RunStatus {
    pub fn classify(raw: &str) -> Self {
        let s = norm(raw);
        if s.is_empty() {
            return RunStatus::Missing;
        }
        if is_blocked_status(&s) {
            return RunStatus::Blocked;
        }
        match s.as_str() {
            "initialized" | "active" | "in_progress" | "awaiting_input" | "ready" => {
                RunStatus::Active
            }
            _ => RunStatus::Terminal,
        }
    }
}

/// `blocked` and its qualified forms (`blocked_missing_stages`, ...).
pub fn is_blocked_status(raw: &str) -> bool {
    let s = norm(raw);
    s == "blocked" || s.starts_with("blocked_")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Open,
    Closed,
    Unrecognized,
}

impl RequestStatus {
    pub fn classify(raw: &str) -> Self {
        match norm(raw).as_str() {
            "open" | "in_progress" | "blocked" | "pending" | "ready" | "todo" => {
                RequestStatus::Open
            }
            "closed" | "done" | "resolved" | "superseded" | "cancelled" | "canceled"
            | "rejected" | "implemented" | "completed" | "archived" | "wont_fix" => {
                RequestStatus::Closed
            }
            _ => RequestStatus::Unrecognized,
        }
    }
}

/// Parse a JSON-array cell. Empty means an empty list.
pub fn parse_json_list(raw: &str) -> Result<Vec<String>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    if !raw.starts_with('[') {
        let preview: String = raw.chars().take(80).collect();
        return Err(format!("expected JSON array string, got: {preview}"));
    }
    let parsed: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| format!("invalid JSON array syntax: {e}"))?;
    let items = parsed
        .as_array()
        .ok_or_else(|| "value is valid JSON but not an array".to_string())?;
    Ok(items
        .iter()
        .map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect())
}
