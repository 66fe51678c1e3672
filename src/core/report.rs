//! The machine-readable gate report.
//!
//! One document per invocation, overwritten wholesale. Callers (pre-merge
//! gate, audit jobs) treat it as the only authoritative signal besides the
//! exit status.

use crate::core::error::StagegateError;
use crate::core::git::ResolvedRef;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

pub const REPORT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckId {
    AppendOnly,
    PipelineOrder,
    BudgetRelease,
    ReviewArtifacts,
    RequestIds,
}

impl CheckId {
    /// Fixed evaluation order.
    pub const ALL: [CheckId; 5] = [
        CheckId::AppendOnly,
        CheckId::PipelineOrder,
        CheckId::BudgetRelease,
        CheckId::ReviewArtifacts,
        CheckId::RequestIds,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckId::AppendOnly => "append_only",
            CheckId::PipelineOrder => "pipeline_order",
            CheckId::BudgetRelease => "budget_release",
            CheckId::ReviewArtifacts => "review_artifacts",
            CheckId::RequestIds => "request_ids",
        }
    }

    pub fn human_name(&self) -> &'static str {
        match self {
            CheckId::AppendOnly => "Append-Only Invariant",
            CheckId::PipelineOrder => "Pipeline Order",
            CheckId::BudgetRelease => "Budget Envelope & Release Gate",
            CheckId::ReviewArtifacts => "Review-Artifact Claim-Safety Contract",
            CheckId::RequestIds => "Change-Request Identifier Lifecycle",
        }
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    /// The check could not be evaluated (structural error).
    Error,
}

/// One citeable breach of a rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub rule_id: String,
    pub file: Option<String>,
    pub line: Option<u64>,
    pub field: Option<String>,
    pub value: Option<String>,
    pub message: String,
}

impl Violation {
    pub fn new(rule_id: &str, message: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            file: None,
            line: None,
            field: None,
            value: None,
            message: message.into(),
        }
    }

    pub fn at(mut self, file: &str, line: Option<u64>) -> Self {
        self.file = Some(file.to_string());
        self.line = line;
        self
    }

    pub fn field(mut self, field: &str, value: impl Into<String>) -> Self {
        self.field = Some(field.to_string());
        self.value = Some(value.into());
        self
    }

    /// `file:line [rule] message`, as printed in previews.
    pub fn citation(&self) -> String {
        let mut out = String::new();
        if let Some(file) = &self.file {
            out.push_str(file);
            if let Some(line) = self.line {
                out.push_str(&format!(":{line}"));
            }
            out.push(' ');
        }
        out.push_str(&format!("[{}] {}", self.rule_id, self.message));
        out
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub id: CheckId,
    pub name: &'static str,
    pub rule_ref: String,
    pub status: CheckStatus,
    pub diagnostic: String,
    pub violations: Vec<Violation>,
    pub warnings: Vec<String>,
    pub observations: Vec<String>,
    pub metrics: BTreeMap<String, serde_json::Value>,
}

impl CheckOutcome {
    pub fn new(id: CheckId) -> Self {
        Self {
            id,
            name: id.human_name(),
            rule_ref: String::new(),
            status: CheckStatus::Pass,
            diagnostic: String::new(),
            violations: Vec::new(),
            warnings: Vec::new(),
            observations: Vec::new(),
            metrics: BTreeMap::new(),
        }
    }

    /// A check that could not run at all.
    pub fn structural(id: CheckId, err: &StagegateError) -> Self {
        let mut out = Self::new(id);
        out.status = CheckStatus::Error;
        out.diagnostic = format!("structural error: {err}");
        out
    }

    pub fn metric(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.metrics.insert(key.to_string(), value.into());
    }

    /// Settle status and diagnostic from collected violations.
    pub fn finish(mut self, pass_message: &str, preview_limit: usize) -> Self {
        if self.status == CheckStatus::Error {
            return self;
        }
        if self.violations.is_empty() {
            self.status = CheckStatus::Pass;
            self.diagnostic = pass_message.to_string();
        } else {
            self.status = CheckStatus::Fail;
            let citations: Vec<String> = self.violations.iter().map(|v| v.citation()).collect();
            self.diagnostic = format!(
                "{} violation(s): {}",
                self.violations.len(),
                crate::core::output::preview_messages(&citations, preview_limit, 160)
            );
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    Pass,
    Fail,
    Error,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub pass: usize,
    pub fail: usize,
    pub error: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GateReport {
    pub report_version: &'static str,
    pub generated_at: String,
    pub event_id: String,
    pub reference: Option<ResolvedRef>,
    pub mode_override: Option<String>,
    pub status: AggregateStatus,
    pub summary: Summary,
    /// Set when the whole pass was aborted before checks ran.
    pub fatal: Option<String>,
    pub stores: BTreeMap<String, Option<String>>,
    pub checks: Vec<CheckOutcome>,
}

impl GateReport {
    pub fn new(reference: Option<ResolvedRef>, mode_override: Option<String>) -> Self {
        Self {
            report_version: REPORT_VERSION,
            generated_at: crate::core::time::now_rfc3339(),
            event_id: crate::core::time::new_event_id(),
            reference,
            mode_override,
            status: AggregateStatus::Pass,
            summary: Summary::default(),
            fatal: None,
            stores: BTreeMap::new(),
            checks: Vec::new(),
        }
    }

    /// Recompute summary and aggregate status. Any failing check fails the gate.
    pub fn seal(&mut self) {
        let mut summary = Summary::default();
        for check in &self.checks {
            match check.status {
                CheckStatus::Pass => summary.pass += 1,
                CheckStatus::Fail => summary.fail += 1,
                CheckStatus::Error => summary.error += 1,
            }
            summary.warnings += check.warnings.len();
        }
        self.status = if self.fatal.is_some() || summary.error > 0 {
            AggregateStatus::Error
        } else if summary.fail > 0 {
            AggregateStatus::Fail
        } else {
            AggregateStatus::Pass
        };
        self.summary = summary;
    }

    pub fn check(&self, id: CheckId) -> Option<&CheckOutcome> {
        self.checks.iter().find(|c| c.id == id)
    }
}

/// Overwrite the report file atomically (temp file + rename).
pub fn write_report(path: &Path, report: &GateReport) -> Result<(), StagegateError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let bytes = serde_json::to_vec_pretty(report)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
