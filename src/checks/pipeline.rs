//! Pipeline order state machine.
//!
//! A run's state is the highest phase reached by a validated handoff. Each
//! handoff `(from, to)` is judged against that state under the run's mode:
//!
//! - `full`: `to` must be the phase immediately after `from`.
//! - `lite`: `to` may skip ahead, but only over phases declared optional for
//!   `lite` (team registry `optional_in_modes` or config).
//! - Repeating the immediately preceding legal pair is legal and does not
//!   advance (a superseding handoff correcting the prior entry).
//!
//! Acknowledged incidents come from the decision log as a separate ledger; the
//! machine itself has no exception state.

use crate::core::config::GateConfig;
use crate::core::diff::AddedLines;
use crate::core::error::StagegateError;
use crate::core::records::{
    DecisionRecord, HandoffRecord, RunRecord, RunStatus, TeamRecord, is_blocked_status,
    parse_json_list,
};
use crate::core::report::{CheckId, CheckOutcome, Violation};
use crate::core::store::{RecordStore, Row, Rows};
use crate::core::time::parse_utc;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Full,
    Lite,
}

impl RunMode {
    /// Case- and whitespace-insensitive.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "full" => Some(RunMode::Full),
            "lite" => Some(RunMode::Lite),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Full => "full",
            RunMode::Lite => "lite",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn team_key(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    /// Normalized (trimmed, lower-case) team id.
    pub team: String,
    pub order: i64,
    pub optional_in: BTreeSet<RunMode>,
}

impl Phase {
    pub fn is_optional(&self, mode: RunMode) -> bool {
        mode != RunMode::Full && self.optional_in.contains(&mode)
    }
}

/// Immutable team/phase reference data, loaded fresh per validation pass.
#[derive(Debug, Clone)]
pub struct PhaseRegistry {
    /// Sorted by `order`.
    phases: Vec<Phase>,
    by_team: FxHashMap<String, usize>,
}

impl PhaseRegistry {
    /// Build from team-registry rows plus config-declared optional phases.
    ///
    /// Two teams sharing a phase number make the order ill-defined and abort
    /// the whole pass with [`StagegateError::DuplicatePhase`].
    pub fn load(
        rows: &Rows<TeamRecord>,
        config_optional: &BTreeMap<String, Vec<String>>,
    ) -> Result<Self, StagegateError> {
        let malformed = |line: u64, message: String| StagegateError::MalformedStore {
            file: rows.path.clone(),
            message: format!("line {line}: {message}"),
        };

        let mut phases: Vec<Phase> = Vec::new();
        let mut seen_order: BTreeMap<i64, String> = BTreeMap::new();
        for row in rows.iter() {
            let team = team_key(&row.record.team_id);
            if team.is_empty() {
                return Err(malformed(row.line, "team_id cannot be empty".to_string()));
            }
            let order: i64 = row.record.phase_order.trim().parse().map_err(|_| {
                malformed(
                    row.line,
                    format!("phase_order '{}' is not an integer", row.record.phase_order),
                )
            })?;
            if phases.iter().any(|p| p.team == team) {
                return Err(malformed(row.line, format!("team '{team}' declared twice")));
            }
            if let Some(first) = seen_order.get(&order) {
                return Err(StagegateError::DuplicatePhase {
                    phase_order: order,
                    first: first.clone(),
                    second: team,
                });
            }
            let mut optional_in = BTreeSet::new();
            let modes = parse_json_list(&row.record.optional_in_modes)
                .map_err(|e| malformed(row.line, format!("optional_in_modes: {e}")))?;
            for raw in modes {
                let mode = RunMode::parse(&raw).ok_or_else(|| {
                    malformed(row.line, format!("optional_in_modes: unknown run mode '{raw}'"))
                })?;
                optional_in.insert(mode);
            }
            seen_order.insert(order, team.clone());
            phases.push(Phase {
                team,
                order,
                optional_in,
            });
        }

        for (mode_name, teams) in config_optional {
            let mode = RunMode::parse(mode_name).ok_or_else(|| {
                StagegateError::ConfigError(format!(
                    "pipeline.optional_phases: unknown run mode '{mode_name}'"
                ))
            })?;
            if mode == RunMode::Full && !teams.is_empty() {
                tracing::warn!("pipeline.optional_phases.full ignored: full mode skips nothing");
                continue;
            }
            for team in teams {
                let key = team_key(team);
                let phase = phases.iter_mut().find(|p| p.team == key).ok_or_else(|| {
                    StagegateError::ConfigError(format!(
                        "pipeline.optional_phases.{mode_name}: unknown team '{team}'"
                    ))
                })?;
                phase.optional_in.insert(mode);
            }
        }

        phases.sort_by_key(|p| p.order);
        let by_team = phases
            .iter()
            .enumerate()
            .map(|(i, p)| (p.team.clone(), i))
            .collect();
        Ok(Self { phases, by_team })
    }

    pub fn phase_of(&self, team: &str) -> Option<&Phase> {
        self.by_team.get(&team_key(team)).map(|&i| &self.phases[i])
    }

    pub fn at_order(&self, order: i64) -> Option<&Phase> {
        self.phases.iter().find(|p| p.order == order)
    }

    /// The declared phase following `order`, if any.
    pub fn next_after(&self, order: i64) -> Option<&Phase> {
        self.phases.iter().find(|p| p.order > order)
    }

    /// Declared phases strictly between `lo` and `hi`.
    pub fn between(&self, lo: i64, hi: i64) -> Vec<&Phase> {
        self.phases
            .iter()
            .filter(|p| p.order > lo && p.order < hi)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionRule {
    UnknownTeam,
    FromMismatch,
    Regression,
    StrictAdvance,
    SkipRequired,
}

impl TransitionRule {
    pub fn rule_id(&self) -> &'static str {
        match self {
            TransitionRule::UnknownTeam => "pipeline.unknown_team",
            TransitionRule::FromMismatch => "pipeline.from_mismatch",
            TransitionRule::Regression => "pipeline.regression",
            TransitionRule::StrictAdvance => "pipeline.strict_advance",
            TransitionRule::SkipRequired => "pipeline.skip_required",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// State advanced to this phase order.
    Advanced(i64),
    /// Exact repeat of the previous legal pair; no progress.
    Repeat,
    Illegal(IllegalTransition),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub rule: TransitionRule,
    pub observed: (String, String),
    pub expected: String,
    pub phase_delta: Option<i64>,
    pub detail: String,
}

/// Per-run walk state.
#[derive(Debug)]
pub struct OrderMachine<'a> {
    registry: &'a PhaseRegistry,
    mode: RunMode,
    state: Option<i64>,
    last: Option<(String, String)>,
}

impl<'a> OrderMachine<'a> {
    pub fn new(registry: &'a PhaseRegistry, mode: RunMode) -> Self {
        Self {
            registry,
            mode,
            state: None,
            last: None,
        }
    }

    pub fn state(&self) -> Option<i64> {
        self.state
    }

    fn expected_pair(&self) -> String {
        match self.state {
            None => "any initial handoff".to_string(),
            Some(s) => {
                let from = self
                    .registry
                    .at_order(s)
                    .map(|p| p.team.as_str())
                    .unwrap_or("?");
                match self.registry.next_after(s) {
                    Some(next) => format!("{from}->{}", next.team),
                    None => format!("none ({from} is the terminal phase)"),
                }
            }
        }
    }

    pub fn step(&mut self, from: &str, to: &str) -> Step {
        let pair = (team_key(from), team_key(to));
        if self.last.as_ref() == Some(&pair) {
            return Step::Repeat;
        }

        let illegal = |rule, phase_delta, detail: String, expected: String| {
            Step::Illegal(IllegalTransition {
                rule,
                observed: pair.clone(),
                expected,
                phase_delta,
                detail,
            })
        };
        let expected = self.expected_pair();

        let (from_phase, to_phase) =
            match (self.registry.phase_of(&pair.0), self.registry.phase_of(&pair.1)) {
                (Some(f), Some(t)) => (f, t),
                (f, _) => {
                    let unknown = if f.is_none() { &pair.0 } else { &pair.1 };
                    return illegal(
                        TransitionRule::UnknownTeam,
                        None,
                        format!("team '{unknown}' is not in the team registry"),
                        expected,
                    );
                }
            };
        let delta = to_phase.order - from_phase.order;

        if let Some(s) = self.state {
            if from_phase.order != s {
                return illegal(
                    TransitionRule::FromMismatch,
                    Some(delta),
                    format!(
                        "handoff starts at phase {} but the run is at phase {s}",
                        from_phase.order
                    ),
                    expected,
                );
            }
        }

        if delta <= 0 || self.state.is_some_and(|s| to_phase.order <= s) {
            return illegal(
                TransitionRule::Regression,
                Some(delta),
                format!(
                    "target phase {} does not advance past phase {}",
                    to_phase.order,
                    self.state.unwrap_or(from_phase.order).max(from_phase.order)
                ),
                expected,
            );
        }

        let skipped = self.registry.between(from_phase.order, to_phase.order);
        match self.mode {
            RunMode::Full => {
                if delta != 1 {
                    let detail = if skipped.is_empty() {
                        format!(
                            "full mode requires phase {} after phase {}",
                            from_phase.order + 1,
                            from_phase.order
                        )
                    } else {
                        let names: Vec<&str> = skipped.iter().map(|p| p.team.as_str()).collect();
                        format!("full mode forbids skipping phases ({})", names.join(", "))
                    };
                    return illegal(TransitionRule::StrictAdvance, Some(delta), detail, expected);
                }
            }
            RunMode::Lite => {
                let required: Vec<&str> = skipped
                    .iter()
                    .filter(|p| !p.is_optional(RunMode::Lite))
                    .map(|p| p.team.as_str())
                    .collect();
                if !required.is_empty() {
                    let all: Vec<&str> = skipped.iter().map(|p| p.team.as_str()).collect();
                    return illegal(
                        TransitionRule::SkipRequired,
                        Some(delta),
                        format!(
                            "lite mode skipped ({}) including required ({})",
                            all.join(", "),
                            required.join(", ")
                        ),
                        expected,
                    );
                }
            }
        }

        self.state = Some(to_phase.order);
        self.last = Some(pair);
        Step::Advanced(to_phase.order)
    }

    /// Continue past an acknowledged incident: the run resumes from `to`.
    pub fn contain(&mut self, to: &str) {
        if let Some(phase) = self.registry.phase_of(to) {
            self.state = Some(phase.order);
        }
        self.last = None;
    }
}

/// Decision ids per run that acknowledge one blocked pipeline-order incident each.
#[derive(Debug, Clone, Default)]
pub struct ToleranceLedger {
    acknowledged: FxHashMap<String, Vec<String>>,
}

impl ToleranceLedger {
    pub fn from_decisions(decisions: &Rows<DecisionRecord>, code: &str) -> Self {
        let code = code.trim().to_ascii_lowercase();
        let mut acknowledged: FxHashMap<String, Vec<String>> = FxHashMap::default();
        for row in decisions.iter() {
            let d = &row.record;
            if d.decision_code.trim().to_ascii_lowercase() == code && is_blocked_status(&d.status) {
                let id = if d.decision_id.trim().is_empty() {
                    format!("{}:{}", decisions.path, row.line)
                } else {
                    d.decision_id.trim().to_string()
                };
                acknowledged
                    .entry(d.run_id.trim().to_string())
                    .or_default()
                    .push(id);
            }
        }
        Self { acknowledged }
    }

    pub fn for_run(&self, run_id: &str) -> &[String] {
        self.acknowledged
            .get(run_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone)]
pub struct RunVerdict {
    pub run_id: String,
    pub mode: RunMode,
    /// Phase state after each validated advance (non-decreasing).
    pub states: Vec<i64>,
    pub transitions: usize,
    pub repeats: usize,
    pub violations: Vec<Violation>,
    pub observations: Vec<String>,
}

impl RunVerdict {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Walk one run's handoffs in timestamp order (append order breaks ties) and
/// report the first illegal transition that is not acknowledged.
pub fn validate_run(
    run_id: &str,
    handoffs: &[&Row<HandoffRecord>],
    handoff_path: &str,
    registry: &PhaseRegistry,
    mode: RunMode,
    acknowledged: &[String],
) -> RunVerdict {
    let mut verdict = RunVerdict {
        run_id: run_id.to_string(),
        mode,
        states: Vec::new(),
        transitions: 0,
        repeats: 0,
        violations: Vec::new(),
        observations: Vec::new(),
    };

    let mut ordered = Vec::with_capacity(handoffs.len());
    for row in handoffs {
        match parse_utc(&row.record.timestamp_utc) {
            Some(ts) => ordered.push((ts, row.index, *row)),
            None => verdict.violations.push(
                Violation::new(
                    "pipeline.timestamp_invalid",
                    format!("run {run_id}: handoff timestamp cannot be ordered"),
                )
                .at(handoff_path, Some(row.line))
                .field("timestamp_utc", row.record.timestamp_utc.clone()),
            ),
        }
    }
    if !verdict.violations.is_empty() {
        return verdict;
    }
    ordered.sort_by_key(|(ts, index, _)| (*ts, *index));

    let mut machine = OrderMachine::new(registry, mode);
    let mut acknowledgements = acknowledged.iter();
    for (_, _, row) in ordered {
        verdict.transitions += 1;
        match machine.step(&row.record.from_team, &row.record.to_team) {
            Step::Advanced(order) => verdict.states.push(order),
            Step::Repeat => {
                verdict.repeats += 1;
                verdict.observations.push(format!(
                    "run {run_id}: line {} repeats {}->{} (superseding handoff, no advance)",
                    row.line,
                    team_key(&row.record.from_team),
                    team_key(&row.record.to_team)
                ));
            }
            Step::Illegal(illegal) => {
                let citation = format!(
                    "run {run_id} ({mode}): observed {}->{}, expected {}; {}{}",
                    illegal.observed.0,
                    illegal.observed.1,
                    illegal.expected,
                    illegal.detail,
                    illegal
                        .phase_delta
                        .map(|d| format!("; phase delta {d}"))
                        .unwrap_or_default()
                );
                if let Some(decision) = acknowledgements.next() {
                    tracing::info!(run = run_id, decision = %decision, "pipeline-order violation contained");
                    verdict.observations.push(format!(
                        "tolerated by decision {decision}: {citation} [{}]",
                        illegal.rule.rule_id()
                    ));
                    machine.contain(&row.record.to_team);
                    continue;
                }
                verdict.violations.push(
                    Violation::new(illegal.rule.rule_id(), citation)
                        .at(handoff_path, Some(row.line))
                        .field(
                            "from_team->to_team",
                            format!("{}->{}", illegal.observed.0, illegal.observed.1),
                        ),
                );
                break;
            }
        }
    }
    verdict
}

/// Which runs the pipeline check walks.
#[derive(Debug, Clone, Default)]
pub struct RunSelection {
    pub target_run: Option<String>,
    pub all_runs: bool,
}

/// Resolve a run's mode: CLI override, then latest registry row, then config default.
pub fn resolve_mode(
    mode_override: Option<&str>,
    latest_run: Option<&RunRecord>,
    default_mode: &str,
) -> Result<RunMode, String> {
    let raw = mode_override
        .map(str::to_string)
        .or_else(|| {
            latest_run
                .map(|r| r.run_mode.trim().to_string())
                .filter(|m| !m.is_empty())
        })
        .unwrap_or_else(|| default_mode.to_string());
    RunMode::parse(&raw).ok_or(raw)
}

/// Observation for a run whose registry status says it should not be moving.
pub fn run_status_note(run: &RunRecord) -> Option<String> {
    let id = run.run_id.trim();
    let status = run.status.trim();
    match RunStatus::classify(status) {
        RunStatus::Blocked => Some(format!("run {id} is registered as '{status}'")),
        RunStatus::Terminal => Some(format!("run {id} has handoffs after terminal status '{status}'")),
        RunStatus::Missing => Some(format!("run {id} has no registry status")),
        RunStatus::Active => None,
    }
}

pub fn check_pipeline_order(
    store: &RecordStore,
    registry: &PhaseRegistry,
    added_handoffs: &AddedLines,
    selection: &RunSelection,
    mode_override: Option<&str>,
    config: &GateConfig,
) -> Result<CheckOutcome, StagegateError> {
    let handoffs = store.handoffs()?;
    let runs = store.runs()?;
    let decisions = store.decisions()?;
    let ledger = ToleranceLedger::from_decisions(&decisions, &config.pipeline.tolerance_decision_code);

    let mut latest_run: BTreeMap<String, &RunRecord> = BTreeMap::new();
    for run in runs.records() {
        latest_run.insert(run.run_id.trim().to_string(), run);
    }

    let mut by_run: BTreeMap<String, Vec<&Row<HandoffRecord>>> = BTreeMap::new();
    for row in handoffs.iter() {
        by_run
            .entry(row.record.run_id.trim().to_string())
            .or_default()
            .push(row);
    }

    let mut selected: BTreeSet<String> = if selection.all_runs {
        by_run.keys().cloned().collect()
    } else {
        handoffs
            .added_since(added_handoffs)
            .map(|r| r.record.run_id.trim().to_string())
            .collect()
    };
    if let Some(target) = &selection.target_run {
        selected.insert(target.trim().to_string());
    }

    let mut outcome = CheckOutcome::new(CheckId::PipelineOrder);
    let mut transitions = 0usize;
    let mut tolerated = 0usize;

    for row in handoffs.added_since(added_handoffs) {
        match parse_json_list(&row.record.blocking_flags) {
            Ok(flags) if !flags.is_empty() => outcome.observations.push(format!(
                "run {}: line {} carries blocking flags [{}]",
                row.record.run_id.trim(),
                row.line,
                flags.join(", ")
            )),
            Ok(_) => {}
            Err(e) => outcome.violations.push(
                Violation::new("pipeline.blocking_flags", e)
                    .at(&handoffs.path, Some(row.line))
                    .field("blocking_flags", row.record.blocking_flags.clone()),
            ),
        }
    }

    for run_id in &selected {
        if run_id.is_empty() {
            outcome.violations.push(
                Violation::new("pipeline.unregistered_run", "handoff rows without a run_id")
                    .at(&handoffs.path, None)
                    .field("run_id", ""),
            );
            continue;
        }
        let latest = latest_run.get(run_id).copied();
        if latest.is_none() {
            outcome.violations.push(
                Violation::new(
                    "pipeline.unregistered_run",
                    format!("run {run_id} has handoffs but no run registry row"),
                )
                .at(&runs.path, None)
                .field("run_id", run_id.clone()),
            );
            continue;
        }
        if let Some(note) = latest.and_then(run_status_note) {
            outcome.observations.push(note);
        }
        let mode = match resolve_mode(mode_override, latest, &config.pipeline.default_mode) {
            Ok(mode) => mode,
            Err(raw) => {
                outcome.violations.push(
                    Violation::new(
                        "pipeline.unknown_mode",
                        format!("run {run_id}: run mode '{raw}' is neither full nor lite"),
                    )
                    .at(&runs.path, None)
                    .field("run_mode", raw),
                );
                continue;
            }
        };
        let rows = by_run.get(run_id).cloned().unwrap_or_default();
        let verdict = validate_run(
            run_id,
            &rows,
            &handoffs.path,
            registry,
            mode,
            ledger.for_run(run_id),
        );
        tracing::debug!(
            run = %run_id,
            mode = %mode,
            transitions = verdict.transitions,
            passed = verdict.passed(),
            "run walked"
        );
        transitions += verdict.transitions;
        tolerated += verdict
            .observations
            .iter()
            .filter(|o| o.starts_with("tolerated"))
            .count();
        outcome.observations.extend(verdict.observations);
        outcome.violations.extend(verdict.violations);
    }

    outcome.metric("runs_validated", selected.len());
    outcome.metric("transitions_checked", transitions);
    outcome.metric("tolerated_incidents", tolerated);
    outcome.metric("phases_declared", registry.len());
    Ok(outcome.finish(
        &format!(
            "{} run(s), {} handoff(s) follow the declared phase order",
            selected.len(),
            transitions
        ),
        config.append_only.preview_limit,
    ))
}
