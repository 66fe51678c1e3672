//! Validation orchestrator.
//!
//! Runs every governance check in a fixed order against one reference point,
//! collects the outcomes into a [`GateReport`], and overwrites the report
//! file. A structural error inside a check marks only that check; a failure
//! to establish the pass itself (config, reference point, ill-defined phase
//! order) aborts with a `fatal` report and no checks.

use crate::checks::append_only::check_append_only;
use crate::checks::artifacts::check_review_artifacts;
use crate::checks::budget::check_budget_release;
use crate::checks::pipeline::{PhaseRegistry, RunMode, RunSelection, check_pipeline_order};
use crate::checks::requests::check_request_ids;
use crate::core::config::{self, GateConfig};
use crate::core::diff;
use crate::core::error::StagegateError;
use crate::core::git::{self, ResolvedRef};
use crate::core::report::{CheckId, CheckOutcome, GateReport, write_report};
use crate::core::store::RecordStore;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    pub repo_root: PathBuf,
    /// Reference point; falls back to the configured `reference`.
    pub base: Option<String>,
    pub mode_override: Option<String>,
    pub target_run: Option<String>,
    pub all_runs: bool,
    pub report_path: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

impl ValidateOptions {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            ..Default::default()
        }
    }
}

fn trace_gate(name: &str) {
    if std::env::var("STAGEGATE_VALIDATE_TRACE").ok().as_deref() == Some("1") {
        println!("validate: trace {}", name);
    }
}

fn report_path(opts: &ValidateOptions, config: Option<&GateConfig>) -> PathBuf {
    match &opts.report_path {
        Some(p) if p.is_absolute() => p.clone(),
        Some(p) => opts.repo_root.join(p),
        None => {
            let rel = config
                .map(|c| c.report.path.clone())
                .unwrap_or_else(|| config::ReportConfig::default().path);
            opts.repo_root.join(rel)
        }
    }
}

fn abort(
    opts: &ValidateOptions,
    config: Option<&GateConfig>,
    reference: Option<ResolvedRef>,
    err: &StagegateError,
) -> Result<GateReport, StagegateError> {
    tracing::error!(error = %err, "validation pass aborted");
    let mut report = GateReport::new(reference, opts.mode_override.clone());
    report.fatal = Some(err.to_string());
    report.seal();
    write_report(&report_path(opts, config), &report)?;
    Ok(report)
}

/// Everything the checks share for one pass.
struct Pass<'a> {
    opts: &'a ValidateOptions,
    config: &'a GateConfig,
    reference: &'a ResolvedRef,
    store: RecordStore,
    registry: Result<PhaseRegistry, StagegateError>,
}

impl Pass<'_> {
    fn run_check(&self, id: CheckId) -> Result<CheckOutcome, StagegateError> {
        let root = self.opts.repo_root.as_path();
        match id {
            CheckId::AppendOnly => check_append_only(root, self.reference, self.config),
            CheckId::PipelineOrder => {
                let registry = match &self.registry {
                    Ok(registry) => registry,
                    Err(e) => {
                        return Err(StagegateError::GateAborted(format!(
                            "team registry unusable: {e}"
                        )));
                    }
                };
                let added =
                    diff::added_lines(root, self.reference, &self.config.stores.handoff_log)?;
                let selection = RunSelection {
                    target_run: self.opts.target_run.clone(),
                    all_runs: self.opts.all_runs,
                };
                check_pipeline_order(
                    &self.store,
                    registry,
                    &added,
                    &selection,
                    self.opts.mode_override.as_deref(),
                    self.config,
                )
            }
            CheckId::BudgetRelease => {
                check_budget_release(&self.store, self.opts.target_run.as_deref(), self.config)
            }
            CheckId::ReviewArtifacts => check_review_artifacts(&self.store, self.config),
            CheckId::RequestIds => {
                check_request_ids(&self.store, self.registry.as_ref().ok(), self.config)
            }
        }
    }
}

/// Run the gate once and write the report. Returns the sealed report; the
/// caller maps its status to an exit code.
pub fn run_validation(opts: &ValidateOptions) -> Result<GateReport, StagegateError> {
    let config = match config::load_config(&opts.repo_root, opts.config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => return abort(opts, None, None, &e),
    };

    if let Some(raw) = &opts.mode_override {
        if RunMode::parse(raw).is_none() {
            let err = StagegateError::ConfigError(format!(
                "run mode override '{raw}' is neither full nor lite"
            ));
            return abort(opts, Some(&config), None, &err);
        }
    }

    let requested = opts.base.clone().unwrap_or_else(|| config.reference.clone());
    let reference = match git::resolve_reference(&opts.repo_root, &requested) {
        Ok(reference) => reference,
        Err(e) => return abort(opts, Some(&config), None, &e),
    };
    tracing::info!(requested = %reference.requested, commit = %reference.commit, "reference resolved");

    let store = RecordStore::new(&opts.repo_root, &config.stores);
    let registry = store
        .teams()
        .and_then(|rows| PhaseRegistry::load(&rows, &config.pipeline.optional_phases));
    if let Err(e @ StagegateError::DuplicatePhase { .. }) = &registry {
        return abort(opts, Some(&config), Some(reference.clone()), e);
    }

    let pass = Pass {
        opts,
        config: &config,
        reference: &reference,
        store,
        registry,
    };

    let mut report = GateReport::new(Some(reference.clone()), opts.mode_override.clone());
    for id in CheckId::ALL {
        trace_gate(id.as_str());
        let mut outcome = pass
            .run_check(id)
            .unwrap_or_else(|e| CheckOutcome::structural(id, &e));
        outcome.rule_ref = config.rule_ref(id.as_str());
        tracing::info!(
            check = %id,
            status = ?outcome.status,
            violations = outcome.violations.len(),
            "check complete"
        );
        report.checks.push(outcome);
    }

    for rel in pass.store.tabular_paths() {
        report
            .stores
            .insert(rel.to_string(), pass.store.fingerprint(rel));
    }
    match pass.store.artifact_paths() {
        Ok(paths) => {
            for rel in paths {
                let digest = pass.store.fingerprint(&rel);
                report.stores.insert(rel, digest);
            }
        }
        Err(e) => tracing::warn!(error = %e, "review artifacts not fingerprinted"),
    }
    report.seal();
    write_report(&report_path(opts, Some(&config)), &report)?;
    Ok(report)
}
