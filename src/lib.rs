//! Stagegate: the governance gate for append-only content review.
//!
//! A multi-stage review workflow records its work in append-only stores
//! (run registry, handoff log, change-request queue, decision log, budget
//! envelopes, release gates, review artifacts). Stagegate consumes those
//! stores and answers one question per proposed change: is the record still
//! trustworthy enough to treat anything as approved?
//!
//! # Checks
//!
//! Run in this order, each producing a pass/fail outcome with citations:
//!
//! 1. `append_only`: no historical row was edited or removed.
//! 2. `pipeline_order`: handoffs walk the declared phase order for the run's
//!    mode (`full` or `lite`).
//! 3. `budget_release`: the run has a complete, positive budget envelope and
//!    no release gate is red.
//! 4. `review_artifacts`: every artifact satisfies the claim-safety contract.
//! 5. `request_ids`: change-request ids are unique, or resolved by
//!    supersession.
//!
//! # Examples
//!
//! ```bash
//! # Gate the working tree against HEAD
//! stagegate validate
//!
//! # Gate against a branch point, forcing lite mode for run R7
//! stagegate validate --base origin/main --mode lite --run R7
//!
//! # Lines added to a store since the reference
//! stagegate changes data/team_ops/handoff_log.csv
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: errors, config, git plumbing, change extraction, typed stores,
//!   the report, and the orchestrator
//! - [`checks`]: one module per governance check

pub mod checks;
pub mod core;

use crate::core::error::StagegateError;
use crate::core::report::AggregateStatus;
use crate::core::validate::{ValidateOptions, run_validation};
use crate::core::{config, diff, git, output};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(
    name = "stagegate",
    version = env!("CARGO_PKG_VERSION"),
    about = "Append-only governance gate for multi-stage content review"
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct ValidateCli {
    /// Repository root (defaults to the enclosing git work tree).
    #[clap(long)]
    root: Option<PathBuf>,
    /// Reference point treated as already validated (defaults to config `reference`).
    #[clap(long)]
    base: Option<String>,
    /// Run-mode override applied to every validated run: full | lite.
    #[clap(long)]
    mode: Option<String>,
    /// Run to validate for pipeline order and budget/release gates.
    #[clap(long)]
    run: Option<String>,
    /// Walk every run in the handoff log, not only those with new handoffs.
    #[clap(long)]
    all_runs: bool,
    /// Report path (defaults to config `report.path`).
    #[clap(long)]
    report: Option<PathBuf>,
    /// Config file (defaults to `.stagegate/config.toml`).
    #[clap(long)]
    config: Option<PathBuf>,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text", value_parser = ["text", "json"])]
    format: String,
}

#[derive(clap::Args, Debug)]
struct ChangesCli {
    /// Store file, relative to the repository root.
    path: String,
    /// Reference point (defaults to config `reference`).
    #[clap(long)]
    base: Option<String>,
    #[clap(long)]
    root: Option<PathBuf>,
    #[clap(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every governance check and write the gate report
    #[clap(name = "validate", visible_alias = "v")]
    Validate(ValidateCli),

    /// Print the line numbers added to a store since the reference point
    #[clap(name = "changes")]
    Changes(ChangesCli),

    /// Show version information
    #[clap(name = "version")]
    Version,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("STAGEGATE_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// The enclosing git work tree, or `start` itself outside of one.
fn find_repo_root(start: &Path) -> PathBuf {
    git::run_git(start, &["rev-parse", "--show-toplevel"])
        .ok()
        .filter(|out| !out.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| start.to_path_buf())
}

fn resolve_root(explicit: Option<PathBuf>) -> Result<PathBuf, StagegateError> {
    match explicit {
        Some(root) => Ok(root),
        None => Ok(find_repo_root(&std::env::current_dir()?)),
    }
}

fn run_validate(args: ValidateCli) -> Result<(), StagegateError> {
    let opts = ValidateOptions {
        repo_root: resolve_root(args.root)?,
        base: args.base,
        mode_override: args.mode,
        target_run: args.run,
        all_runs: args.all_runs,
        report_path: args.report,
        config_path: args.config,
    };
    let report = run_validation(&opts)?;

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", output::render_text(&report));
    }

    match report.status {
        AggregateStatus::Pass => Ok(()),
        AggregateStatus::Fail => Err(StagegateError::ValidationError(format!(
            "{} check(s) failed.",
            report.summary.fail
        ))),
        AggregateStatus::Error => Err(StagegateError::GateAborted(
            report.fatal.clone().unwrap_or_else(|| {
                format!("{} check(s) could not be evaluated.", report.summary.error)
            }),
        )),
    }
}

fn run_changes(args: ChangesCli) -> Result<(), StagegateError> {
    let root = resolve_root(args.root)?;
    let config = config::load_config(&root, args.config.as_deref())?;
    let requested = args.base.unwrap_or_else(|| config.reference.clone());
    let reference = git::resolve_reference(&root, &requested)?;
    let rel = args.path.trim_start_matches("./").replace('\\', "/");
    let added = diff::added_lines(&root, &reference, &rel)?;
    let doc = serde_json::json!({
        "path": rel,
        "reference": reference,
        "added_lines": added,
    });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

pub fn run() -> Result<(), StagegateError> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Version => {
            println!("v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Validate(args) => run_validate(args),
        Command::Changes(args) => run_changes(args),
    }
}
