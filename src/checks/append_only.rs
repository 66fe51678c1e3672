//! Append-only invariant over the declared store globs.
//!
//! Only pure appends are legal. A removed line (an in-place edit shows up as
//! a removal plus an addition) or a file that disappeared since the reference
//! is a violation. There are no exceptions: corrections are new rows that
//! carry a supersession reference.

use crate::core::config::GateConfig;
use crate::core::diff::{self, FileDiff};
use crate::core::error::StagegateError;
use crate::core::git::{self, ResolvedRef};
use crate::core::output::compact_line;
use crate::core::report::{CheckId, CheckOutcome, Violation};
use glob::{MatchOptions, Pattern};
use std::collections::BTreeSet;
use std::path::Path;

pub const RULE_REMOVED_LINE: &str = "append_only.removed_line";
pub const RULE_FILE_REMOVED: &str = "append_only.file_removed";
pub const RULE_BINARY_CHANGE: &str = "append_only.binary_change";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

pub struct GlobSet {
    patterns: Vec<Pattern>,
}

impl GlobSet {
    pub fn new(globs: &[String]) -> Result<Self, StagegateError> {
        let patterns = globs
            .iter()
            .map(|g| {
                Pattern::new(g).map_err(|e| {
                    StagegateError::ConfigError(format!("invalid append_only glob '{g}': {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, rel_path: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_with(rel_path, MATCH_OPTIONS))
    }
}

/// Violations found in parsed diffs, plus the total number of offending
/// lines (the list itself is capped at `limit` removed-line citations).
pub fn violations_from_diffs(
    diffs: &[FileDiff],
    missing_now: &[String],
    limit: usize,
) -> (Vec<Violation>, usize) {
    let mut violations = Vec::new();
    let mut total = 0usize;
    let mut cited_lines = 0usize;

    for path in missing_now {
        total += 1;
        violations.push(
            Violation::new(
                RULE_FILE_REMOVED,
                "file present at the reference point is absent now",
            )
            .at(path, None),
        );
    }

    for file in diffs {
        let path = file.display_path();
        if file.deleted {
            if !missing_now.iter().any(|m| m == path) {
                total += 1;
                violations.push(
                    Violation::new(RULE_FILE_REMOVED, "file deleted since the reference point")
                        .at(path, None),
                );
            }
            continue;
        }
        if file.binary && !file.new_file {
            total += 1;
            violations.push(
                Violation::new(RULE_BINARY_CHANGE, "binary content changed in place").at(path, None),
            );
        }
        for removed in &file.removed {
            total += 1;
            if cited_lines < limit.max(1) {
                cited_lines += 1;
                violations.push(
                    Violation::new(
                        RULE_REMOVED_LINE,
                        format!(
                            "historical line removed or edited: '{}'",
                            compact_line(&removed.content, 80)
                        ),
                    )
                    .at(path, Some(removed.old_line)),
                );
            }
        }
    }
    (violations, total)
}

pub fn check_append_only(
    repo_root: &Path,
    reference: &ResolvedRef,
    config: &GateConfig,
) -> Result<CheckOutcome, StagegateError> {
    let globs = GlobSet::new(&config.append_only.globs)?;
    let mut outcome = CheckOutcome::new(CheckId::AppendOnly);

    let at_reference: BTreeSet<String> = git::ls_tree_paths(repo_root, &reference.commit)?
        .into_iter()
        .filter(|p| globs.matches(p))
        .collect();

    let mut missing_now = Vec::new();
    let mut present = Vec::new();
    for path in &at_reference {
        if repo_root.join(path).is_file() {
            present.push(path.as_str());
        } else {
            missing_now.push(path.clone());
        }
    }

    let diffs = if present.is_empty() {
        Vec::new()
    } else {
        diff::worktree_changes(repo_root, &reference.commit, &present)?
    };

    let added: usize = diffs.iter().map(|d| d.added.len()).sum();
    let (violations, total) =
        violations_from_diffs(&diffs, &missing_now, config.append_only.preview_limit);
    tracing::debug!(
        files = at_reference.len(),
        changed = diffs.len(),
        offending = total,
        "append-only scan"
    );

    outcome.metric("files_tracked", at_reference.len());
    outcome.metric("files_changed", diffs.len());
    outcome.metric("lines_added", added);
    outcome.metric("offending_lines_total", total);
    if total > violations.len() {
        outcome.observations.push(format!(
            "{} further offending line(s) not listed",
            total - violations.len()
        ));
    }
    outcome.violations = violations;
    Ok(outcome.finish(
        &format!(
            "{} tracked store file(s) unchanged or appended only ({} line(s) added)",
            at_reference.len(),
            added
        ),
        config.append_only.preview_limit,
    ))
}
