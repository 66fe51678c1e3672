//! Thin git plumbing: the reference point "already validated" is a commit,
//! the current state is the working tree.

use crate::core::error::StagegateError;
use serde::Serialize;
use std::path::Path;
use std::process::Command;

/// A reference point resolved to a concrete commit.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResolvedRef {
    pub requested: String,
    #[serde(rename = "resolved_commit")]
    pub commit: String,
}

fn git_output(repo_root: &Path, args: &[&str]) -> Result<std::process::Output, StagegateError> {
    Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()
        .map_err(|e| StagegateError::GitError(format!("failed to spawn git: {e}")))
}

/// Run git and return stdout verbatim (no trimming; file content depends on it).
pub fn run_git_raw(repo_root: &Path, args: &[&str]) -> Result<String, StagegateError> {
    let output = git_output(repo_root, args)?;
    if !output.status.success() {
        return Err(StagegateError::GitError(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or(""),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub fn run_git(repo_root: &Path, args: &[&str]) -> Result<String, StagegateError> {
    Ok(run_git_raw(repo_root, args)?.trim().to_string())
}

pub fn is_work_tree(repo_root: &Path) -> bool {
    run_git(repo_root, &["rev-parse", "--is-inside-work-tree"])
        .map(|out| out == "true")
        .unwrap_or(false)
}

/// Resolve a reference point to a commit. Failure is structural: an unknown
/// reference is never treated as "no changes".
pub fn resolve_reference(repo_root: &Path, reference: &str) -> Result<ResolvedRef, StagegateError> {
    if !is_work_tree(repo_root) {
        return Err(StagegateError::GitError(format!(
            "{} is not inside a git work tree",
            repo_root.display()
        )));
    }
    let rev = format!("{reference}^{{commit}}");
    let output = git_output(repo_root, &["rev-parse", "--verify", "--quiet", &rev])?;
    if !output.status.success() {
        return Err(StagegateError::ReferenceUnresolved(reference.to_string()));
    }
    let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if commit.is_empty() {
        return Err(StagegateError::ReferenceUnresolved(reference.to_string()));
    }
    Ok(ResolvedRef {
        requested: reference.to_string(),
        commit,
    })
}

/// The work-tree subdirectory `repo_root` sits in, relative to the top level
/// (`""` at the top, `"mk/"` below it).
pub fn repo_prefix(repo_root: &Path) -> Result<String, StagegateError> {
    run_git(repo_root, &["rev-parse", "--show-prefix"])
}

/// True when `path` (relative to `repo_root`) exists in the tree of `commit`.
pub fn exists_at(repo_root: &Path, commit: &str, path: &str) -> bool {
    git_output(repo_root, &["cat-file", "-e", &format!("{commit}:./{path}")])
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// File paths tracked at `commit` below `repo_root`, relative to `repo_root`.
pub fn ls_tree_paths(repo_root: &Path, commit: &str) -> Result<Vec<String>, StagegateError> {
    let prefix = repo_prefix(repo_root)?;
    let output = run_git_raw(
        repo_root,
        &[
            "-c",
            "core.quotepath=false",
            "ls-tree",
            "-r",
            "--full-tree",
            "--name-only",
            commit,
        ],
    )?;
    Ok(output
        .lines()
        .filter_map(|s| s.strip_prefix(prefix.as_str()))
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect())
}

/// Zero-context unified diff of `commit` against the working tree for `paths`
/// (relative to `repo_root`). Headers always carry `a/` and `b/` prefixes and
/// top-level paths, whatever the user's diff config says.
pub fn diff_against_worktree(
    repo_root: &Path,
    commit: &str,
    paths: &[&str],
) -> Result<String, StagegateError> {
    let mut args = vec![
        "-c",
        "core.quotepath=false",
        "diff",
        "--no-color",
        "--no-ext-diff",
        "--no-renames",
        "--no-relative",
        "--src-prefix=a/",
        "--dst-prefix=b/",
        "--unified=0",
        commit,
        "--",
    ];
    args.extend_from_slice(paths);
    run_git_raw(repo_root, &args)
}
