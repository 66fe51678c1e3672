//! Change extraction over unified diffs.
//!
//! Walks hunk headers and classifies each output line as added, removed or
//! context while tracking old/new line counters. Results depend only on text;
//! store semantics live elsewhere.

use crate::core::error::StagegateError;
use crate::core::git::{self, ResolvedRef};
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("hunk header regex")
});

/// Net-new 1-based line numbers of a file.
pub type AddedLines = BTreeSet<u64>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedLine {
    pub old_line: u64,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDiff {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub new_file: bool,
    pub deleted: bool,
    pub binary: bool,
    pub added: AddedLines,
    pub removed: Vec<RemovedLine>,
}

impl FileDiff {
    /// The path to cite in diagnostics: new side if present, else old side.
    pub fn display_path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or("<unknown>")
    }
}

#[derive(Debug)]
struct HunkLine {
    line: u64,
    content: String,
    no_newline: bool,
}

#[derive(Debug, Default)]
struct Hunk {
    removed: Vec<HunkLine>,
    added: Vec<HunkLine>,
}

impl Hunk {
    /// Fold the hunk into its file, dropping "newline added at EOF" pairs:
    /// `-x` + `\ No newline` followed by `+x` at the same position is not an edit.
    fn flush_into(mut self, file: &mut FileDiff) {
        let mut dropped_added = BTreeSet::new();
        self.removed.retain(|r| {
            if !r.no_newline {
                return true;
            }
            match self
                .added
                .iter()
                .find(|a| !a.no_newline && a.line == r.line && a.content == r.content)
            {
                Some(a) => {
                    dropped_added.insert(a.line);
                    false
                }
                None => true,
            }
        });
        for a in self.added {
            if !dropped_added.contains(&a.line) {
                file.added.insert(a.line);
            }
        }
        file.removed.extend(self.removed.into_iter().map(|r| RemovedLine {
            old_line: r.line,
            content: r.content,
        }));
    }
}

fn strip_side(raw: &str, prefix: &str) -> Option<String> {
    let raw = raw.trim_end_matches('\t');
    if raw == "/dev/null" {
        return None;
    }
    Some(raw.strip_prefix(prefix).unwrap_or(raw).to_string())
}

fn parse_count(m: Option<regex::Match<'_>>) -> Result<u64, StagegateError> {
    match m {
        None => Ok(1),
        Some(m) => m.as_str().parse().map_err(|_| StagegateError::MalformedStore {
            file: "<diff>".to_string(),
            message: format!("bad hunk count '{}'", m.as_str()),
        }),
    }
}

enum Cursor {
    Header,
    InHunk {
        old_line: u64,
        new_line: u64,
        old_left: u64,
        new_left: u64,
        hunk: Hunk,
    },
}

/// Parse `git diff` unified output into per-file added/removed line sets.
pub fn parse_unified_diff(text: &str) -> Result<Vec<FileDiff>, StagegateError> {
    let mut files: Vec<FileDiff> = Vec::new();
    let mut cursor = Cursor::Header;

    fn close(cursor: &mut Cursor, files: &mut [FileDiff]) {
        if let Cursor::InHunk { hunk, .. } = std::mem::replace(cursor, Cursor::Header) {
            if let Some(file) = files.last_mut() {
                hunk.flush_into(file);
            }
        }
    }

    for line in text.lines() {
        if line.starts_with("diff --git ") {
            close(&mut cursor, &mut files);
            files.push(FileDiff::default());
            continue;
        }

        if let Some(caps) = HUNK_HEADER.captures(line) {
            close(&mut cursor, &mut files);
            if files.is_empty() {
                files.push(FileDiff::default());
            }
            let old_start: u64 = caps[1].parse().unwrap_or(0);
            let new_start: u64 = caps[3].parse().unwrap_or(0);
            let old_count = parse_count(caps.get(2))?;
            let new_count = parse_count(caps.get(4))?;
            // A zero count means the start names the line *before* the change.
            let old_line = if old_count == 0 { old_start + 1 } else { old_start };
            let new_line = if new_count == 0 { new_start + 1 } else { new_start };
            cursor = Cursor::InHunk {
                old_line,
                new_line,
                old_left: old_count,
                new_left: new_count,
                hunk: Hunk::default(),
            };
            continue;
        }

        match &mut cursor {
            Cursor::Header => {
                let Some(file) = files.last_mut() else {
                    continue;
                };
                if line.starts_with("new file mode") {
                    file.new_file = true;
                } else if line.starts_with("deleted file mode") {
                    file.deleted = true;
                } else if let Some(rest) = line.strip_prefix("--- ") {
                    file.old_path = strip_side(rest, "a/");
                } else if let Some(rest) = line.strip_prefix("+++ ") {
                    file.new_path = strip_side(rest, "b/");
                } else if line.starts_with("Binary files ") {
                    file.binary = true;
                }
            }
            Cursor::InHunk {
                old_line,
                new_line,
                old_left,
                new_left,
                hunk,
            } => {
                if let Some(content) = line.strip_prefix('-') {
                    hunk.removed.push(HunkLine {
                        line: *old_line,
                        content: content.to_string(),
                        no_newline: false,
                    });
                    *old_line += 1;
                    *old_left = old_left.saturating_sub(1);
                } else if let Some(content) = line.strip_prefix('+') {
                    hunk.added.push(HunkLine {
                        line: *new_line,
                        content: content.to_string(),
                        no_newline: false,
                    });
                    *new_line += 1;
                    *new_left = new_left.saturating_sub(1);
                } else if line.starts_with('\\') {
                    // Marker applies to whichever side produced the previous line.
                    let last_removed = hunk.removed.last().map(|r| r.line + 1 == *old_line);
                    let last_added = hunk.added.last().map(|a| a.line + 1 == *new_line);
                    if *new_left == 0 && last_added == Some(true) && *old_left == 0 {
                        if let Some(a) = hunk.added.last_mut() {
                            a.no_newline = true;
                        }
                    } else if last_removed == Some(true) {
                        if let Some(r) = hunk.removed.last_mut() {
                            r.no_newline = true;
                        }
                    }
                } else if line.starts_with(' ') || line.is_empty() {
                    *old_line += 1;
                    *new_line += 1;
                    *old_left = old_left.saturating_sub(1);
                    *new_left = new_left.saturating_sub(1);
                } else {
                    // Anything else ends the hunk (next file's extended header).
                    close(&mut cursor, &mut files);
                }
            }
        }
    }
    close(&mut cursor, &mut files);
    Ok(files)
}

/// Line numbers of `rel_path` added since `reference`.
///
/// A file absent at the reference is entirely new; a file absent now has no
/// added lines (its removal is the append-only checker's concern).
pub fn added_lines(
    repo_root: &Path,
    reference: &ResolvedRef,
    rel_path: &str,
) -> Result<AddedLines, StagegateError> {
    let full = repo_root.join(rel_path);
    if !full.is_file() {
        return Ok(AddedLines::new());
    }
    if !git::exists_at(repo_root, &reference.commit, rel_path) {
        let content = fs::read_to_string(&full)?;
        return Ok((1..=content.lines().count() as u64).collect());
    }
    let files = worktree_changes(repo_root, &reference.commit, &[rel_path])?;
    if files.is_empty() {
        return Ok(AddedLines::new());
    }
    let matched: Vec<FileDiff> = files
        .into_iter()
        .filter(|f| f.new_path.as_deref() == Some(rel_path))
        .collect();
    if matched.is_empty() {
        return Err(StagegateError::GitError(format!(
            "diff for {rel_path} named no matching file"
        )));
    }
    Ok(matched.into_iter().flat_map(|f| f.added).collect())
}

/// Parsed diff of `commit` against the working tree, with paths rewritten
/// relative to `repo_root` even when it is a subdirectory of the work tree.
pub fn worktree_changes(
    repo_root: &Path,
    commit: &str,
    paths: &[&str],
) -> Result<Vec<FileDiff>, StagegateError> {
    let prefix = git::repo_prefix(repo_root)?;
    let text = git::diff_against_worktree(repo_root, commit, paths)?;
    let mut files = parse_unified_diff(&text)?;
    if !prefix.is_empty() {
        let relativize = |p: &mut Option<String>| {
            if let Some(rest) = p.as_deref().and_then(|s| s.strip_prefix(prefix.as_str())) {
                *p = Some(rest.to_string());
            }
        };
        for f in &mut files {
            relativize(&mut f.old_path);
            relativize(&mut f.new_path);
        }
    }
    Ok(files)
}
