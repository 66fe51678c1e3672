//! Record store readers.
//!
//! Each tabular store is a CSV file whose rows are parsed into typed records
//! at the boundary. Every row remembers its 1-based file line (the number the
//! change extractor and all diagnostics cite) and its append index.

use crate::core::config::StorePaths;
use crate::core::diff::AddedLines;
use crate::core::error::StagegateError;
use crate::core::records::{
    BudgetEnvelopeRecord, ChangeRequestRecord, DecisionRecord, HandoffRecord, ReleaseGateRecord,
    RunRecord, TeamRecord,
};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct Row<T> {
    /// 1-based line in the file (the header is line 1).
    pub line: u64,
    /// 0-based position in append order.
    pub index: usize,
    pub record: T,
}

#[derive(Debug, Clone)]
pub struct Rows<T> {
    /// Path relative to the repo root, as cited in diagnostics.
    pub path: String,
    pub rows: Vec<Row<T>>,
}

impl<T> Rows<T> {
    pub fn empty(path: &str) -> Self {
        Self {
            path: path.to_string(),
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Row<T>> {
        self.rows.iter()
    }

    pub fn records(&self) -> impl Iterator<Item = &T> {
        self.rows.iter().map(|r| &r.record)
    }

    /// Rows whose line was added since the reference point.
    pub fn added_since<'a>(&'a self, added: &'a AddedLines) -> impl Iterator<Item = &'a Row<T>> {
        self.rows.iter().filter(move |r| added.contains(&r.line))
    }

    pub fn last(&self) -> Option<&Row<T>> {
        self.rows.last()
    }
}

/// Parse CSV text into typed rows.
pub fn parse_csv_rows<T: DeserializeOwned>(path: &str, text: &str) -> Result<Rows<T>, StagegateError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let record = result.map_err(|e| StagegateError::MalformedStore {
            file: path.to_string(),
            message: e.to_string(),
        })?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let typed: T = record
            .deserialize(Some(&headers))
            .map_err(|e| StagegateError::MalformedStore {
                file: path.to_string(),
                message: format!("line {line}: {e}"),
            })?;
        rows.push(Row {
            line,
            index,
            record: typed,
        });
    }
    Ok(Rows {
        path: path.to_string(),
        rows,
    })
}

/// Read-only view over the team-ops stores of one repository.
#[derive(Debug, Clone)]
pub struct RecordStore {
    pub root: PathBuf,
    pub paths: StorePaths,
}

impl RecordStore {
    pub fn new(root: &Path, paths: &StorePaths) -> Self {
        Self {
            root: root.to_path_buf(),
            paths: paths.clone(),
        }
    }

    fn read_required<T: DeserializeOwned>(&self, rel: &str) -> Result<Rows<T>, StagegateError> {
        let full = self.root.join(rel);
        if !full.is_file() {
            return Err(StagegateError::MissingStore(rel.to_string()));
        }
        let text = fs::read_to_string(&full)?;
        let rows = parse_csv_rows(rel, &text)?;
        tracing::debug!(store = rel, rows = rows.len(), "store loaded");
        Ok(rows)
    }

    pub fn runs(&self) -> Result<Rows<RunRecord>, StagegateError> {
        self.read_required(&self.paths.run_registry)
    }

    pub fn handoffs(&self) -> Result<Rows<HandoffRecord>, StagegateError> {
        self.read_required(&self.paths.handoff_log)
    }

    pub fn change_requests(&self) -> Result<Rows<ChangeRequestRecord>, StagegateError> {
        self.read_required(&self.paths.change_request_queue)
    }

    pub fn teams(&self) -> Result<Rows<TeamRecord>, StagegateError> {
        self.read_required(&self.paths.team_registry)
    }

    pub fn budget_envelopes(&self) -> Result<Rows<BudgetEnvelopeRecord>, StagegateError> {
        self.read_required(&self.paths.budget_envelopes)
    }

    pub fn release_gates(&self) -> Result<Rows<ReleaseGateRecord>, StagegateError> {
        self.read_required(&self.paths.release_gates)
    }

    /// The decision log is optional: without it no tolerance applies.
    pub fn decisions(&self) -> Result<Rows<DecisionRecord>, StagegateError> {
        let rel = &self.paths.decision_log;
        if !self.root.join(rel).is_file() {
            return Ok(Rows::empty(rel));
        }
        self.read_required(rel)
    }

    /// Review artifact files (relative paths, sorted).
    pub fn artifact_paths(&self) -> Result<Vec<String>, StagegateError> {
        let pattern = self.root.join(&self.paths.review_artifacts);
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern).map_err(|e| {
            StagegateError::ConfigError(format!(
                "invalid review_artifacts glob '{}': {e}",
                self.paths.review_artifacts
            ))
        })?;
        let mut out = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StagegateError::IoError(e.into()))?;
            if path.is_file() {
                out.push(self.relative(&path));
            }
        }
        out.sort();
        Ok(out)
    }

    /// Every tabular store path, for fingerprinting and change extraction.
    pub fn tabular_paths(&self) -> [&str; 7] {
        [
            self.paths.run_registry.as_str(),
            self.paths.handoff_log.as_str(),
            self.paths.change_request_queue.as_str(),
            self.paths.team_registry.as_str(),
            self.paths.decision_log.as_str(),
            self.paths.budget_envelopes.as_str(),
            self.paths.release_gates.as_str(),
        ]
    }

    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// SHA-256 of a store file, `None` when it does not exist.
    pub fn fingerprint(&self, rel: &str) -> Option<String> {
        let bytes = fs::read(self.root.join(rel)).ok()?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Some(format!("{:x}", hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const HANDOFFS: &str = "entry_id,run_id,timestamp_utc,from_team,to_team,blocking_flags
H-1,R1,2026-02-10T08:00:00Z,blue,red,
H-2, R1 ,2026-02-10T09:00:00Z,red,white,\"[\"\"needs_legal\"\"]\"

H-3,R2,2026-02-10T10:00:00Z,blue,red
";

    #[test]
    fn rows_keep_file_lines_and_append_index() {
        let rows: Rows<HandoffRecord> = parse_csv_rows("handoff_log.csv", HANDOFFS).unwrap();
        assert_eq!(rows.len(), 3);
        let lines: Vec<u64> = rows.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![2, 3, 5]);
        let indexes: Vec<usize> = rows.iter().map(|r| r.index).collect();
        assert_eq!(indexes[0], 0);
        assert_eq!(rows.rows[1].record.run_id, "R1");
        assert_eq!(rows.rows[1].record.blocking_flags, "[\"needs_legal\"]");
        // Short row: missing trailing column reads as empty.
        assert_eq!(rows.rows[2].record.blocking_flags, "");
        assert_eq!(rows.rows[2].record.supersedes_entry_id, "");
    }

    #[test]
    fn added_since_filters_by_line() {
        let rows: Rows<HandoffRecord> = parse_csv_rows("handoff_log.csv", HANDOFFS).unwrap();
        let added: AddedLines = [3, 5].into_iter().collect();
        let ids: Vec<&str> = rows
            .added_since(&added)
            .map(|r| r.record.entry_id.as_str())
            .collect();
        assert_eq!(ids, vec!["H-2", "H-3"]);
    }

    #[test]
    fn missing_required_store_is_structural() {
        let tmp = tempdir().unwrap();
        let store = RecordStore::new(tmp.path(), &StorePaths::default());
        let err = store.runs().unwrap_err();
        assert!(matches!(err, StagegateError::MissingStore(_)));
        assert!(err.is_structural());
        // Decision log is optional.
        assert!(store.decisions().unwrap().is_empty());
    }

    #[test]
    fn artifact_paths_are_relative_and_sorted() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("data/review_artifacts/run-1");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("b.json"), "{}").unwrap();
        fs::write(dir.join("a.json"), "{}").unwrap();
        fs::write(dir.join("notes.txt"), "x").unwrap();
        let store = RecordStore::new(tmp.path(), &StorePaths::default());
        let paths = store.artifact_paths().unwrap();
        assert_eq!(
            paths,
            vec![
                "data/review_artifacts/run-1/a.json".to_string(),
                "data/review_artifacts/run-1/b.json".to_string()
            ]
        );
        assert!(store.fingerprint(&paths[0]).is_some());
        assert!(store.fingerprint("nope.csv").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_artifact_directory_is_an_io_error() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempdir().unwrap();
        let locked = tmp.path().join("data/review_artifacts/locked");
        fs::create_dir_all(&locked).unwrap();
        fs::write(locked.join("a.json"), "{}").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        // Privileged users read through the mode bits; nothing to assert then.
        let readable = fs::read_dir(&locked).is_ok();
        let store = RecordStore::new(tmp.path(), &StorePaths::default());
        let result = store.artifact_paths();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        if !readable {
            assert!(matches!(result, Err(StagegateError::IoError(_))));
        }
    }
}
