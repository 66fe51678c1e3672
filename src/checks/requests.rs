//! Change-request identifier lifecycle.
//!
//! Identifiers are globally unique with one auditable exception: an id may
//! reappear when its latest occurrence is closed and carries a supersession
//! reference. The whole queue history is judged, not only new rows.

use crate::checks::pipeline::PhaseRegistry;
use crate::core::config::GateConfig;
use crate::core::error::StagegateError;
use crate::core::records::{ChangeRequestRecord, RequestStatus};
use crate::core::report::{CheckId, CheckOutcome, Violation};
use crate::core::store::{RecordStore, Row, Rows};
use crate::core::time::parse_utc;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

pub const RULE_ID_FORMAT: &str = "request.id_format";
pub const RULE_UNKNOWN_TEAM: &str = "request.unknown_team";
pub const RULE_SUPERSEDES_UNKNOWN: &str = "request.supersedes_unknown";
pub const RULE_DUPLICATE_UNRESOLVED: &str = "request.duplicate_unresolved";

static CANONICAL_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^CR-([A-Z][A-Z0-9_]*)-([0-9]+)$").expect("valid regex"));
static LEGACY_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^CR-([0-9]+)-([A-Z][A-Z0-9_]*)$").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdShape<'a> {
    /// `CR-<TEAM>-<NNNN>`
    Canonical { team: &'a str },
    /// `CR-<NNNN>-<TEAM>`, accepted only while a later row supersedes it.
    Legacy,
    Invalid,
}

pub fn id_shape(request_id: &str) -> IdShape<'_> {
    if let Some(caps) = CANONICAL_ID.captures(request_id) {
        if let Some(team) = caps.get(1) {
            return IdShape::Canonical {
                team: team.as_str(),
            };
        }
    }
    if LEGACY_ID.is_match(request_id) {
        return IdShape::Legacy;
    }
    IdShape::Invalid
}

#[derive(Debug, Default)]
pub struct RequestVerdict {
    pub violations: Vec<Violation>,
    pub duplicate_groups: usize,
    pub resolved_by_supersession: usize,
    pub legacy_ids: usize,
}

fn recency_key(row: &Row<ChangeRequestRecord>) -> (Option<chrono::DateTime<chrono::Utc>>, usize) {
    (parse_utc(&row.record.created_utc), row.index)
}

/// Judge every row of the change-request queue.
pub fn validate_requests(
    rows: &Rows<ChangeRequestRecord>,
    registry: Option<&PhaseRegistry>,
) -> RequestVerdict {
    let mut verdict = RequestVerdict::default();
    let path = rows.path.as_str();

    let mut groups: BTreeMap<&str, Vec<&Row<ChangeRequestRecord>>> = BTreeMap::new();
    for row in rows.iter() {
        groups.entry(row.record.request_id.trim()).or_default().push(row);
    }
    let superseded_later = |id: &str, after: usize| {
        rows.iter().any(|r| {
            r.index > after && r.record.supersedes_request_id.trim() == id
        })
    };

    let mut seen_prior: BTreeSet<&str> = BTreeSet::new();
    for row in rows.iter() {
        let id = row.record.request_id.trim();
        match id_shape(id) {
            IdShape::Canonical { team } => {
                if let Some(registry) = registry {
                    if registry.phase_of(team).is_none() {
                        verdict.violations.push(
                            Violation::new(
                                RULE_UNKNOWN_TEAM,
                                format!("{id} names team {team}, which is not registered"),
                            )
                            .at(path, Some(row.line))
                            .field("request_id", id),
                        );
                    }
                }
            }
            IdShape::Legacy => {
                verdict.legacy_ids += 1;
                if !superseded_later(id, row.index) {
                    verdict.violations.push(
                        Violation::new(
                            RULE_ID_FORMAT,
                            format!("legacy id {id} has no later row superseding it; expected CR-<TEAM>-<NNNN>"),
                        )
                        .at(path, Some(row.line))
                        .field("request_id", id),
                    );
                }
            }
            IdShape::Invalid => verdict.violations.push(
                Violation::new(
                    RULE_ID_FORMAT,
                    format!("request id '{id}' does not match CR-<TEAM>-<NNNN>"),
                )
                .at(path, Some(row.line))
                .field("request_id", id),
            ),
        }

        let supersedes = row.record.supersedes_request_id.trim();
        if !supersedes.is_empty() {
            let is_duplicate = groups.get(id).is_some_and(|g| g.len() > 1);
            let legal = if supersedes == id {
                is_duplicate
            } else {
                seen_prior.contains(supersedes)
            };
            if !legal {
                let message = if supersedes == id {
                    format!("{id} supersedes itself but has no duplicate lineage")
                } else {
                    format!("supersedes_request_id '{supersedes}' does not reference a prior request_id")
                };
                verdict.violations.push(
                    Violation::new(RULE_SUPERSEDES_UNKNOWN, message)
                        .at(path, Some(row.line))
                        .field("supersedes_request_id", supersedes),
                );
            }
        }
        if !id.is_empty() {
            seen_prior.insert(id);
        }
    }

    for (id, group) in &groups {
        if id.is_empty() || group.len() < 2 {
            continue;
        }
        verdict.duplicate_groups += 1;
        let Some(latest) = group.iter().max_by_key(|r| recency_key(r)) else {
            continue;
        };
        let status = RequestStatus::classify(&latest.record.status);
        let supersedes = latest.record.supersedes_request_id.trim();
        if status == RequestStatus::Closed && !supersedes.is_empty() {
            verdict.resolved_by_supersession += 1;
            continue;
        }
        let lines = group
            .iter()
            .map(|r| r.line.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let reason = match (status, supersedes.is_empty()) {
            (RequestStatus::Closed, _) => "is closed but names no supersession target".to_string(),
            (_, true) => format!(
                "is '{}' and names no supersession target",
                latest.record.status.trim()
            ),
            (_, false) => format!("is '{}', not closed", latest.record.status.trim()),
        };
        verdict.violations.push(
            Violation::new(
                RULE_DUPLICATE_UNRESOLVED,
                format!(
                    "{id} appears on {} rows (lines {lines}); latest occurrence {reason}",
                    group.len()
                ),
            )
            .at(path, Some(latest.line))
            .field("status", latest.record.status.trim()),
        );
    }
    verdict
}

pub fn check_request_ids(
    store: &RecordStore,
    registry: Option<&PhaseRegistry>,
    config: &GateConfig,
) -> Result<CheckOutcome, StagegateError> {
    let rows = store.change_requests()?;
    let verdict = validate_requests(&rows, registry);
    tracing::debug!(
        rows = rows.len(),
        duplicates = verdict.duplicate_groups,
        resolved = verdict.resolved_by_supersession,
        "request ids validated"
    );

    let mut outcome = CheckOutcome::new(CheckId::RequestIds);
    outcome.metric("rows", rows.len());
    outcome.metric("duplicate_groups", verdict.duplicate_groups);
    outcome.metric("resolved_by_supersession", verdict.resolved_by_supersession);
    outcome.metric("legacy_ids", verdict.legacy_ids);
    if registry.is_none() {
        outcome
            .observations
            .push("team registry unavailable; request id teams not verified".to_string());
    }
    outcome.violations = verdict.violations;
    Ok(outcome.finish(
        &format!(
            "{} request row(s); {} duplicate group(s), all resolved by supersession",
            rows.len(),
            verdict.duplicate_groups
        ),
        config.append_only.preview_limit,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::parse_csv_rows;

    const HEADER: &str =
        "request_id,run_id,source_team,status,created_utc,statement,supersedes_request_id\n";

    fn queue(body: &str) -> Rows<ChangeRequestRecord> {
        parse_csv_rows("change_request_queue.csv", &format!("{HEADER}{body}")).unwrap()
    }

    fn rules(verdict: &RequestVerdict) -> Vec<&str> {
        verdict.violations.iter().map(|v| v.rule_id.as_str()).collect()
    }

    #[test]
    fn id_shapes() {
        assert_eq!(id_shape("CR-RED-0001"), IdShape::Canonical { team: "RED" });
        assert_eq!(id_shape("CR-QA_FIXER-12"), IdShape::Canonical { team: "QA_FIXER" });
        assert_eq!(id_shape("CR-0001-RED"), IdShape::Legacy);
        assert_eq!(id_shape("cr-red-0001"), IdShape::Invalid);
        assert_eq!(id_shape("CR-RED"), IdShape::Invalid);
    }

    #[test]
    fn unique_ids_pass() {
        let rows = queue(
            "CR-RED-0001,R1,red,open,2026-02-10T08:00:00Z,Tighten claim,\n\
             CR-BLUE-0001,R1,blue,closed,2026-02-10T09:00:00Z,Fix link,\n",
        );
        let verdict = validate_requests(&rows, None);
        assert!(verdict.violations.is_empty());
        assert_eq!(verdict.duplicate_groups, 0);
    }

    #[test]
    fn closed_superseding_duplicate_is_resolved() {
        let rows = queue(
            "CR-RED-0001,R1,red,open,2026-02-10T08:00:00Z,Tighten claim,\n\
             CR-RED-0001,R1,red,closed,2026-02-11T08:00:00Z,Renumbered,CR-RED-0001\n",
        );
        let verdict = validate_requests(&rows, None);
        assert!(verdict.violations.is_empty(), "{:?}", verdict.violations);
        assert_eq!(verdict.duplicate_groups, 1);
        assert_eq!(verdict.resolved_by_supersession, 1);
    }

    #[test]
    fn open_latest_duplicate_is_unresolved() {
        let rows = queue(
            "CR-RED-0001,R1,red,closed,2026-02-10T08:00:00Z,Tighten claim,\n\
             CR-RED-0001,R1,red,open,2026-02-11T08:00:00Z,Again,CR-RED-0001\n",
        );
        let verdict = validate_requests(&rows, None);
        assert_eq!(rules(&verdict), vec![RULE_DUPLICATE_UNRESOLVED]);
        assert_eq!(verdict.violations[0].line, Some(3));
        assert!(verdict.violations[0].message.contains("lines 2,3"));
        assert_eq!(verdict.resolved_by_supersession, 0);
    }

    #[test]
    fn latest_is_chosen_by_timestamp_then_append_order() {
        // Appended later but created earlier: the first row is the latest.
        let rows = queue(
            "CR-RED-0002,R1,red,closed,2026-02-12T08:00:00Z,Done,CR-RED-0002\n\
             CR-RED-0002,R1,red,open,2026-02-09T08:00:00Z,Backfill,\n",
        );
        let verdict = validate_requests(&rows, None);
        assert!(verdict.violations.is_empty(), "{:?}", verdict.violations);
    }

    #[test]
    fn unrecognized_status_never_counts_as_closed() {
        let rows = queue(
            "CR-RED-0003,R1,red,open,2026-02-10T08:00:00Z,a,\n\
             CR-RED-0003,R1,red,shipped-ish,2026-02-11T08:00:00Z,b,CR-RED-0003\n",
        );
        assert_eq!(rules(&validate_requests(&rows, None)), vec![RULE_DUPLICATE_UNRESOLVED]);
    }

    #[test]
    fn legacy_ids_need_a_later_canonical_row() {
        let migrated = queue(
            "CR-0004-RED,R1,red,open,2026-02-10T08:00:00Z,a,\n\
             CR-RED-0004,R1,red,open,2026-02-11T08:00:00Z,migrated,CR-0004-RED\n",
        );
        let verdict = validate_requests(&migrated, None);
        assert!(verdict.violations.is_empty(), "{:?}", verdict.violations);
        assert_eq!(verdict.legacy_ids, 1);

        let stranded = queue("CR-0005-RED,R1,red,open,2026-02-10T08:00:00Z,a,\n");
        assert_eq!(rules(&validate_requests(&stranded, None)), vec![RULE_ID_FORMAT]);
    }

    #[test]
    fn supersession_must_point_backwards() {
        let rows = queue(
            "CR-RED-0006,R1,red,open,2026-02-10T08:00:00Z,a,CR-RED-0099\n\
             CR-RED-0007,R1,red,open,2026-02-10T08:00:00Z,b,CR-RED-0007\n",
        );
        let verdict = validate_requests(&rows, None);
        assert_eq!(rules(&verdict), vec![RULE_SUPERSEDES_UNKNOWN, RULE_SUPERSEDES_UNKNOWN]);
        assert!(verdict.violations[1].message.contains("supersedes itself"));
    }

    #[test]
    fn registered_team_is_required_when_registry_known() {
        let teams = parse_csv_rows(
            "team_registry.csv",
            "team_id,phase_order,optional_in_modes\nblue,1,\nred,2,\n",
        )
        .unwrap();
        let registry = PhaseRegistry::load(&teams, &BTreeMap::new()).unwrap();
        let rows = queue("CR-PURPLE-0001,R1,purple,open,2026-02-10T08:00:00Z,a,\n");
        assert_eq!(
            rules(&validate_requests(&rows, Some(&registry))),
            vec![RULE_UNKNOWN_TEAM]
        );
        assert!(validate_requests(&rows, None).violations.is_empty());
    }
}
