//! Named text patterns evaluated uniformly.
//!
//! New prohibited phrasing is a new table row, not a new code path.

use regex::Regex;
use std::sync::LazyLock;

pub struct NamedPattern {
    pub rule_id: &'static str,
    pub regex: Regex,
}

fn compile(table: &[(&'static str, &'static str)]) -> Vec<NamedPattern> {
    table
        .iter()
        .map(|(rule_id, pattern)| NamedPattern {
            rule_id,
            regex: Regex::new(pattern).expect("pattern table entry must compile"),
        })
        .collect()
}

const CAUSAL_TABLE: &[(&str, &str)] = &[
    ("artifact.causal.causes", r"(?i)\bcaus(e|es|ed|ing)\b"),
    ("artifact.causal.drives", r"(?i)\b(drive|drives|drove|driven|driving)\b"),
    ("artifact.causal.leads_to", r"(?i)\b(lead|leads|led|leading) to\b"),
    ("artifact.causal.results_in", r"(?i)\bresult(s|ed|ing)? in\b"),
    ("artifact.causal.due_to", r"(?i)\b(due to|because of)\b"),
    ("artifact.causal.attributable", r"(?i)\battributable to\b"),
    (
        "artifact.causal.lift",
        r"(?i)\b(boost|boosts|boosted|increase|increases|increased) (sales|conversions?|revenue|retention)\b",
    ),
];

const PROHIBITED_IMPLICATION_TABLE: &[(&str, &str)] = &[
    ("artifact.prohibited.guarantee", r"(?i)\bguarantee(s|d)?\b"),
    ("artifact.prohibited.cure", r"(?i)\b(cure|cures|cured|heals?)\b"),
    ("artifact.prohibited.clinical", r"(?i)\bclinically (proven|tested)\b"),
    ("artifact.prohibited.risk_free", r"(?i)\b(risk[- ]free|no side effects)\b"),
    ("artifact.prohibited.vet_endorsed", r"(?i)\b(vet|veterinarian)[- ](approved|recommended|endorsed)\b"),
];

pub static CAUSAL_PATTERNS: LazyLock<Vec<NamedPattern>> = LazyLock::new(|| compile(CAUSAL_TABLE));

pub static PROHIBITED_IMPLICATION_PATTERNS: LazyLock<Vec<NamedPattern>> =
    LazyLock::new(|| compile(PROHIBITED_IMPLICATION_TABLE));

/// Rule ids of every pattern in `table` that matches `text`.
pub fn matching_rules(table: &[NamedPattern], text: &str) -> Vec<&'static str> {
    table
        .iter()
        .filter(|p| p.regex.is_match(text))
        .map(|p| p.rule_id)
        .collect()
}
