//! Compact terminal rendering for gate results.
//!
//! Keeps output bounded: one line per check plus a preview of failures.

use crate::core::report::{AggregateStatus, CheckOutcome, CheckStatus, GateReport};
use colored::Colorize;

/// Collapse whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{preview}...")
    } else {
        preview
    }
}

/// Up to `max_items` messages joined with ` | `, then a `(+N more)` tail.
pub fn preview_messages(messages: &[String], max_items: usize, max_chars: usize) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let shown = messages
        .iter()
        .take(max_items)
        .map(|m| compact_line(m, max_chars))
        .collect::<Vec<_>>()
        .join(" | ");
    if messages.len() > max_items {
        format!("{} (+{} more)", shown, messages.len() - max_items)
    } else {
        shown
    }
}

fn status_tag(status: CheckStatus) -> String {
    match status {
        CheckStatus::Pass => "pass".green().bold().to_string(),
        CheckStatus::Fail => "FAIL".red().bold().to_string(),
        CheckStatus::Error => "ERROR".bright_red().bold().to_string(),
    }
}

pub fn render_check_line(check: &CheckOutcome) -> String {
    format!(
        "validate: gate {} [{}] {}",
        check.id,
        status_tag(check.status),
        compact_line(&check.diagnostic, 200)
    )
}

/// Text rendering used by `stagegate validate --format text`.
pub fn render_text(report: &GateReport) -> String {
    let mut lines = Vec::new();
    if let Some(reference) = &report.reference {
        lines.push(format!(
            "validate: reference {} ({})",
            reference.requested,
            &reference.commit[..reference.commit.len().min(12)]
        ));
    }
    if let Some(fatal) = &report.fatal {
        lines.push(format!("validate: {} {}", "aborted:".bright_red().bold(), fatal));
    }
    for check in &report.checks {
        lines.push(render_check_line(check));
        if !check.warnings.is_empty() {
            lines.push(format!(
                "validate:   warnings {}: {}",
                check.warnings.len(),
                preview_messages(&check.warnings, 2, 110)
            ));
        }
    }
    let status = match report.status {
        AggregateStatus::Pass => "pass".green().bold(),
        AggregateStatus::Fail => "fail".red().bold(),
        AggregateStatus::Error => "error".bright_red().bold(),
    };
    lines.push(format!(
        "validate: summary status={} pass={} fail={} error={} warn={}",
        status,
        report.summary.pass,
        report.summary.fail,
        report.summary.error,
        report.summary.warnings
    ));
    lines.join("\n")
}
