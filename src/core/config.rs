//! Gate configuration loaded from `.stagegate/config.toml`.
//!
//! Every field has a default so a repository with no config file validates
//! against the stock store layout. Optional phases per run mode live here (and
//! in the team registry), never in code.

use crate::core::error::StagegateError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_PATH: &str = ".stagegate/config.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GateConfig {
    /// Reference point used when `--base` is not given.
    pub reference: String,
    pub stores: StorePaths,
    pub append_only: AppendOnlyConfig,
    pub pipeline: PipelineConfig,
    pub artifacts: ArtifactConfig,
    pub report: ReportConfig,
    /// Governing rule document per check id.
    pub rules: BTreeMap<String, String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        let rules = [
            ("append_only", "docs/governance/APPEND_ONLY_POLICY.md"),
            ("pipeline_order", "docs/governance/PIPELINE_ORDER.md"),
            ("budget_release", "docs/governance/BUDGET_AND_RELEASE_GATES.md"),
            ("review_artifacts", "docs/governance/CLAIM_SAFETY_CONTRACT.md"),
            ("request_ids", "docs/governance/CHANGE_REQUEST_LINEAGE.md"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self {
            reference: "HEAD".to_string(),
            stores: StorePaths::default(),
            append_only: AppendOnlyConfig::default(),
            pipeline: PipelineConfig::default(),
            artifacts: ArtifactConfig::default(),
            report: ReportConfig::default(),
            rules,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorePaths {
    pub run_registry: String,
    pub handoff_log: String,
    pub change_request_queue: String,
    pub team_registry: String,
    pub decision_log: String,
    pub budget_envelopes: String,
    pub release_gates: String,
    /// Glob, relative to the repo root.
    pub review_artifacts: String,
}

impl Default for StorePaths {
    fn default() -> Self {
        Self {
            run_registry: "data/team_ops/run_registry.csv".to_string(),
            handoff_log: "data/team_ops/handoff_log.csv".to_string(),
            change_request_queue: "data/team_ops/change_request_queue.csv".to_string(),
            team_registry: "data/team_ops/team_registry.csv".to_string(),
            decision_log: "data/team_ops/decision_log.csv".to_string(),
            budget_envelopes: "data/team_ops/budget_envelopes.csv".to_string(),
            release_gates: "data/team_ops/release_gate_log.csv".to_string(),
            review_artifacts: "data/review_artifacts/**/*.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppendOnlyConfig {
    pub globs: Vec<String>,
    /// Offending lines listed in a diagnostic before it is truncated.
    pub preview_limit: usize,
}

impl Default for AppendOnlyConfig {
    fn default() -> Self {
        Self {
            globs: vec![
                "data/team_ops/*.csv".to_string(),
                "data/review_artifacts/**/*.json".to_string(),
            ],
            preview_limit: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub default_mode: String,
    pub tolerance_decision_code: String,
    /// Mode name -> teams whose phase may be skipped in that mode.
    pub optional_phases: BTreeMap<String, Vec<String>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_mode: "full".to_string(),
            tolerance_decision_code: "pipeline_order_violation".to_string(),
            optional_phases: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub high_impact_spend_usd: f64,
    pub high_impact_reach: u64,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            high_impact_spend_usd: 1000.0,
            high_impact_reach: 50_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportConfig {
    pub path: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            path: ".stagegate/report.json".to_string(),
        }
    }
}

impl GateConfig {
    pub fn rule_ref(&self, check_id: &str) -> String {
        self.rules.get(check_id).cloned().unwrap_or_default()
    }

    fn sanity_check(&self) -> Result<(), StagegateError> {
        if self.append_only.globs.is_empty() {
            return Err(StagegateError::ConfigError(
                "append_only.globs cannot be empty".to_string(),
            ));
        }
        for pattern in &self.append_only.globs {
            glob::Pattern::new(pattern).map_err(|e| {
                StagegateError::ConfigError(format!("invalid append_only glob '{pattern}': {e}"))
            })?;
        }
        if self.artifacts.high_impact_spend_usd <= 0.0 {
            return Err(StagegateError::ConfigError(
                "artifacts.high_impact_spend_usd must be > 0".to_string(),
            ));
        }
        if self.pipeline.tolerance_decision_code.trim().is_empty() {
            return Err(StagegateError::ConfigError(
                "pipeline.tolerance_decision_code cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn default_config_path(repo_root: &Path) -> PathBuf {
    repo_root.join(CONFIG_PATH)
}

/// Load the gate config. A missing file at the default location means defaults;
/// an explicitly requested file that is missing is an error.
pub fn load_config(repo_root: &Path, explicit: Option<&Path>) -> Result<GateConfig, StagegateError> {
    let path = match explicit {
        Some(p) => {
            if !p.exists() {
                return Err(StagegateError::ConfigError(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            p.to_path_buf()
        }
        None => default_config_path(repo_root),
    };

    if !path.exists() {
        tracing::debug!(path = %path.display(), "no gate config; using defaults");
        return Ok(GateConfig::default());
    }

    let content = fs::read_to_string(&path)?;
    let config: GateConfig = toml::from_str(&content)?;
    config.sanity_check()?;
    Ok(config)
}
