//! Verdict engine: rot tags plus one prioritized action per test file.
//!
//! Pure function of the health record and thresholds. Tag derivation is
//! independent per tag; action resolution is first-match-wins:
//! DELETE, then QUARANTINE, then COMPACT_SNAPSHOTS, then NONE. Critical files
//! never receive DELETE or QUARANTINE.

#![allow(missing_docs)]

use std::collections::BTreeSet;

use crate::core::config::Config;
use crate::core::model::{Action, RotTag, RotVerdict, TestFileHealth};

/// Highest score a verdict can carry.
pub const MAX_SCORE: u32 = 100;

/// Thresholds the engine compares health signals against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerdictThresholds {
    pub max_mock_density: f64,
    pub max_token_context: u64,
    pub churn_threshold_commits: u32,
}

impl VerdictThresholds {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_mock_density: config.max_mock_density,
            max_token_context: config.max_token_context,
            churn_threshold_commits: config.churn_threshold_commits,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VerdictEngine {
    thresholds: VerdictThresholds,
}

impl VerdictEngine {
    #[must_use]
    pub fn new(thresholds: VerdictThresholds) -> Self {
        Self { thresholds }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(VerdictThresholds::from_config(config))
    }

    /// Resolve tags, action, score and rationale for one file.
    #[must_use]
    pub fn evaluate(&self, health: &TestFileHealth) -> RotVerdict {
        if let Some(reason) = malformed_reason(health) {
            return RotVerdict {
                path: health.path.clone(),
                score: 0,
                tags: BTreeSet::new(),
                action: Action::None,
                rationale: format!("health record rejected: {reason}"),
            };
        }

        let tags = self.derive_tags(health);
        let action = resolve_action(&tags, health);
        RotVerdict {
            path: health.path.clone(),
            score: score(&tags),
            rationale: self.rationale(&tags, action, health),
            tags,
            action,
        }
    }

    /// Evaluate every record, preserving input order.
    #[must_use]
    pub fn evaluate_batch(&self, records: &[TestFileHealth]) -> Vec<RotVerdict> {
        records.iter().map(|health| self.evaluate(health)).collect()
    }

    fn derive_tags(&self, health: &TestFileHealth) -> BTreeSet<RotTag> {
        let t = &self.thresholds;
        let mut tags = BTreeSet::new();
        if health.mock_density > t.max_mock_density {
            tags.insert(RotTag::BrittleMocking);
        }
        if health.token_cost > t.max_token_context {
            tags.insert(RotTag::ContextBloat);
        }
        if health.tautology_detected {
            tags.insert(RotTag::Tautology);
        }
        if health.churn_rate > t.churn_threshold_commits {
            tags.insert(RotTag::HighChurn);
        }
        if health.unique_coverage == 0 && !health.is_critical {
            tags.insert(RotTag::RedundantCoverage);
        }
        tags
    }

    fn rationale(&self, tags: &BTreeSet<RotTag>, action: Action, health: &TestFileHealth) -> String {
        let t = &self.thresholds;
        let mut parts: Vec<String> = tags
            .iter()
            .map(|tag| match tag {
                RotTag::BrittleMocking => format!(
                    "mock density {:.2} > {:.2}",
                    health.mock_density, t.max_mock_density
                ),
                RotTag::ContextBloat => {
                    format!("token cost {} > {}", health.token_cost, t.max_token_context)
                }
                RotTag::Tautology => "tautological assertion".to_string(),
                RotTag::HighChurn => format!(
                    "{} commits > {}",
                    health.churn_rate, t.churn_threshold_commits
                ),
                RotTag::RedundantCoverage => "no unique coverage".to_string(),
            })
            .collect();

        if health.is_critical && destructive_candidate(tags, health) {
            parts.push("critical path, destructive action suppressed".to_string());
        } else if action == Action::None && tags.contains(&RotTag::BrittleMocking) {
            parts.push(format!("kept: {} unique lines", health.unique_coverage));
        }

        if parts.is_empty() {
            return "healthy".to_string();
        }
        parts.join("; ")
    }
}

fn resolve_action(tags: &BTreeSet<RotTag>, health: &TestFileHealth) -> Action {
    let critical = health.is_critical;
    let delete = !critical
        && health.unique_coverage == 0
        && (tags.contains(&RotTag::BrittleMocking) || tags.contains(&RotTag::Tautology));
    if delete {
        return Action::Delete;
    }

    if !critical && tags.contains(&RotTag::HighChurn) && tags.len() >= 2 {
        return Action::Quarantine;
    }

    if tags.contains(&RotTag::ContextBloat) {
        return Action::CompactSnapshots;
    }

    Action::None
}

/// Whether DELETE or QUARANTINE would have applied without critical immunity.
fn destructive_candidate(tags: &BTreeSet<RotTag>, health: &TestFileHealth) -> bool {
    let relaxed = TestFileHealth {
        is_critical: false,
        ..health.clone()
    };
    let mut tags = tags.clone();
    if relaxed.unique_coverage == 0 {
        tags.insert(RotTag::RedundantCoverage);
    }
    resolve_action(&tags, &relaxed).is_destructive()
}

fn score(tags: &BTreeSet<RotTag>) -> u32 {
    tags.iter().map(|tag| tag.weight()).sum::<u32>().min(MAX_SCORE)
}

fn malformed_reason(health: &TestFileHealth) -> Option<String> {
    if !health.mock_density.is_finite() {
        return Some(format!("mock density {} is not finite", health.mock_density));
    }
    if !(0.0..=1.0).contains(&health.mock_density) {
        return Some(format!("mock density {} outside [0, 1]", health.mock_density));
    }
    None
}
