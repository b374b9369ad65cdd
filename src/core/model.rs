//! Per-run data model shared by the scanner, verdict engine, executor and report.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Health signals for one test file. Built fresh per run, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestFileHealth {
    pub path: PathBuf,
    pub loc: usize,
    /// Fraction of `loc` lines carrying a mocking construct, in `[0, 1]`.
    pub mock_density: f64,
    pub token_cost: u64,
    /// Commits touching the file inside the churn window.
    pub churn_rate: u32,
    pub unique_coverage: u64,
    pub is_critical: bool,
    pub tautology_detected: bool,
}

impl TestFileHealth {
    /// Zeroed record for a file that could not be read or analyzed.
    #[must_use]
    pub fn zeroed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            loc: 0,
            mock_density: 0.0,
            token_cost: 0,
            churn_rate: 0,
            unique_coverage: 0,
            is_critical: false,
            tautology_detected: false,
        }
    }
}

/// One kind of test-suite decay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RotTag {
    BrittleMocking,
    ContextBloat,
    Tautology,
    HighChurn,
    RedundantCoverage,
}

impl RotTag {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BrittleMocking => "BRITTLE_MOCKING",
            Self::ContextBloat => "CONTEXT_BLOAT",
            Self::Tautology => "TAUTOLOGY",
            Self::HighChurn => "HIGH_CHURN",
            Self::RedundantCoverage => "REDUNDANT_COVERAGE",
        }
    }

    /// Contribution of this tag to a verdict's score.
    #[must_use]
    pub const fn weight(self) -> u32 {
        match self {
            Self::BrittleMocking => 40,
            Self::ContextBloat | Self::RedundantCoverage => 30,
            Self::Tautology => 50,
            Self::HighChurn => 20,
        }
    }
}

impl fmt::Display for RotTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remediation chosen for a file. Mutually exclusive, priority ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    #[default]
    None,
    Delete,
    Quarantine,
    CompactSnapshots,
}

impl Action {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Delete => "DELETE",
            Self::Quarantine => "QUARANTINE",
            Self::CompactSnapshots => "COMPACT_SNAPSHOTS",
        }
    }

    /// DELETE and QUARANTINE count against the vibe-check cap.
    #[must_use]
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::Delete | Self::Quarantine)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the verdict engine for one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RotVerdict {
    pub path: PathBuf,
    pub score: u32,
    pub tags: BTreeSet<RotTag>,
    pub action: Action,
    pub rationale: String,
}

impl RotVerdict {
    /// Tags joined for display, `-` when empty.
    #[must_use]
    pub fn tags_label(&self) -> String {
        if self.tags.is_empty() {
            return "-".to_string();
        }
        self.tags
            .iter()
            .map(|tag| tag.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A dict/list literal located in a test file, evaluated to plain data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiteralCandidate {
    /// Byte offset of the literal's first character.
    pub start: usize,
    /// Byte offset one past the literal's last character.
    pub end: usize,
    /// 1-based line of `start`.
    pub line: usize,
    /// Identifier the literal is directly assigned to, if any.
    pub symbol: Option<String>,
    pub value: serde_json::Value,
}
