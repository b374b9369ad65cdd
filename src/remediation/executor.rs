//! Remediation executor: applies DELETE, QUARANTINE and COMPACT_SNAPSHOTS.
//!
//! Pipeline: verdicts -> plan (actionable only, path order) -> per-file apply
//! -> log result -> next file. A failure on one file is recorded and never
//! stops the batch. Cancellation is checked between files.

#![allow(missing_docs)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tree_sitter::Parser;

use crate::core::config::Config;
use crate::core::errors::{EntropyError, Result};
use crate::core::model::{Action, RotVerdict};
use crate::core::paths::display_relative;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::remediation::rewrite;
use crate::scanner::health::HealthScanner;
use crate::scanner::python::new_parser;

/// Marker that keeps the quarantine directory an importable package.
const PACKAGE_MARKER: &str = "__init__.py";

// ──────────────────── configuration ────────────────────

#[derive(Debug, Clone)]
pub struct RemediationConfig {
    pub root: PathBuf,
    pub quarantine_dir: PathBuf,
    pub fixtures_dir: PathBuf,
    pub large_literal_threshold: usize,
}

impl RemediationConfig {
    /// Resolve configured directories against the project root.
    #[must_use]
    pub fn from_config(root: &Path, config: &Config) -> Self {
        Self {
            root: root.to_path_buf(),
            quarantine_dir: Config::resolve(root, &config.quarantine_dir),
            fixtures_dir: Config::resolve(root, &config.fixtures_dir),
            large_literal_threshold: config.large_literal_threshold,
        }
    }
}

// ──────────────────── report types ────────────────────

/// What happened to one actioned file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Deleted,
    /// DELETE on a file that no longer exists.
    AlreadyAbsent,
    Quarantined { destination: PathBuf },
    Refactored { sidecars: Vec<PathBuf> },
    /// COMPACT_SNAPSHOTS on a file with no literal large enough to move.
    NothingToCompact,
    /// Not executed: report-only mode or dry run.
    Suggested,
    /// Not executed: the vibe check vetoed the batch.
    Blocked,
    /// Not executed: the run was cancelled first.
    Cancelled,
    Failed { code: String, message: String },
}

impl ActionOutcome {
    /// Label for the report's "action taken" column.
    #[must_use]
    pub fn label(&self, action: Action) -> String {
        match self {
            Self::Deleted | Self::AlreadyAbsent => "DELETED".to_string(),
            Self::Quarantined { .. } => "QUARANTINED".to_string(),
            Self::Refactored { .. } => "REFACTORED".to_string(),
            Self::NothingToCompact => "SKIPPED (no externalizable literal)".to_string(),
            Self::Suggested => format!("{action} (suggested)"),
            Self::Blocked => format!("{action} (blocked)"),
            Self::Cancelled => format!("{action} (cancelled)"),
            Self::Failed { .. } => match action {
                Action::Delete => "FAILED_DELETE".to_string(),
                Action::Quarantine => "FAILED_QUARANTINE".to_string(),
                Action::CompactSnapshots => "FAILED_REFACTOR".to_string(),
                Action::None => "FAILED".to_string(),
            },
        }
    }

    /// Whether the filesystem was changed.
    #[must_use]
    pub const fn mutated(&self) -> bool {
        matches!(
            self,
            Self::Deleted | Self::Quarantined { .. } | Self::Refactored { .. }
        )
    }

    fn failed(err: &EntropyError) -> Self {
        Self::Failed {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemediationRecord {
    pub verdict: RotVerdict,
    pub outcome: ActionOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct RemediationReport {
    pub records: Vec<RemediationRecord>,
    pub duration: Duration,
}

impl RemediationReport {
    /// Destructive actions that actually changed the filesystem.
    #[must_use]
    pub fn destructive_applied(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.verdict.action.is_destructive() && r.outcome.mutated())
            .count()
    }

    #[must_use]
    pub fn failures(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, ActionOutcome::Failed { .. }))
            .count()
    }
}

// ──────────────────── executor ────────────────────

pub struct RemediationExecutor {
    config: RemediationConfig,
    scanner: HealthScanner,
    parser: Parser,
    logger: ActivityLoggerHandle,
}

impl RemediationExecutor {
    pub fn new(config: RemediationConfig, logger: ActivityLoggerHandle) -> Result<Self> {
        Ok(Self {
            scanner: HealthScanner::new(config.large_literal_threshold)?,
            parser: new_parser()?,
            config,
            logger,
        })
    }

    /// Actionable verdicts in stable path order.
    #[must_use]
    pub fn plan(verdicts: &[RotVerdict]) -> Vec<RotVerdict> {
        let mut planned: Vec<RotVerdict> = verdicts
            .iter()
            .filter(|v| v.action != Action::None)
            .cloned()
            .collect();
        planned.sort_by(|a, b| a.path.cmp(&b.path));
        planned
    }

    /// Record every planned action with the same non-executed outcome.
    #[must_use]
    pub fn describe(planned: &[RotVerdict], outcome: &ActionOutcome) -> RemediationReport {
        RemediationReport {
            records: planned
                .iter()
                .map(|verdict| RemediationRecord {
                    verdict: verdict.clone(),
                    outcome: outcome.clone(),
                })
                .collect(),
            duration: Duration::ZERO,
        }
    }

    /// Apply each planned action in turn.
    pub fn execute(&mut self, planned: &[RotVerdict], cancel: &AtomicBool) -> RemediationReport {
        let start = Instant::now();
        let mut records = Vec::with_capacity(planned.len());

        for verdict in planned {
            if cancel.load(Ordering::Relaxed) {
                records.push(RemediationRecord {
                    verdict: verdict.clone(),
                    outcome: ActionOutcome::Cancelled,
                });
                continue;
            }

            let action_start = Instant::now();
            let outcome = match self.apply(verdict) {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.log_failure(verdict, &err);
                    ActionOutcome::failed(&err)
                }
            };
            if outcome.mutated() || outcome == ActionOutcome::AlreadyAbsent {
                self.log_success(verdict, &outcome, action_start.elapsed());
            }
            records.push(RemediationRecord {
                verdict: verdict.clone(),
                outcome,
            });
        }

        RemediationReport {
            records,
            duration: start.elapsed(),
        }
    }

    fn apply(&mut self, verdict: &RotVerdict) -> Result<ActionOutcome> {
        match verdict.action {
            Action::Delete => delete_file(&verdict.path),
            Action::Quarantine => quarantine_file(&verdict.path, &self.config.quarantine_dir)
                .map(|destination| ActionOutcome::Quarantined { destination }),
            Action::CompactSnapshots => self.compact(&verdict.path),
            Action::None => Ok(ActionOutcome::Suggested),
        }
    }

    fn compact(&mut self, path: &Path) -> Result<ActionOutcome> {
        let source = fs::read_to_string(path).map_err(|source| match source.kind() {
            io::ErrorKind::InvalidData => EntropyError::ParseFailure {
                path: path.to_path_buf(),
                details: "not valid UTF-8".to_string(),
            },
            _ => EntropyError::io(path, source),
        })?;

        // Offsets come from a fresh scan of the bytes about to be rewritten.
        let scan = self.scanner.scan_source(&source);
        if let Some(details) = scan.syntax_error {
            return Err(EntropyError::ParseFailure {
                path: path.to_path_buf(),
                details,
            });
        }

        if scan.literal_candidates.is_empty() {
            return Ok(ActionOutcome::NothingToCompact);
        }

        let plan = rewrite::plan_compaction(
            &mut self.parser,
            path,
            &source,
            &scan.literal_candidates,
            &self.config.fixtures_dir,
        )?;
        rewrite::commit(&plan)?;
        Ok(ActionOutcome::Refactored {
            sidecars: plan.sidecars.into_iter().map(|s| s.path).collect(),
        })
    }

    // ──────────────────── logging helpers ────────────────────

    fn log_success(&self, verdict: &RotVerdict, outcome: &ActionOutcome, elapsed: Duration) {
        let details = match outcome {
            ActionOutcome::AlreadyAbsent => "already absent".to_string(),
            ActionOutcome::Quarantined { destination } => {
                format!("moved to {}", display_relative(&self.config.root, destination))
            }
            ActionOutcome::Refactored { sidecars } => format!(
                "externalized {} literal(s): {}",
                sidecars.len(),
                sidecars
                    .iter()
                    .map(|p| display_relative(&self.config.root, p))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            _ => String::new(),
        };
        self.logger.send(ActivityEvent::RemediationApplied {
            path: display_relative(&self.config.root, &verdict.path),
            action: verdict.action.as_str().to_string(),
            details,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        });
    }

    fn log_failure(&self, verdict: &RotVerdict, err: &EntropyError) {
        self.logger.send(ActivityEvent::RemediationFailed {
            path: display_relative(&self.config.root, &verdict.path),
            action: verdict.action.as_str().to_string(),
            error_code: err.code().to_string(),
            error_message: err.to_string(),
        });
    }
}

// ──────────────────── filesystem actions ────────────────────

fn delete_file(path: &Path) -> Result<ActionOutcome> {
    match fs::remove_file(path) {
        Ok(()) => Ok(ActionOutcome::Deleted),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ActionOutcome::AlreadyAbsent),
        Err(e) => Err(EntropyError::io(path, e)),
    }
}

/// Move `path` into `dir`, keeping the file name when free.
///
/// Collisions get `_1`, `_2`, ... before the extension.
pub fn quarantine_file(path: &Path, dir: &Path) -> Result<PathBuf> {
    if !path.is_file() {
        return Err(EntropyError::io(
            path,
            io::Error::new(io::ErrorKind::NotFound, "test file not found"),
        ));
    }

    fs::create_dir_all(dir).map_err(|source| EntropyError::io(dir, source))?;
    let marker = dir.join(PACKAGE_MARKER);
    if !marker.exists() {
        fs::write(&marker, "").map_err(|source| EntropyError::io(&marker, source))?;
    }

    let destination = free_destination(path, dir)?;
    if fs::rename(path, &destination).is_err() {
        // Cross-device moves fall back to copy then remove.
        fs::copy(path, &destination).map_err(|source| EntropyError::io(&destination, source))?;
        if let Err(source) = fs::remove_file(path) {
            let _ = fs::remove_file(&destination);
            return Err(EntropyError::io(path, source));
        }
    }
    Ok(destination)
}

fn free_destination(path: &Path, dir: &Path) -> Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| EntropyError::SafetyVeto {
        path: path.to_path_buf(),
        reason: "path has no file name".to_string(),
    })?;
    let first = dir.join(name);
    if !first.exists() {
        return Ok(first);
    }

    let stem = path
        .file_stem()
        .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (1..=u32::MAX)
        .map(|n| dir.join(format!("{stem}_{n}{ext}")))
        .find(|candidate| !candidate.exists())
        .ok_or_else(|| EntropyError::SafetyVeto {
            path: path.to_path_buf(),
            reason: "no free quarantine name".to_string(),
        })
}

// ──────────────────── tests ────────────────────
