//! Audit pipeline: discover -> coverage -> scan + churn -> verdicts -> safety
//! gate -> remediation -> coverage cliff -> report.
//!
//! Every verdict is computed before any file is touched, so the vibe check can
//! veto the whole batch. Only the vibe check is a deliberate stop; every other
//! failure is logged and the run continues with degraded data.

#![allow(missing_docs)]

pub mod report;
#[cfg(feature = "signals")]
pub mod signals;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::core::config::{Config, ExecutionMode};
use crate::core::errors::{EntropyError, Result};
use crate::core::model::{RotVerdict, TestFileHealth};
use crate::core::paths::display_relative;
use crate::coverage::engine::{CoverageEngine, CoverageMap};
use crate::coverage::runner::CoverageBackend;
use crate::decision::safety::{CliffCheck, VibeCheck};
use crate::decision::verdict::VerdictEngine;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::remediation::executor::{
    ActionOutcome, RemediationConfig, RemediationExecutor, RemediationReport,
};
use crate::scanner::churn::ChurnSource;
use crate::scanner::critical::CriticalPaths;
use crate::scanner::discovery::{DiscoveryConfig, discover_test_files, explicit_test_files};
use crate::scanner::health::{HealthScan, HealthScanner};

// ──────────────────── outcome ────────────────────

/// Completion state of a run, in decreasing precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Ok,
    VibeCheckAborted,
    CoverageCliff,
    Cancelled,
}

impl RunOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::VibeCheckAborted => "vibe_check_aborted",
            Self::CoverageCliff => "coverage_cliff",
            Self::Cancelled => "cancelled",
        }
    }

    /// Process exit code for this outcome.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::VibeCheckAborted => 2,
            Self::CoverageCliff => 3,
            Self::Cancelled => 130,
        }
    }
}

// ──────────────────── options / summary ────────────────────

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Force REPORT_ONLY regardless of the configured mode.
    pub dry_run: bool,
    /// Analyze only these files instead of walking the tests directory.
    pub files: Vec<PathBuf>,
    /// Override for the report location; `None` uses `reportFile`.
    pub report_path: Option<PathBuf>,
    /// Skip writing the report to disk.
    pub skip_report_file: bool,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub root: PathBuf,
    pub mode: ExecutionMode,
    pub dry_run: bool,
    pub files: Vec<TestFileHealth>,
    pub verdicts: Vec<RotVerdict>,
    pub remediation: RemediationReport,
    pub vibe_check: VibeCheck,
    pub cliff: CliffCheck,
    pub cancelled: bool,
    pub outcome: RunOutcome,
    pub duration: Duration,
}

impl RunSummary {
    /// Mode actually used: dry runs always report only.
    #[must_use]
    pub fn effective_mode(&self) -> ExecutionMode {
        if self.dry_run {
            ExecutionMode::ReportOnly
        } else {
            self.mode
        }
    }

    #[must_use]
    pub fn unique_coverage_of(&self, path: &Path) -> u64 {
        self.files
            .iter()
            .find(|health| health.path == path)
            .map_or(0, |health| health.unique_coverage)
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }
}

// ──────────────────── pipeline ────────────────────

pub struct Pipeline<'a> {
    config: &'a Config,
    root: PathBuf,
    coverage: &'a dyn CoverageBackend,
    churn: &'a dyn ChurnSource,
    logger: ActivityLoggerHandle,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Config,
        root: &Path,
        coverage: &'a dyn CoverageBackend,
        churn: &'a dyn ChurnSource,
        logger: ActivityLoggerHandle,
    ) -> Self {
        Self {
            config,
            root: root.to_path_buf(),
            coverage,
            churn,
            logger,
        }
    }

    /// Run the full audit.
    ///
    /// Returns `Err` only when the analyzer itself cannot start (for example
    /// the Python grammar fails to load). Every per-file problem is logged.
    pub fn run(&self, options: &RunOptions, cancel: &AtomicBool) -> Result<RunSummary> {
        let start = Instant::now();
        let mode = if options.dry_run {
            ExecutionMode::ReportOnly
        } else {
            self.config.execution_mode
        };
        self.log_run_started(mode);

        let tests = self.test_files(options);
        let coverage_engine = self.coverage_engine();
        let coverage = coverage_engine.unique_coverage(&tests, cancel);

        let (files, verdicts) = self.analyze(&tests, &coverage, cancel)?;
        let mut cancelled = cancel.load(Ordering::Relaxed) || files.len() < tests.len();

        let planned = RemediationExecutor::plan(&verdicts);
        let vibe_check = VibeCheck::evaluate(&verdicts, self.config.vibe_check_cap);
        let mut cliff = CliffCheck::NotRequired;

        let remediation = if cancelled {
            RemediationExecutor::describe(&planned, &ActionOutcome::Cancelled)
        } else if vibe_check.aborted() {
            self.logger.send(ActivityEvent::VibeCheckAborted {
                flagged: vibe_check.flagged,
                cap: vibe_check.cap,
            });
            RemediationExecutor::describe(&planned, &ActionOutcome::Blocked)
        } else if mode == ExecutionMode::ReportOnly || planned.is_empty() {
            RemediationExecutor::describe(&planned, &ActionOutcome::Suggested)
        } else {
            let destructive = planned.iter().any(|v| v.action.is_destructive());
            let baseline = destructive
                .then(|| coverage_engine.aggregate_percent(&tests))
                .flatten();

            let mut executor = RemediationExecutor::new(
                RemediationConfig::from_config(&self.root, self.config),
                self.logger.clone(),
            )?;
            let report = executor.execute(&planned, cancel);

            if report.destructive_applied() > 0 {
                cliff = self.cliff_check(&coverage_engine, &tests, baseline, &report);
            }
            cancelled |= report
                .records
                .iter()
                .any(|r| r.outcome == ActionOutcome::Cancelled);
            report
        };

        let outcome = if cancelled {
            RunOutcome::Cancelled
        } else if vibe_check.aborted() {
            RunOutcome::VibeCheckAborted
        } else if cliff.tripped() {
            RunOutcome::CoverageCliff
        } else {
            RunOutcome::Ok
        };

        let summary = RunSummary {
            root: self.root.clone(),
            mode: self.config.execution_mode,
            dry_run: options.dry_run,
            files,
            verdicts,
            remediation,
            vibe_check,
            cliff,
            cancelled,
            outcome,
            duration: start.elapsed(),
        };

        if !options.skip_report_file {
            let path = options
                .report_path
                .clone()
                .unwrap_or_else(|| Config::resolve(&self.root, &self.config.report_file));
            if let Err(err) = report::write(&path, &report::render(&summary)) {
                self.warn(None, &err);
            }
        }

        self.logger.send(ActivityEvent::RunCompleted {
            scanned: summary.files.len(),
            actioned: summary.remediation.records.len(),
            outcome: outcome.as_str().to_string(),
            duration_ms: duration_ms(summary.duration),
        });
        Ok(summary)
    }

    /// Scan, churn and judge every file. Stops early when `cancel` is set.
    pub fn analyze(
        &self,
        tests: &[PathBuf],
        coverage: &CoverageMap,
        cancel: &AtomicBool,
    ) -> Result<(Vec<TestFileHealth>, Vec<RotVerdict>)> {
        let critical = self.critical_paths();
        let verdict_engine = VerdictEngine::from_config(self.config);
        let mut scanner = HealthScanner::new(self.config.large_literal_threshold)?;

        let mut files = Vec::with_capacity(tests.len());
        let mut verdicts = Vec::with_capacity(tests.len());
        for test in tests {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            let file_start = Instant::now();
            let health = self.file_health(&mut scanner, test, coverage, &critical);
            let rel = display_relative(&self.root, test);
            self.logger.send(ActivityEvent::FileAnalyzed {
                path: rel.clone(),
                loc: health.loc,
                mock_density: health.mock_density,
                token_cost: health.token_cost,
                churn_rate: health.churn_rate,
                unique_coverage: health.unique_coverage,
                duration_ms: duration_ms(file_start.elapsed()),
            });

            let verdict = verdict_engine.evaluate(&health);
            self.logger.send(ActivityEvent::VerdictIssued {
                path: rel,
                action: verdict.action.as_str().to_string(),
                tags: verdict.tags.iter().map(|t| t.as_str().to_string()).collect(),
                score: verdict.score,
                unique_coverage: health.unique_coverage,
            });
            files.push(health);
            verdicts.push(verdict);
        }
        Ok((files, verdicts))
    }

    /// Discovered or explicitly requested test files.
    pub fn test_files(&self, options: &RunOptions) -> Vec<PathBuf> {
        if !options.files.is_empty() {
            let resolved: Vec<PathBuf> = options
                .files
                .iter()
                .map(|f| Config::resolve(&self.root, f))
                .collect();
            return explicit_test_files(&resolved);
        }

        let mut discovery =
            DiscoveryConfig::new(Config::resolve(&self.root, &self.config.tests_dir));
        discovery
            .excluded_dirs
            .push(Config::resolve(&self.root, &self.config.quarantine_dir));
        match discover_test_files(&discovery) {
            Ok(files) => files,
            Err(err) => {
                self.warn(None, &err);
                Vec::new()
            }
        }
    }

    fn file_health(
        &self,
        scanner: &mut HealthScanner,
        test: &Path,
        coverage: &CoverageMap,
        critical: &CriticalPaths,
    ) -> TestFileHealth {
        let scan = scanner.scan_file(test).unwrap_or_else(|err| {
            self.warn(Some(test), &err);
            HealthScan::zeroed()
        });
        if let Some(details) = &scan.syntax_error {
            self.warn(
                Some(test),
                &EntropyError::ParseFailure {
                    path: test.to_path_buf(),
                    details: details.clone(),
                },
            );
        }

        TestFileHealth {
            path: test.to_path_buf(),
            loc: scan.loc,
            mock_density: scan.mock_density,
            token_cost: scan.token_cost,
            churn_rate: self.churn.churn_rate(test),
            unique_coverage: coverage.unique_for(test),
            is_critical: critical.is_critical(test),
            tautology_detected: scan.tautology_detected,
        }
    }

    fn critical_paths(&self) -> CriticalPaths {
        let manifest = Config::resolve(&self.root, &self.config.critical_paths_file);
        let (critical, warnings) = CriticalPaths::load(&self.root, &manifest);
        for err in &warnings {
            self.warn(None, err);
        }
        critical
    }

    fn coverage_engine(&self) -> CoverageEngine<'a> {
        CoverageEngine::new(
            self.coverage,
            &self.root,
            self.config.coverage.strategy,
            self.config.coverage.parallelism,
            self.logger.clone(),
        )
    }

    fn cliff_check(
        &self,
        engine: &CoverageEngine<'_>,
        tests: &[PathBuf],
        baseline: Option<f64>,
        report: &RemediationReport,
    ) -> CliffCheck {
        if baseline.is_none() {
            self.warn(
                None,
                &EntropyError::CoverageTool {
                    context: "coverage baseline",
                    details: "baseline unavailable; cliff check skipped".to_string(),
                },
            );
            return CliffCheck::Skipped;
        }

        // Deleted and quarantined files are no longer part of the suite.
        let removed: Vec<&Path> = report
            .records
            .iter()
            .filter(|r| r.verdict.action.is_destructive() && r.outcome.mutated())
            .map(|r| r.verdict.path.as_path())
            .collect();
        let remaining: Vec<PathBuf> = tests
            .iter()
            .filter(|test| !removed.contains(&test.as_path()))
            .cloned()
            .collect();
        let post = engine.aggregate_percent(&remaining);
        let check = CliffCheck::evaluate(baseline, post, self.config.coverage_cliff_delta_percent);
        if let CliffCheck::Tripped {
            baseline,
            post,
            allowed_delta,
        } = check
        {
            self.logger.send(ActivityEvent::CoverageCliff {
                baseline_pct: baseline,
                post_pct: post,
                allowed_delta,
            });
        }
        check
    }

    fn log_run_started(&self, mode: ExecutionMode) {
        let config_hash = self.config.stable_hash().unwrap_or_else(|err| {
            self.warn(None, &err);
            String::from("unavailable")
        });
        self.logger.send(ActivityEvent::RunStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash,
            root: self.root.display().to_string(),
            mode: mode.to_string(),
        });
    }

    fn warn(&self, path: Option<&Path>, err: &EntropyError) {
        self.logger.send(ActivityEvent::warning(
            path.map(|p| display_relative(&self.root, p)),
            err,
        ));
    }
}

/// Scan files with the Static Health Scanner only.
pub fn scan_files(config: &Config, files: &[PathBuf]) -> Result<Vec<(PathBuf, Result<HealthScan>)>> {
    let mut scanner = HealthScanner::new(config.large_literal_threshold)?;
    Ok(files
        .iter()
        .map(|file| (file.clone(), scanner.scan_file(file)))
        .collect())
}

fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
