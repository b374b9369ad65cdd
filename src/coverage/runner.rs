//! Coverage backend driving `python -m coverage` around `pytest`.
//!
//! Every invocation receives its own scratch directory. The coverage data file,
//! rc file and report all live there, so concurrent runs never share state.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::core::config::{Config, ReportFormat};
use crate::core::errors::{EntropyError, Result};
use crate::coverage::report::{self, CoverageReport, LineContexts, SourceLine};
use crate::platform::process::{describe, run_with_timeout};

/// pytest exit code when no tests were collected.
const PYTEST_NO_TESTS: i32 = 5;

/// Measurement capability the engine depends on.
///
/// `workdir` is a private scratch directory owned by the caller for the
/// duration of one call.
pub trait CoverageBackend: Send + Sync {
    /// Lines covered by running only `test_file`.
    fn measure_file(&self, test_file: &Path, workdir: &Path) -> Result<BTreeSet<SourceLine>>;

    /// One whole-suite run with per-line test-function contexts.
    fn measure_contexts(&self, tests: &[PathBuf], workdir: &Path) -> Result<LineContexts>;

    /// Aggregate line-coverage percentage of the whole suite.
    fn measure_total(&self, tests: &[PathBuf], workdir: &Path) -> Result<f64>;
}

/// Real backend: `python -m coverage run -m pytest ...`.
#[derive(Debug, Clone)]
pub struct PythonCoverage {
    root: PathBuf,
    python: String,
    source_dir: PathBuf,
    report_format: ReportFormat,
    timeout: Duration,
}

impl PythonCoverage {
    pub fn new(root: &Path, config: &Config) -> Self {
        Self {
            root: root.to_path_buf(),
            python: config.coverage.python_command.clone(),
            source_dir: Config::resolve(root, &config.source_dir),
            report_format: config.coverage.report_format,
            timeout: Duration::from_secs(config.coverage.timeout_secs),
        }
    }

    fn base_command(&self, workdir: &Path) -> Command {
        let mut cmd = Command::new(&self.python);
        cmd.current_dir(&self.root)
            .env("COVERAGE_FILE", workdir.join(".coverage"))
            .arg("-m")
            .arg("coverage");
        cmd
    }

    fn run_suite(&self, targets: &[PathBuf], workdir: &Path, rcfile: Option<&Path>) -> Result<()> {
        let mut cmd = self.base_command(workdir);
        cmd.arg("run");
        if let Some(rc) = rcfile {
            cmd.arg(format!("--rcfile={}", rc.display()));
        } else {
            cmd.arg(format!("--source={}", self.source_dir.display()));
        }
        cmd.args(["-m", "pytest", "-q", "-p", "no:cacheprovider"]).args(targets);

        let output = run_with_timeout(&mut cmd, self.timeout)?;
        // Failing tests still produce coverage data; only a missing report is fatal.
        if !output.success && output.code != Some(1) && output.code != Some(PYTEST_NO_TESTS) {
            return Err(EntropyError::CoverageTool {
                context: "coverage run",
                details: format!(
                    "{} exited with {:?}: {}",
                    describe(&cmd),
                    output.code,
                    last_line(&output.stderr)
                ),
            });
        }
        Ok(())
    }

    fn export(&self, workdir: &Path, show_contexts: bool) -> Result<CoverageReport> {
        let format = if show_contexts {
            ReportFormat::Json
        } else {
            self.report_format
        };
        let (subcommand, file_name) = match format {
            ReportFormat::Json => ("json", "coverage.json"),
            ReportFormat::Xml => ("xml", "coverage.xml"),
        };
        let out = workdir.join(file_name);

        let mut cmd = self.base_command(workdir);
        cmd.arg(subcommand).arg("-o").arg(&out);
        if show_contexts {
            cmd.arg("--show-contexts");
        }
        let output = run_with_timeout(&mut cmd, self.timeout)?;
        if !output.success {
            return Err(EntropyError::CoverageTool {
                context: "coverage export",
                details: format!("{} failed: {}", describe(&cmd), last_line(&output.stderr)),
            });
        }

        let raw = fs::read_to_string(&out).map_err(|source| EntropyError::io(&out, source))?;
        match format {
            ReportFormat::Json => report::parse_json(&raw),
            ReportFormat::Xml => report::parse_cobertura(&raw),
        }
    }
}

impl CoverageBackend for PythonCoverage {
    fn measure_file(&self, test_file: &Path, workdir: &Path) -> Result<BTreeSet<SourceLine>> {
        self.run_suite(&[test_file.to_path_buf()], workdir, None)?;
        Ok(self.export(workdir, false)?.lines)
    }

    fn measure_contexts(&self, tests: &[PathBuf], workdir: &Path) -> Result<LineContexts> {
        let rcfile = workdir.join("entropy.coveragerc");
        let rc = format!(
            "[run]\nsource = {}\ndynamic_context = test_function\n",
            self.source_dir.display()
        );
        fs::write(&rcfile, rc).map_err(|source| EntropyError::io(&rcfile, source))?;

        self.run_suite(tests, workdir, Some(&rcfile))?;
        Ok(self.export(workdir, true)?.contexts)
    }

    fn measure_total(&self, tests: &[PathBuf], workdir: &Path) -> Result<f64> {
        self.run_suite(tests, workdir, None)?;
        self.export(workdir, false)?
            .percent_covered
            .ok_or_else(|| EntropyError::CoverageTool {
                context: "coverage totals",
                details: "report carries no aggregate percentage".to_string(),
            })
    }
}

fn last_line(text: &str) -> &str {
    text.lines().rev().find(|line| !line.trim().is_empty()).unwrap_or("").trim()
}
