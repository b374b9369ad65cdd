#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

use entropy_audit::core::errors::{EntropyError, Result};
use entropy_audit::coverage::report::{LineContexts, SourceLine};
use entropy_audit::coverage::runner::CoverageBackend;
use entropy_audit::scanner::churn::ChurnSource;

// ──────────────────── binary harness ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

impl CmdResult {
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    /// First stdout line parsed as JSON.
    pub fn json(&self) -> serde_json::Value {
        let line = self.stdout.lines().next().unwrap_or_default();
        serde_json::from_str(line)
            .unwrap_or_else(|e| panic!("stdout is not JSON ({e}); log: {}", self.log_path.display()))
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_entropy") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "entropy.exe" } else { "entropy" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve entropy binary path for integration test"),
    }
}

/// Run the binary in `cwd` with a clean entropy environment plus `envs`.
///
/// Coverage always points at a missing interpreter so runs never depend on a
/// local Python installation.
pub fn run_cli_case(case_name: &str, cwd: &Path, args: &[&str], envs: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("entropy-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut cmd = Command::new(&bin_path);
    cmd.current_dir(cwd)
        .args(args)
        .env("RUST_BACKTRACE", "1")
        .env("ENTROPY_COVERAGE_PYTHON", "entropy-test-missing-python")
        .env("ENTROPY_LOG_JSONL", root.join(format!("{}.jsonl", sanitize(case_name))))
        .env_remove("ENTROPY_OUTPUT_FORMAT")
        .env_remove("ENTROPY_EXECUTION_MODE")
        .env_remove("ENTROPY_VIBE_CHECK_CAP");
    for (key, value) in envs {
        cmd.env(key, value);
    }
    let output = cmd.output().expect("execute entropy command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("cwd={}\n", cwd.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ──────────────────── fixture repos ────────────────────

pub const TAUTOLOGY_TEST: &str = "def test_always():\n    assert True\n";

pub const HEALTHY_TEST: &str =
    "from app import add\n\n\ndef test_add():\n    assert add(1, 2) == 3\n";

/// Four of six code lines carry a mocking construct (density 0.67).
pub const MOCK_HEAVY_TEST: &str = "\
def test_mocked():
    m = mock.Mock()
    m.return_value = 1
    patch(\"app.thing\").start()
    spy(m)
    assert m() == 1
";

/// Temporary project with a `tests/` directory.
pub struct TestRepo {
    pub dir: tempfile::TempDir,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp repo");
        fs::create_dir_all(dir.path().join("tests")).expect("create tests dir");
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(&path, contents).expect("write fixture file");
        path
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel)).expect("read fixture file")
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.path(rel).exists()
    }
}

// ──────────────────── fake collaborators ────────────────────

/// Coverage backend serving canned per-file line sets, keyed by file name.
///
/// The aggregate percentage is `base_percent + points_per_test * tests`, so
/// removing test files lowers it deterministically.
pub struct FakeCoverage {
    pub lines: HashMap<String, BTreeSet<SourceLine>>,
    pub base_percent: f64,
    pub points_per_test: f64,
    pub totals_available: bool,
}

impl FakeCoverage {
    pub fn new() -> Self {
        Self {
            lines: HashMap::new(),
            base_percent: 70.0,
            points_per_test: 0.0,
            totals_available: true,
        }
    }

    /// Give `file_name` `count` lines of its own in `src/app.py`.
    pub fn unique(mut self, file_name: &str, count: u32) -> Self {
        let offset = 1000 * (u32::try_from(self.lines.len()).unwrap_or(0) + 1);
        let set = (0..count)
            .map(|i| ("src/app.py".to_string(), offset + i))
            .collect();
        self.lines.insert(file_name.to_string(), set);
        self
    }
}

impl CoverageBackend for FakeCoverage {
    fn measure_file(&self, test_file: &Path, _workdir: &Path) -> Result<BTreeSet<SourceLine>> {
        let name = test_file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(self.lines.get(&name).cloned().unwrap_or_default())
    }

    fn measure_contexts(&self, _tests: &[PathBuf], _workdir: &Path) -> Result<LineContexts> {
        Err(EntropyError::CoverageTool {
            context: "fake coverage",
            details: "contexts not supported".to_string(),
        })
    }

    fn measure_total(&self, tests: &[PathBuf], _workdir: &Path) -> Result<f64> {
        if !self.totals_available {
            return Err(EntropyError::CoverageTool {
                context: "fake coverage",
                details: "totals unavailable".to_string(),
            });
        }
        Ok(self.base_percent + self.points_per_test * tests.len() as f64)
    }
}

/// Churn source with fixed counts per file name.
#[derive(Default)]
pub struct FixedChurn {
    commits: HashMap<String, u32>,
}

impl FixedChurn {
    pub fn with(mut self, file_name: &str, commits: u32) -> Self {
        self.commits.insert(file_name.to_string(), commits);
        self
    }
}

impl ChurnSource for FixedChurn {
    fn commits_in_window(&self, path: &Path) -> Result<u32> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(self.commits.get(&name).copied().unwrap_or(0))
    }
}
