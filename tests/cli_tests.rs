//! CLI smoke tests against the compiled `entropy` binary.

mod common;

use common::{MOCK_HEAVY_TEST, TAUTOLOGY_TEST, TestRepo, run_cli_case};

#[test]
fn help_command_prints_usage() {
    let repo = TestRepo::new();
    let result = run_cli_case("help_command_prints_usage", repo.root(), &["--help"], &[]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(
        result.stdout.contains("Usage: entropy [OPTIONS] <COMMAND>"),
        "missing help banner; log: {}",
        result.log_path.display()
    );
}

#[test]
fn version_command_prints_version() {
    let repo = TestRepo::new();
    let result = run_cli_case("version_command_prints_version", repo.root(), &["--version"], &[]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(result.stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn unknown_subcommand_fails() {
    let repo = TestRepo::new();
    let result = run_cli_case("unknown_subcommand_fails", repo.root(), &["prune"], &[]);
    assert!(!result.status.success());
}

#[test]
fn config_show_json_reports_defaults() {
    let repo = TestRepo::new();
    let result = run_cli_case(
        "config_show_json_reports_defaults",
        repo.root(),
        &["config", "show", "--json"],
        &[],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let payload = result.json();
    assert_eq!(payload["command"], "config show");
    assert_eq!(payload["config"]["maxTokenContext"], 2000);
    assert_eq!(payload["config"]["vibeCheckCap"], 20);
    assert_eq!(payload["config"]["executionMode"], "PR_SUGGESTION");
}

#[test]
fn config_show_reads_project_file_and_env() {
    let repo = TestRepo::new();
    repo.write("entropy.toml", "maxTokenContext = 1500\nexecutionMode = \"REPORT_ONLY\"\n");
    let result = run_cli_case(
        "config_show_reads_project_file_and_env",
        repo.root(),
        &["config", "show", "--json"],
        &[("ENTROPY_VIBE_CHECK_CAP", "7")],
    );
    let payload = result.json();
    assert_eq!(payload["config"]["maxTokenContext"], 1500);
    assert_eq!(payload["config"]["executionMode"], "REPORT_ONLY");
    assert_eq!(payload["config"]["vibeCheckCap"], 7);
}

#[test]
fn invalid_config_falls_back_to_defaults_with_warning() {
    let repo = TestRepo::new();
    repo.write("entropy.toml", "maxMockDensity = 3.0\n");
    let result = run_cli_case(
        "invalid_config_falls_back_to_defaults_with_warning",
        repo.root(),
        &["config", "show", "--json"],
        &[],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("ENT-1001"));
    assert_eq!(result.json()["config"]["maxMockDensity"], 0.55);
}

#[test]
fn scan_reports_health_per_file() {
    let repo = TestRepo::new();
    repo.write("tests/test_taut.py", TAUTOLOGY_TEST);
    repo.write("tests/test_mocky.py", MOCK_HEAVY_TEST);
    repo.write("tests/helpers.py", "def helper():\n    return 1\n");
    let result = run_cli_case("scan_reports_health_per_file", repo.root(), &["scan", "--json"], &[]);
    assert!(result.status.success(), "log: {}", result.log_path.display());

    let payload = result.json();
    let files = payload["files"].as_array().unwrap();
    assert_eq!(files.len(), 2);
    let taut = files.iter().find(|f| f["path"] == "tests/test_taut.py").unwrap();
    assert_eq!(taut["health"]["tautology_detected"], true);
    let mocky = files.iter().find(|f| f["path"] == "tests/test_mocky.py").unwrap();
    assert!(mocky["health"]["mock_density"].as_f64().unwrap() > 0.55);
}

#[test]
fn scan_rejects_non_test_paths() {
    let repo = TestRepo::new();
    repo.write("tests/helpers.py", "x = 1\n");
    let result = run_cli_case(
        "scan_rejects_non_test_paths",
        repo.root(),
        &["scan", "tests/helpers.py"],
        &[],
    );
    assert_eq!(result.code(), Some(1));
}

#[test]
fn verdict_suggests_without_mutating() {
    let repo = TestRepo::new();
    repo.write("tests/test_taut.py", TAUTOLOGY_TEST);
    let result = run_cli_case(
        "verdict_suggests_without_mutating",
        repo.root(),
        &["verdict", "--json"],
        &[],
    );
    assert_eq!(result.code(), Some(0), "log: {}", result.log_path.display());
    assert!(repo.exists("tests/test_taut.py"));

    let payload = result.json();
    assert_eq!(payload["mode"], "REPORT_ONLY");
    assert_eq!(payload["outcome"], "ok");
    assert_eq!(payload["actions"][0]["result"], "DELETE (suggested)");
    assert!(repo.read("entropy_report.md").contains("DELETE (suggested)"));
}

#[test]
fn run_deletes_tautology_and_writes_custom_report() {
    let repo = TestRepo::new();
    repo.write("tests/test_taut.py", TAUTOLOGY_TEST);
    let result = run_cli_case(
        "run_deletes_tautology_and_writes_custom_report",
        repo.root(),
        &["run", "--json", "--report", "reports/out.md"],
        &[],
    );
    // Coverage is unavailable, so the cliff check is skipped rather than tripped.
    assert_eq!(result.code(), Some(0), "log: {}", result.log_path.display());
    assert!(!repo.exists("tests/test_taut.py"));
    assert!(repo.read("reports/out.md").contains("DELETED"));
    assert_eq!(result.json()["coverage_cliff"]["status"], "skipped");
}

#[test]
fn run_dry_run_keeps_files() {
    let repo = TestRepo::new();
    repo.write("tests/test_taut.py", TAUTOLOGY_TEST);
    let result = run_cli_case("run_dry_run_keeps_files", repo.root(), &["run", "--dry-run", "--json"], &[]);
    assert_eq!(result.code(), Some(0), "log: {}", result.log_path.display());
    assert!(repo.exists("tests/test_taut.py"));
}

#[test]
fn vibe_check_abort_exits_two() {
    let repo = TestRepo::new();
    repo.write("tests/test_a.py", TAUTOLOGY_TEST);
    repo.write("tests/test_b.py", TAUTOLOGY_TEST);
    let result = run_cli_case(
        "vibe_check_abort_exits_two",
        repo.root(),
        &["run", "--json"],
        &[("ENTROPY_VIBE_CHECK_CAP", "1")],
    );
    assert_eq!(result.code(), Some(2), "log: {}", result.log_path.display());
    assert!(repo.exists("tests/test_a.py"));
    assert!(repo.exists("tests/test_b.py"));
    assert!(result.stderr.contains("vibe check failed"));
    assert_eq!(result.json()["outcome"], "vibe_check_aborted");
}

#[test]
fn run_against_other_root() {
    let repo = TestRepo::new();
    repo.write("project/tests/test_taut.py", TAUTOLOGY_TEST);
    let result = run_cli_case(
        "run_against_other_root",
        repo.root(),
        &["verdict", "--root", "project", "--json"],
        &[],
    );
    assert_eq!(result.code(), Some(0), "log: {}", result.log_path.display());
    assert!(repo.exists("project/entropy_report.md"));
    assert_eq!(result.json()["scanned"], 1);
}

#[test]
fn completions_are_generated() {
    let repo = TestRepo::new();
    let result = run_cli_case("completions_are_generated", repo.root(), &["completions", "bash"], &[]);
    assert!(result.status.success());
    assert!(result.stdout.contains("entropy"));
}
