//! End-to-end pipeline scenarios against temporary projects, with injected
//! coverage and churn so no Python or git installation is needed.

mod common;

use std::fs;
use std::process::Command;
use std::sync::atomic::AtomicBool;

use common::{FakeCoverage, FixedChurn, HEALTHY_TEST, MOCK_HEAVY_TEST, TAUTOLOGY_TEST, TestRepo};
use entropy_audit::core::config::{Config, ExecutionMode};
use entropy_audit::core::model::{Action, RotTag};
use entropy_audit::decision::safety::CliffCheck;
use entropy_audit::logger::activity::ActivityLoggerHandle;
use entropy_audit::pipeline::report::{CLEAN_MESSAGE, REPORT_TITLE};
use entropy_audit::pipeline::{Pipeline, RunOptions, RunOutcome, RunSummary};
use entropy_audit::remediation::executor::ActionOutcome;
use serde_json::{Map, Value};

fn run(repo: &TestRepo, config: &Config, coverage: &FakeCoverage, churn: &FixedChurn) -> RunSummary {
    run_with(repo, config, coverage, churn, &RunOptions::default())
}

fn run_with(
    repo: &TestRepo,
    config: &Config,
    coverage: &FakeCoverage,
    churn: &FixedChurn,
    options: &RunOptions,
) -> RunSummary {
    let cancel = AtomicBool::new(false);
    Pipeline::new(config, repo.root(), coverage, churn, ActivityLoggerHandle::disabled())
        .run(options, &cancel)
        .expect("pipeline run")
}

fn verdict_for<'a>(summary: &'a RunSummary, name: &str) -> &'a entropy_audit::core::model::RotVerdict {
    summary
        .verdicts
        .iter()
        .find(|v| v.path.file_name().is_some_and(|n| n == name))
        .unwrap_or_else(|| panic!("no verdict for {name}"))
}

/// A dict literal well above both the literal and token thresholds.
fn large_literal() -> Value {
    let mut map = Map::new();
    for i in 0..120 {
        map.insert(format!("key_{i:03}"), Value::String("v".repeat(70)));
    }
    Value::Object(map)
}

#[test]
fn tautology_without_unique_coverage_is_deleted() {
    let repo = TestRepo::new();
    repo.write("tests/test_taut.py", TAUTOLOGY_TEST);
    repo.write("tests/test_good.py", HEALTHY_TEST);
    let coverage = FakeCoverage::new().unique("test_good.py", 4);

    let summary = run(&repo, &Config::default(), &coverage, &FixedChurn::default());

    let verdict = verdict_for(&summary, "test_taut.py");
    assert!(verdict.tags.contains(&RotTag::Tautology));
    assert_eq!(verdict.action, Action::Delete);
    assert_eq!(verdict_for(&summary, "test_good.py").action, Action::None);
    assert!(!repo.exists("tests/test_taut.py"));
    assert!(repo.exists("tests/test_good.py"));
    assert_eq!(summary.outcome, RunOutcome::Ok);
    assert!(matches!(summary.cliff, CliffCheck::Passed { .. }));

    let report = repo.read("entropy_report.md");
    assert!(report.starts_with(REPORT_TITLE));
    assert!(report.contains("Scanned 2 files. 1 actions suggested/taken."));
    assert!(report.contains("| tests/test_taut.py | TAUTOLOGY, REDUNDANT_COVERAGE | 0 lines | DELETED |"));
}

#[test]
fn brittle_file_with_unique_coverage_is_kept() {
    let repo = TestRepo::new();
    repo.write("tests/test_mocky.py", MOCK_HEAVY_TEST);
    let coverage = FakeCoverage::new().unique("test_mocky.py", 3);

    let summary = run(&repo, &Config::default(), &coverage, &FixedChurn::default());

    let verdict = verdict_for(&summary, "test_mocky.py");
    assert_eq!(verdict.tags.iter().copied().collect::<Vec<_>>(), vec![RotTag::BrittleMocking]);
    assert_eq!(verdict.action, Action::None);
    assert!(verdict.rationale.contains("kept: 3 unique lines"));
    assert!(repo.exists("tests/test_mocky.py"));
    assert!(repo.read("entropy_report.md").contains(CLEAN_MESSAGE));
}

#[test]
fn context_bloat_is_compacted_round_trip() {
    let repo = TestRepo::new();
    let literal = large_literal();
    let source = format!(
        "EXPECTED = {}\n\n\ndef test_snapshot():\n    assert len(EXPECTED) == 120\n",
        serde_json::to_string(&literal).unwrap()
    );
    assert!(source.len() / 4 > 2000);
    repo.write("tests/test_snap.py", &source);
    let coverage = FakeCoverage::new().unique("test_snap.py", 3);

    let summary = run(&repo, &Config::default(), &coverage, &FixedChurn::default());

    let verdict = verdict_for(&summary, "test_snap.py");
    assert_eq!(verdict.tags.iter().copied().collect::<Vec<_>>(), vec![RotTag::ContextBloat]);
    assert_eq!(verdict.action, Action::CompactSnapshots);
    assert!(matches!(
        summary.remediation.records[0].outcome,
        ActionOutcome::Refactored { .. }
    ));

    let sidecar = repo.read("tests/fixtures/test_snap_EXPECTED.json");
    let restored: Value = serde_json::from_str(&sidecar).unwrap();
    assert_eq!(restored, literal);

    let rewritten = repo.read("tests/test_snap.py");
    assert!(rewritten.starts_with("import json\nimport pathlib\n"));
    assert!(rewritten.contains(
        "EXPECTED = json.loads(pathlib.Path(__file__).parent.joinpath(\"fixtures/test_snap_EXPECTED.json\").read_text(encoding=\"utf-8\"))"
    ));
    assert!(!rewritten.contains("key_000"));
    assert!(rewritten.contains("def test_snapshot():"));
    assert!(repo.read("entropy_report.md").contains("REFACTORED"));
}

/// Relative path inside the first `joinpath("...")` of a rewritten module.
fn sidecar_load_path(source: &str) -> &str {
    let start = source.find("joinpath(\"").expect("load expression") + "joinpath(\"".len();
    let len = source[start..].find('"').expect("closing quote");
    &source[start..start + len]
}

fn python3_available() -> bool {
    Command::new("python3")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

#[test]
fn nested_test_file_round_trips_through_sidecar() {
    let repo = TestRepo::new();
    let literal = large_literal();
    let source = format!(
        "EXPECTED = {}\n\n\ndef test_snapshot():\n    assert len(EXPECTED) == 120\n",
        serde_json::to_string(&literal).unwrap()
    );
    let test_file = repo.write("tests/unit/api/test_nested.py", &source);
    let coverage = FakeCoverage::new().unique("test_nested.py", 3);

    let summary = run(&repo, &Config::default(), &coverage, &FixedChurn::default());
    assert_eq!(verdict_for(&summary, "test_nested.py").action, Action::CompactSnapshots);

    let rewritten = repo.read("tests/unit/api/test_nested.py");
    let rel = sidecar_load_path(&rewritten);
    assert_eq!(rel, "../../fixtures/test_nested_EXPECTED.json");

    let resolved = test_file.parent().unwrap().join(rel);
    assert!(resolved.exists(), "sidecar missing at {}", resolved.display());
    let restored: Value = serde_json::from_str(&fs::read_to_string(&resolved).unwrap()).unwrap();
    assert_eq!(restored, literal);

    if python3_available() {
        let out = Command::new("python3")
            .args([
                "-c",
                "import runpy, sys; ns = runpy.run_path(sys.argv[1]); print(len(ns['EXPECTED']))",
            ])
            .arg(&test_file)
            .output()
            .unwrap();
        assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "120");
    }
}

#[test]
fn delete_wins_over_quarantine() {
    let repo = TestRepo::new();
    repo.write("tests/test_churny.py", MOCK_HEAVY_TEST);
    let churn = FixedChurn::default().with("test_churny.py", 8);

    let summary = run(&repo, &Config::default(), &FakeCoverage::new(), &churn);

    let verdict = verdict_for(&summary, "test_churny.py");
    assert!(verdict.tags.contains(&RotTag::HighChurn));
    assert!(verdict.tags.contains(&RotTag::BrittleMocking));
    assert_eq!(verdict.action, Action::Delete);
    assert!(!repo.exists("tests/test_churny.py"));
    assert!(!repo.exists("tests/quarantine"));
}

#[test]
fn vibe_check_blocks_every_mutation() {
    let repo = TestRepo::new();
    for i in 0..25 {
        repo.write(&format!("tests/test_t{i:02}.py"), TAUTOLOGY_TEST);
    }
    let config = Config {
        vibe_check_cap: 20,
        ..Config::default()
    };

    let summary = run(&repo, &config, &FakeCoverage::new(), &FixedChurn::default());

    assert_eq!(summary.outcome, RunOutcome::VibeCheckAborted);
    assert_eq!(summary.exit_code(), 2);
    assert_eq!(summary.vibe_check.flagged, 25);
    assert!(summary.remediation.records.iter().all(|r| !r.outcome.mutated()));
    for i in 0..25 {
        assert!(repo.exists(&format!("tests/test_t{i:02}.py")));
    }

    let report = repo.read("entropy_report.md");
    assert!(report.contains("Vibe check failed"));
    assert_eq!(report.matches("DELETE (blocked)").count(), 25);
}

#[test]
fn vibe_check_also_blocks_compaction() {
    let repo = TestRepo::new();
    for i in 0..3 {
        repo.write(&format!("tests/test_t{i}.py"), TAUTOLOGY_TEST);
    }
    let source = format!(
        "EXPECTED = {}\n",
        serde_json::to_string(&large_literal()).unwrap()
    );
    repo.write("tests/test_snap.py", &source);
    let config = Config {
        vibe_check_cap: 2,
        ..Config::default()
    };

    let summary = run(&repo, &config, &FakeCoverage::new().unique("test_snap.py", 1), &FixedChurn::default());

    assert_eq!(summary.outcome, RunOutcome::VibeCheckAborted);
    assert_eq!(repo.read("tests/test_snap.py"), source);
    assert!(!repo.exists("tests/fixtures"));
}

#[test]
fn critical_paths_are_never_removed() {
    let repo = TestRepo::new();
    repo.write("tests/test_taut.py", TAUTOLOGY_TEST);
    repo.write("critical_paths.json", r#"{"paths": ["tests/test_taut.py"]}"#);

    let summary = run(&repo, &Config::default(), &FakeCoverage::new(), &FixedChurn::default());

    let verdict = verdict_for(&summary, "test_taut.py");
    assert!(verdict.tags.contains(&RotTag::Tautology));
    assert!(!verdict.tags.contains(&RotTag::RedundantCoverage));
    assert_eq!(verdict.action, Action::None);
    assert!(repo.exists("tests/test_taut.py"));
}

#[test]
fn churning_redundant_file_is_quarantined_as_package() {
    let repo = TestRepo::new();
    repo.write("tests/test_flaky.py", HEALTHY_TEST);
    let churn = FixedChurn::default().with("test_flaky.py", 9);

    let summary = run(&repo, &Config::default(), &FakeCoverage::new(), &churn);

    assert_eq!(verdict_for(&summary, "test_flaky.py").action, Action::Quarantine);
    assert!(!repo.exists("tests/test_flaky.py"));
    assert_eq!(repo.read("tests/quarantine/test_flaky.py"), HEALTHY_TEST);
    assert!(repo.exists("tests/quarantine/__init__.py"));

    // Quarantined files are not rediscovered.
    let again = run(&repo, &Config::default(), &FakeCoverage::new(), &churn);
    assert!(again.files.is_empty());
}

#[test]
fn report_only_mode_never_mutates() {
    let repo = TestRepo::new();
    repo.write("tests/test_taut.py", TAUTOLOGY_TEST);
    let config = Config {
        execution_mode: ExecutionMode::ReportOnly,
        ..Config::default()
    };

    let summary = run(&repo, &config, &FakeCoverage::new(), &FixedChurn::default());

    assert_eq!(summary.outcome, RunOutcome::Ok);
    assert!(repo.exists("tests/test_taut.py"));
    let report = repo.read("entropy_report.md");
    assert!(report.contains("Mode: `REPORT_ONLY`"));
    assert!(report.contains("DELETE (suggested)"));
}

#[test]
fn dry_run_overrides_pr_suggestion() {
    let repo = TestRepo::new();
    repo.write("tests/test_taut.py", TAUTOLOGY_TEST);
    let options = RunOptions {
        dry_run: true,
        report_path: Some(repo.path("out/report.md")),
        ..RunOptions::default()
    };

    let summary = run_with(
        &repo,
        &Config::default(),
        &FakeCoverage::new(),
        &FixedChurn::default(),
        &options,
    );

    assert_eq!(summary.effective_mode(), ExecutionMode::ReportOnly);
    assert!(repo.exists("tests/test_taut.py"));
    assert!(repo.exists("out/report.md"));
    assert!(!repo.exists("entropy_report.md"));
}

#[test]
fn coverage_cliff_trips_after_deletion() {
    let repo = TestRepo::new();
    repo.write("tests/test_taut.py", TAUTOLOGY_TEST);
    repo.write("tests/test_good.py", HEALTHY_TEST);
    let coverage = FakeCoverage {
        points_per_test: 2.0,
        ..FakeCoverage::new().unique("test_good.py", 4)
    };

    let summary = run(&repo, &Config::default(), &coverage, &FixedChurn::default());

    assert_eq!(summary.outcome, RunOutcome::CoverageCliff);
    assert_eq!(summary.exit_code(), 3);
    match summary.cliff {
        CliffCheck::Tripped { baseline, post, .. } => {
            assert!((baseline - 74.0).abs() < 1e-9);
            assert_eq!(post, Some(72.0));
        }
        other => panic!("expected tripped cliff, got {other:?}"),
    }
    // Detective only: the deletion stands.
    assert!(!repo.exists("tests/test_taut.py"));
    assert!(repo.read("entropy_report.md").contains("Coverage cliff"));
}

#[test]
fn removing_the_whole_suite_trips_cliff() {
    let repo = TestRepo::new();
    repo.write("tests/test_a.py", TAUTOLOGY_TEST);
    repo.write("tests/test_b.py", TAUTOLOGY_TEST);

    // The fake reports the base percentage for any target list, like a runner
    // that falls back to collecting the whole project.
    let summary = run(&repo, &Config::default(), &FakeCoverage::new(), &FixedChurn::default());

    assert!(!repo.exists("tests/test_a.py"));
    assert!(!repo.exists("tests/test_b.py"));
    assert_eq!(summary.outcome, RunOutcome::CoverageCliff);
    match summary.cliff {
        CliffCheck::Tripped { baseline, post, .. } => {
            assert!((baseline - 70.0).abs() < 1e-9);
            assert_eq!(post, Some(0.0));
        }
        other => panic!("expected tripped cliff, got {other:?}"),
    }
}

#[test]
fn missing_baseline_skips_cliff_check() {
    let repo = TestRepo::new();
    repo.write("tests/test_taut.py", TAUTOLOGY_TEST);
    let coverage = FakeCoverage {
        totals_available: false,
        ..FakeCoverage::new()
    };

    let summary = run(&repo, &Config::default(), &coverage, &FixedChurn::default());

    assert_eq!(summary.cliff, CliffCheck::Skipped);
    assert_eq!(summary.outcome, RunOutcome::Ok);
    assert!(!repo.exists("tests/test_taut.py"));
}

#[test]
fn unreadable_and_broken_files_do_not_stop_the_run() {
    let repo = TestRepo::new();
    repo.write("tests/test_broken.py", "def test_x(:\n    mock.patch(\n");
    fs::write(repo.path("tests/test_binary.py"), [0xff, 0xfe, 0x00]).unwrap();
    repo.write("tests/test_taut.py", TAUTOLOGY_TEST);
    let config = Config {
        execution_mode: ExecutionMode::ReportOnly,
        ..Config::default()
    };

    let summary = run(&repo, &config, &FakeCoverage::new(), &FixedChurn::default());

    assert_eq!(summary.files.len(), 3);
    let binary = summary
        .files
        .iter()
        .find(|h| h.path.ends_with("test_binary.py"))
        .unwrap();
    assert_eq!(binary.loc, 0);
    let broken = summary
        .files
        .iter()
        .find(|h| h.path.ends_with("test_broken.py"))
        .unwrap();
    assert_eq!(broken.loc, 2);
    assert!(!broken.tautology_detected);
    assert_eq!(verdict_for(&summary, "test_taut.py").action, Action::Delete);
}

#[test]
fn cancelled_run_applies_nothing() {
    let repo = TestRepo::new();
    repo.write("tests/test_taut.py", TAUTOLOGY_TEST);
    let config = Config::default();
    let coverage = FakeCoverage::new();
    let churn = FixedChurn::default();
    let cancel = AtomicBool::new(true);

    let summary = Pipeline::new(&config, repo.root(), &coverage, &churn, ActivityLoggerHandle::disabled())
        .run(&RunOptions::default(), &cancel)
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Cancelled);
    assert_eq!(summary.exit_code(), 130);
    assert!(repo.exists("tests/test_taut.py"));
}
