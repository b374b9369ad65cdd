//! Property-based tests for the analyzer's cross-module invariants.
//!
//! Uses `proptest` to check that unique coverage is exclusive, that critical
//! files never receive a destructive action, and that edit application is
//! order-independent and all-or-nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use proptest::prelude::*;

use crate::core::model::{Action, TestFileHealth};
use crate::coverage::engine::unique_counts;
use crate::coverage::report::SourceLine;
use crate::decision::safety::VibeCheck;
use crate::decision::verdict::{MAX_SCORE, VerdictEngine, VerdictThresholds};
use crate::remediation::rewrite::{Edit, apply_edits};

// ──────────────────── strategies ────────────────────

fn arb_line() -> impl Strategy<Value = SourceLine> {
    (prop_oneof![Just("src/a.py"), Just("src/b.py"), Just("src/c.py")], 1u32..25)
        .prop_map(|(file, line)| (file.to_string(), line))
}

fn arb_covered() -> impl Strategy<Value = BTreeMap<PathBuf, BTreeSet<SourceLine>>> {
    prop::collection::vec(prop::collection::btree_set(arb_line(), 0..30), 0..6).prop_map(
        |sets| {
            sets.into_iter()
                .enumerate()
                .map(|(i, lines)| (PathBuf::from(format!("tests/test_{i}.py")), lines))
                .collect()
        },
    )
}

fn arb_health(critical: bool) -> impl Strategy<Value = TestFileHealth> {
    (
        0.0f64..=1.0,
        0u64..6000,
        0u32..20,
        0u64..10,
        any::<bool>(),
    )
        .prop_map(move |(mock_density, token_cost, churn_rate, unique, tautology)| {
            TestFileHealth {
                loc: 40,
                mock_density,
                token_cost,
                churn_rate,
                unique_coverage: unique,
                is_critical: critical,
                tautology_detected: tautology,
                ..TestFileHealth::zeroed("tests/test_prop.py")
            }
        })
}

fn engine() -> VerdictEngine {
    VerdictEngine::new(VerdictThresholds {
        max_mock_density: 0.55,
        max_token_context: 2000,
        churn_threshold_commits: 5,
    })
}

/// ASCII source plus a set of disjoint spans with replacements.
fn arb_source_and_edits() -> impl Strategy<Value = (String, Vec<Edit>)> {
    "[a-z \n]{0,60}".prop_flat_map(|source| {
        let len = source.len();
        (
            Just(source),
            prop::collection::btree_set(0..=len, 0..8),
            prop::collection::vec("[A-Z]{0,4}", 4),
        )
            .prop_map(|(source, cuts, replacements)| {
                let cuts: Vec<usize> = cuts.into_iter().collect();
                let edits = cuts
                    .chunks_exact(2)
                    .zip(replacements)
                    .map(|(pair, replacement)| Edit {
                        start: pair[0],
                        end: pair[1],
                        replacement,
                    })
                    .collect();
                (source, edits)
            })
    })
}

/// Forward splice used as the reference result.
fn splice_forward(source: &str, edits: &[Edit]) -> String {
    let mut sorted = edits.to_vec();
    sorted.sort_by_key(|e| e.start);
    let mut out = String::new();
    let mut cursor = 0;
    for edit in &sorted {
        out.push_str(&source[cursor..edit.start]);
        out.push_str(&edit.replacement);
        cursor = edit.end;
    }
    out.push_str(&source[cursor..]);
    out
}

// ──────────────────── properties ────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn unique_coverage_is_exclusive(covered in arb_covered()) {
        let unique = unique_counts(&covered);
        let distinct: BTreeSet<&SourceLine> = covered.values().flatten().collect();
        let total: u64 = unique.values().sum();
        prop_assert!(total <= distinct.len() as u64);

        for (test, lines) in &covered {
            let others: BTreeSet<&SourceLine> = covered
                .iter()
                .filter(|(other, _)| *other != test)
                .flat_map(|(_, l)| l)
                .collect();
            let expected = lines.iter().filter(|line| !others.contains(line)).count() as u64;
            prop_assert_eq!(unique[test], expected);
        }
    }

    #[test]
    fn duplicating_a_test_zeroes_both_copies(covered in arb_covered()) {
        prop_assume!(!covered.is_empty());
        let mut doubled = covered.clone();
        let (first, lines) = covered.iter().next().map(|(p, l)| (p.clone(), l.clone())).unwrap();
        doubled.insert(PathBuf::from("tests/test_copy.py"), lines);
        let unique = unique_counts(&doubled);
        prop_assert_eq!(unique[&first], 0);
        prop_assert_eq!(unique[&PathBuf::from("tests/test_copy.py")], 0);
    }

    #[test]
    fn critical_files_are_never_removed(health in arb_health(true)) {
        let verdict = engine().evaluate(&health);
        prop_assert!(!matches!(verdict.action, Action::Delete | Action::Quarantine));
    }

    #[test]
    fn score_is_bounded(health in arb_health(false)) {
        let verdict = engine().evaluate(&health);
        prop_assert!(verdict.score <= MAX_SCORE);
    }

    #[test]
    fn vibe_check_counts_only_destructive(records in prop::collection::vec(arb_health(false), 0..30), cap in 0usize..30) {
        let verdicts = engine().evaluate_batch(&records);
        let check = VibeCheck::evaluate(&verdicts, cap);
        let destructive = verdicts
            .iter()
            .filter(|v| matches!(v.action, Action::Delete | Action::Quarantine))
            .count();
        prop_assert_eq!(check.flagged, destructive);
        prop_assert_eq!(check.aborted(), destructive > cap);
    }

    #[test]
    fn disjoint_edits_apply_in_any_order((source, edits) in arb_source_and_edits(), reverse in any::<bool>()) {
        let expected = splice_forward(&source, &edits);
        let mut shuffled = edits.clone();
        if reverse {
            shuffled.reverse();
        }
        prop_assert_eq!(apply_edits(&source, shuffled).unwrap(), expected);
    }

    #[test]
    fn overlapping_edits_are_rejected(source in "[a-z]{4,40}", start in 0usize..3, width in 2usize..4) {
        let end = (start + width).min(source.len());
        let edits = vec![
            Edit { start, end, replacement: "X".to_string() },
            Edit { start: start + 1, end, replacement: "Y".to_string() },
        ];
        let err = apply_edits(&source, edits).unwrap_err();
        prop_assert_eq!(err.code(), "ENT-2003");
    }
}
