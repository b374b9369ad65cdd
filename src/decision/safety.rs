//! Safety gate: pre-execution blast-radius cap and post-execution coverage cliff.

#![allow(missing_docs)]

use crate::core::model::RotVerdict;

/// Result of the pre-execution vibe check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VibeCheck {
    /// Verdicts selecting DELETE or QUARANTINE.
    pub flagged: usize,
    pub cap: usize,
}

impl VibeCheck {
    /// Count destructive verdicts against `cap`.
    #[must_use]
    pub fn evaluate(verdicts: &[RotVerdict], cap: usize) -> Self {
        let flagged = verdicts.iter().filter(|v| v.action.is_destructive()).count();
        Self { flagged, cap }
    }

    /// True when the whole batch must skip execution.
    #[must_use]
    pub const fn aborted(&self) -> bool {
        self.flagged > self.cap
    }
}

/// Outcome of comparing aggregate coverage before and after remediation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CliffCheck {
    /// No destructive action ran, so nothing was re-measured.
    NotRequired,
    /// Baseline was unavailable; the check could not run.
    Skipped,
    Passed { baseline: f64, post: f64 },
    Tripped {
        baseline: f64,
        post: Option<f64>,
        allowed_delta: f64,
    },
}

impl CliffCheck {
    /// Compare baseline and post-run percentages.
    ///
    /// A missing post measurement with a known baseline trips the check: the
    /// suite may no longer run at all after remediation.
    #[must_use]
    pub fn evaluate(baseline: Option<f64>, post: Option<f64>, allowed_delta: f64) -> Self {
        let Some(baseline) = baseline else {
            return Self::Skipped;
        };
        match post {
            Some(post) if baseline - post <= allowed_delta => Self::Passed { baseline, post },
            post => Self::Tripped {
                baseline,
                post,
                allowed_delta,
            },
        }
    }

    #[must_use]
    pub const fn tripped(&self) -> bool {
        matches!(self, Self::Tripped { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Action;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn verdict(action: Action) -> RotVerdict {
        RotVerdict {
            path: PathBuf::from("tests/test_x.py"),
            score: 0,
            tags: BTreeSet::new(),
            action,
            rationale: String::new(),
        }
    }

    #[test]
    fn vibe_check_counts_only_destructive_actions() {
        let verdicts = vec![
            verdict(Action::Delete),
            verdict(Action::Quarantine),
            verdict(Action::CompactSnapshots),
            verdict(Action::None),
        ];
        let check = VibeCheck::evaluate(&verdicts, 2);
        assert_eq!(check.flagged, 2);
        assert!(!check.aborted());
        assert!(VibeCheck::evaluate(&verdicts, 1).aborted());
    }

    #[test]
    fn vibe_check_aborts_above_cap() {
        let verdicts: Vec<_> = (0..25).map(|_| verdict(Action::Delete)).collect();
        let check = VibeCheck::evaluate(&verdicts, 20);
        assert_eq!(check.flagged, 25);
        assert!(check.aborted());
        assert!(!VibeCheck::evaluate(&verdicts[..20], 20).aborted());
    }

    #[test]
    fn zero_cap_blocks_any_destructive_action() {
        assert!(VibeCheck::evaluate(&[verdict(Action::Quarantine)], 0).aborted());
        assert!(!VibeCheck::evaluate(&[verdict(Action::CompactSnapshots)], 0).aborted());
    }

    #[test]
    fn cliff_within_delta_passes() {
        let check = CliffCheck::evaluate(Some(80.0), Some(79.6), 0.5);
        assert_eq!(
            check,
            CliffCheck::Passed {
                baseline: 80.0,
                post: 79.6
            }
        );
        assert!(!CliffCheck::evaluate(Some(80.0), Some(85.0), 0.5).tripped());
    }

    #[test]
    fn cliff_beyond_delta_trips() {
        assert!(CliffCheck::evaluate(Some(80.0), Some(79.0), 0.5).tripped());
    }

    #[test]
    fn missing_measurements() {
        assert_eq!(CliffCheck::evaluate(None, Some(10.0), 0.5), CliffCheck::Skipped);
        assert!(CliffCheck::evaluate(Some(80.0), None, 0.5).tripped());
    }
}
