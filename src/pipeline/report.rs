//! Markdown audit trail for one run.

#![allow(missing_docs)]

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::core::errors::{EntropyError, Result};
use crate::core::paths::display_relative;
use crate::decision::safety::CliffCheck;
use crate::pipeline::RunSummary;
use crate::remediation::executor::ActionOutcome;

pub const REPORT_TITLE: &str = "# [Entropy] Maintenance Report";
pub const CLEAN_MESSAGE: &str = "No actionable items found. Repository is clean.";

/// Render the report. One table row per file with a non-NONE verdict.
#[must_use]
pub fn render(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{REPORT_TITLE}\n");
    let _ = writeln!(out, "Mode: `{}`\n", summary.effective_mode());
    let _ = writeln!(out, "{}\n", summary_line(summary));

    if summary.vibe_check.aborted() {
        let _ = writeln!(
            out,
            "> **Vibe check failed:** {} files flagged for DELETE/QUARANTINE (cap {}). \
             No changes were applied; actions below were not executed.\n",
            summary.vibe_check.flagged, summary.vibe_check.cap
        );
    }
    match summary.cliff {
        CliffCheck::Tripped {
            baseline,
            post,
            allowed_delta,
        } => {
            let post = post.map_or_else(|| "unavailable".to_string(), |p| format!("{p:.2}%"));
            let _ = writeln!(
                out,
                "> **Coverage cliff:** aggregate coverage went from {baseline:.2}% to {post} \
                 (allowed drop {allowed_delta} points). Review the applied changes and roll back if needed.\n"
            );
        }
        CliffCheck::Skipped => {
            let _ = writeln!(
                out,
                "> Coverage baseline unavailable; the coverage cliff check was skipped.\n"
            );
        }
        CliffCheck::NotRequired | CliffCheck::Passed { .. } => {}
    }
    if summary.cancelled {
        let _ = writeln!(out, "> Run cancelled before completion.\n");
    }

    if summary.remediation.records.is_empty() {
        let _ = writeln!(out, "{CLEAN_MESSAGE}");
        return out;
    }

    out.push_str("| File | Rot Tags | Unique Coverage | Action Taken | Rationale |\n");
    out.push_str("|---|---|---|---|---|\n");
    for record in &summary.remediation.records {
        let verdict = &record.verdict;
        let unique = summary.unique_coverage_of(&verdict.path);
        let mut rationale = verdict.rationale.clone();
        match &record.outcome {
            ActionOutcome::Refactored { sidecars } => {
                let _ = write!(rationale, " (Extracted JSON: {})", sidecars.len());
            }
            ActionOutcome::Failed { code, message } => {
                let _ = write!(rationale, " ({code}: {message})");
            }
            _ => {}
        }
        let _ = writeln!(
            out,
            "| {} | {} | {} lines | {} | {} |",
            cell(&display_relative(&summary.root, &verdict.path)),
            cell(&verdict.tags_label()),
            unique,
            record.outcome.label(verdict.action),
            cell(&rationale),
        );
    }
    out
}

/// `Scanned N files. M actions suggested/taken.`
#[must_use]
pub fn summary_line(summary: &RunSummary) -> String {
    format!(
        "Scanned {} files. {} actions suggested/taken.",
        summary.files.len(),
        summary.remediation.records.len()
    )
}

/// Write the rendered report, creating parent directories.
pub fn write(path: &Path, markdown: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| EntropyError::io(parent, source))?;
    }
    fs::write(path, markdown).map_err(|source| EntropyError::io(path, source))
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\n', '\r'], " ")
}
