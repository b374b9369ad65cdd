//! Static health scan of one test file: size, mock density, tautologies, literals.
//!
//! The scanner never fails on malformed source. A file that does not parse
//! still gets `loc` and `token_cost`, with mock density from a lexical scan;
//! an unreadable file is reported to the caller, which records a zeroed health
//! record.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::fs;
use std::path::Path;

use regex::Regex;
use serde::Serialize;
use tree_sitter::Parser;

use crate::core::errors::{EntropyError, Result};
use crate::core::model::LiteralCandidate;
use crate::scanner::python::{self, MOCK_CONFIG_NAMES, MOCK_VOCABULARY};

/// Characters per token in the context-cost heuristic.
const CHARS_PER_TOKEN: usize = 4;

/// Result of scanning one source file.
#[derive(Debug, Clone, Serialize)]
pub struct HealthScan {
    pub loc: usize,
    pub token_cost: u64,
    pub mock_lines: usize,
    pub mock_density: f64,
    pub tautology_detected: bool,
    #[serde(skip)]
    pub literal_candidates: Vec<LiteralCandidate>,
    pub literal_count: usize,
    /// Set when structural parsing failed and lexical fallbacks were used.
    pub syntax_error: Option<String>,
}

impl HealthScan {
    pub fn zeroed() -> Self {
        Self {
            loc: 0,
            token_cost: 0,
            mock_lines: 0,
            mock_density: 0.0,
            tautology_detected: false,
            literal_candidates: Vec::new(),
            literal_count: 0,
            syntax_error: None,
        }
    }
}

/// Reusable scanner holding a Python parser.
pub struct HealthScanner {
    parser: Parser,
    lexical_mock: Regex,
    large_literal_threshold: usize,
}

impl HealthScanner {
    pub fn new(large_literal_threshold: usize) -> Result<Self> {
        let alternatives: Vec<String> = MOCK_VOCABULARY
            .iter()
            .chain(MOCK_CONFIG_NAMES)
            .map(|word| regex::escape(word))
            .collect();
        let lexical_mock = Regex::new(&format!("(?i){}", alternatives.join("|"))).map_err(|e| {
            EntropyError::Runtime {
                details: format!("lexical mock pattern: {e}"),
            }
        })?;

        Ok(Self {
            parser: python::new_parser()?,
            lexical_mock,
            large_literal_threshold,
        })
    }

    /// Read and scan a file. Unreadable or non-UTF-8 files are errors.
    pub fn scan_file(&mut self, path: &Path) -> Result<HealthScan> {
        let bytes = fs::read(path).map_err(|source| EntropyError::io(path, source))?;
        let source = String::from_utf8(bytes).map_err(|e| EntropyError::ParseFailure {
            path: path.to_path_buf(),
            details: format!("not valid UTF-8: {e}"),
        })?;
        Ok(self.scan_source(&source))
    }

    /// Scan source text. Never fails.
    pub fn scan_source(&mut self, source: &str) -> HealthScan {
        let code_rows = code_rows(source);
        let loc = code_rows.iter().filter(|is_code| **is_code).count();
        let token_cost = (source.chars().count() / CHARS_PER_TOKEN) as u64;

        let tree = self.parser.parse(source, None);
        let syntax_error = match &tree {
            Some(tree) => python::first_syntax_error(tree),
            None => Some("parser produced no tree".to_string()),
        };

        let (mock_lines, tautology_detected, literal_candidates) = match (&tree, &syntax_error) {
            (Some(tree), None) => {
                let findings = python::analyze(tree, source, self.large_literal_threshold);
                let mock_lines = findings
                    .mock_rows
                    .iter()
                    .filter(|row| code_rows.get(**row).copied().unwrap_or(false))
                    .count();
                (
                    mock_lines,
                    findings.tautology_detected,
                    findings.literal_candidates,
                )
            }
            _ => (self.lexical_mock_lines(source), false, Vec::new()),
        };

        HealthScan {
            loc,
            token_cost,
            mock_lines,
            mock_density: density(mock_lines, loc),
            tautology_detected,
            literal_count: literal_candidates.len(),
            literal_candidates,
            syntax_error,
        }
    }

    fn lexical_mock_lines(&self, source: &str) -> usize {
        lines(source)
            .filter(|line| is_code_line(line))
            .filter(|line| self.lexical_mock.is_match(strip_trailing_comment(line)))
            .count()
    }
}

/// `mock_lines / loc`, clamped to `[0, 1]`; zero for an empty file.
pub fn density(mock_lines: usize, loc: usize) -> f64 {
    if loc == 0 {
        return 0.0;
    }
    (mock_lines as f64 / loc as f64).clamp(0.0, 1.0)
}

/// Per-row flag: non-blank and not comment-only.
fn code_rows(source: &str) -> Vec<bool> {
    lines(source).map(is_code_line).collect()
}

fn is_code_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && !trimmed.starts_with('#')
}

fn strip_trailing_comment(line: &str) -> &str {
    line.split_once(" #").map_or(line, |(code, _)| code)
}

/// Lines split on `\n`, tolerating `\r\n`.
pub fn lines(source: &str) -> impl Iterator<Item = &str> {
    let bytes = source.as_bytes();
    let mut start = 0usize;
    let mut breaks = memchr::memchr_iter(b'\n', bytes);
    std::iter::from_fn(move || {
        if start > bytes.len() {
            return None;
        }
        let end = breaks.next().unwrap_or(bytes.len());
        let line = source.get(start..end).unwrap_or("");
        let line = line.strip_suffix('\r').unwrap_or(line);
        let at_end = end == bytes.len();
        start = end + 1;
        if at_end && line.is_empty() {
            return None;
        }
        Some(line)
    })
}
