//! Parsers for coverage reports: coverage.py JSON and Cobertura XML.
//!
//! Each parser is strict and returns an error on malformed input. The engine
//! turns those errors into empty coverage plus a logged warning.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::Deserialize;

use crate::core::errors::{EntropyError, Result};

/// One measured source line: (source file as reported, 1-based line number).
pub type SourceLine = (String, u32);

/// Per-line contributing contexts, as reported by `coverage json --show-contexts`.
pub type LineContexts = BTreeMap<SourceLine, BTreeSet<String>>;

#[derive(Debug, Deserialize)]
struct JsonReport {
    #[serde(default)]
    files: BTreeMap<String, JsonFile>,
    #[serde(default)]
    totals: Option<JsonTotals>,
}

#[derive(Debug, Deserialize)]
struct JsonFile {
    #[serde(default)]
    executed_lines: Vec<u32>,
    #[serde(default)]
    contexts: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct JsonTotals {
    percent_covered: Option<f64>,
}

/// Parsed coverage.py JSON report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageReport {
    pub lines: BTreeSet<SourceLine>,
    pub contexts: LineContexts,
    /// Aggregate line coverage in percent.
    pub percent_covered: Option<f64>,
}

/// Parse a coverage.py JSON report (`coverage json [--show-contexts]`).
pub fn parse_json(raw: &str) -> Result<CoverageReport> {
    let report: JsonReport = serde_json::from_str(raw).map_err(|e| EntropyError::CoverageTool {
        context: "coverage json",
        details: e.to_string(),
    })?;

    let mut parsed = CoverageReport {
        percent_covered: report.totals.and_then(|t| t.percent_covered),
        ..CoverageReport::default()
    };

    for (file, data) in report.files {
        for line in data.executed_lines {
            parsed.lines.insert((file.clone(), line));
        }
        for (line, contexts) in data.contexts {
            let Ok(line) = line.parse::<u32>() else {
                continue;
            };
            parsed
                .contexts
                .entry((file.clone(), line))
                .or_default()
                .extend(contexts);
        }
    }

    Ok(parsed)
}

/// Parse a Cobertura XML report (`coverage xml`, `pytest --cov-report=xml`).
///
/// A line counts as covered when its `hits` attribute is anything but `0`.
/// The root `line-rate` (0..1) becomes `percent_covered` (0..100).
pub fn parse_cobertura(raw: &str) -> Result<CoverageReport> {
    let mut reader = Reader::from_str(raw);
    reader.config_mut().trim_text(true);

    let mut parsed = CoverageReport::default();
    let mut current_file: Option<String> = None;
    let mut saw_root = false;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) | Event::Empty(ref e) => match e.name().as_ref() {
                b"coverage" => {
                    saw_root = true;
                    parsed.percent_covered = attribute(e, b"line-rate")
                        .and_then(|rate| rate.parse::<f64>().ok())
                        .map(|rate| rate * 100.0);
                }
                b"class" => current_file = attribute(e, b"filename"),
                b"line" => {
                    let (Some(file), Some(number)) = (
                        current_file.as_ref(),
                        attribute(e, b"number").and_then(|n| n.parse::<u32>().ok()),
                    ) else {
                        continue;
                    };
                    let hits = attribute(e, b"hits").unwrap_or_default();
                    if hits.trim() != "0" {
                        parsed.lines.insert((file.clone(), number));
                    }
                }
                _ => {}
            },
            Event::End(ref e) if e.name().as_ref() == b"class" => current_file = None,
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(EntropyError::CoverageTool {
            context: "coverage xml",
            details: "missing <coverage> root element".to_string(),
        });
    }
    Ok(parsed)
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}
