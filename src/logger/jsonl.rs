//! JSONL activity log: one self-contained JSON object per line.
//!
//! Lines are assembled in memory and written with a single `write_all` so a
//! tailing process never sees a half line. The writer degrades from the
//! configured file to stderr and finally to silent discard: an audit run must
//! never fail because its log could not be written.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{EntropyError, Result};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Event types emitted over one audit run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    FileAnalyzed,
    Warning,
    VerdictIssued,
    RemediationApplied,
    RemediationFailed,
    VibeCheckAborted,
    CoverageCliff,
    RunCompleted,
}

/// A single JSONL log entry. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp with millisecond precision.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// Test file the event concerns, relative to the project root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_coverage: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// ENT error code when the event records a failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Freeform details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: utc_timestamp(),
            event,
            severity,
            path: None,
            action: None,
            tags: None,
            score: None,
            unique_coverage: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    /// Attach an error's code and message.
    #[must_use]
    pub fn with_error(mut self, err: &EntropyError) -> Self {
        self.ok = Some(false);
        self.error_code = Some(err.code().to_string());
        self.error_message = Some(err.to_string());
        self
    }
}

/// Where the next line goes. Each fallback is strictly weaker than the last.
enum Sink {
    File {
        out: BufWriter<File>,
        len: u64,
    },
    Stderr,
    Discard,
}

/// Log destination and rotation policy.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    /// Log file path. `None` writes to stderr.
    pub path: Option<PathBuf>,
    /// Size at which the file is rotated, in bytes.
    pub max_size_bytes: u64,
    /// Rotated generations kept next to the live file (`run.jsonl.1` ...).
    pub max_rotated_files: u32,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_size_bytes: 10 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

/// Append-only JSONL writer with size-based rotation.
pub struct JsonlWriter {
    config: JsonlConfig,
    sink: Sink,
}

impl JsonlWriter {
    /// Open the log. Never fails; an unusable file means stderr.
    pub fn open(config: JsonlConfig) -> Self {
        let sink = match config.path.as_deref().map(file_sink) {
            Some(Ok(sink)) => sink,
            Some(Err(e)) => {
                let _ = writeln!(io::stderr(), "[ENT-JSONL] {e}; logging to stderr");
                Sink::Stderr
            }
            None => Sink::Stderr,
        };
        Self { config, sink }
    }

    /// Serialize `entry` and append it as one line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(mut line) => {
                line.push('\n');
                self.append(&line);
            }
            Err(e) => {
                let _ = writeln!(io::stderr(), "[ENT-JSONL] unserializable entry: {e}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Sink::File { out, .. } = &mut self.sink {
            let _ = out.flush();
        }
    }

    /// `file`, `stderr` or `discard`.
    pub fn state(&self) -> &'static str {
        match self.sink {
            Sink::File { .. } => "file",
            Sink::Stderr => "stderr",
            Sink::Discard => "discard",
        }
    }

    // ──────────────────────── internals ────────────────────────

    fn append(&mut self, line: &str) {
        let incoming = line.len() as u64;
        if matches!(&self.sink, Sink::File { len, .. } if len + incoming > self.config.max_size_bytes)
        {
            self.rotate();
        }

        let failed = match &mut self.sink {
            Sink::File { out, len } => {
                let ok = out.write_all(line.as_bytes()).is_ok();
                if ok {
                    *len += incoming;
                }
                !ok
            }
            Sink::Stderr => write!(io::stderr(), "[ENT-JSONL] {line}").is_err(),
            Sink::Discard => false,
        };
        if failed {
            let was_file = matches!(self.sink, Sink::File { .. });
            self.fall_back();
            if was_file {
                self.append(line);
            }
        }
    }

    fn fall_back(&mut self) {
        self.sink = match self.sink {
            Sink::File { .. } => {
                let _ = writeln!(io::stderr(), "[ENT-JSONL] log file write failed; logging to stderr");
                Sink::Stderr
            }
            Sink::Stderr | Sink::Discard => Sink::Discard,
        };
    }

    /// `run.jsonl.{n-1}` -> `run.jsonl.{n}` ... `run.jsonl` -> `run.jsonl.1`.
    fn rotate(&mut self) {
        self.flush();
        let Some(base) = self.config.path.clone() else {
            return;
        };
        let keep = self.config.max_rotated_files;
        if keep == 0 {
            let _ = fs::remove_file(&base);
        } else {
            for generation in (1..keep).rev() {
                let _ = fs::rename(generation_path(&base, generation), generation_path(&base, generation + 1));
            }
            let _ = fs::rename(&base, generation_path(&base, 1));
        }

        self.sink = match file_sink(&base) {
            Ok(sink) => sink,
            Err(_) => Sink::Stderr,
        };
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        self.flush();
    }
}

// ──────────────────────── helpers ────────────────────────

/// Append-mode file sink, creating parent directories.
fn file_sink(path: &Path) -> Result<Sink> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| EntropyError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| EntropyError::io(path, source))?;
    let len = file.metadata().map_or(0, |m| m.len());
    Ok(Sink::File {
        out: BufWriter::with_capacity(16 * 1024, file),
        len,
    })
}

fn generation_path(base: &Path, generation: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}

fn utc_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
