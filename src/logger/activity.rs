//! Activity logger: a dedicated thread owns the `JsonlWriter`.
//!
//! Producers send `ActivityEvent`s through a bounded crossbeam channel. `send()`
//! uses `try_send()` so analysis and remediation never block on the log.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{EntropyError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

// ──────────────────── channel capacity ────────────────────

const CHANNEL_CAPACITY: usize = 1024;

// ──────────────────── public event type ────────────────────

/// Events emitted over one audit run.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    RunStarted {
        version: String,
        config_hash: String,
        root: String,
        mode: String,
    },
    FileAnalyzed {
        path: String,
        loc: usize,
        mock_density: f64,
        token_cost: u64,
        churn_rate: u32,
        unique_coverage: u64,
        duration_ms: u64,
    },
    /// A degraded-but-continuing failure (parse, coverage tool, config, churn).
    Warning {
        path: Option<String>,
        code: String,
        message: String,
    },
    VerdictIssued {
        path: String,
        action: String,
        tags: Vec<String>,
        score: u32,
        unique_coverage: u64,
    },
    RemediationApplied {
        path: String,
        action: String,
        details: String,
        duration_ms: u64,
    },
    RemediationFailed {
        path: String,
        action: String,
        error_code: String,
        error_message: String,
    },
    VibeCheckAborted {
        flagged: usize,
        cap: usize,
    },
    CoverageCliff {
        baseline_pct: f64,
        post_pct: Option<f64>,
        allowed_delta: f64,
    },
    RunCompleted {
        scanned: usize,
        actioned: usize,
        outcome: String,
        duration_ms: u64,
    },
    /// Sentinel to request graceful shutdown of the logger thread.
    Shutdown,
}

impl ActivityEvent {
    /// Warning event carrying an error's code and message.
    pub fn warning(path: Option<String>, err: &EntropyError) -> Self {
        Self::Warning {
            path,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ──────────────────── public handle ────────────────────

/// Cheaply-cloneable handle for sending log events.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// A handle with no logger thread behind it. Every event is discarded.
    pub fn disabled() -> Self {
        let (tx, _rx) = bounded::<ActivityEvent>(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Send an event to the logger thread. Non-blocking.
    ///
    /// A full channel drops the event and bumps the dropped-events counter.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of events dropped due to channel back-pressure.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

// ──────────────────── configuration ────────────────────

/// Options for building the activity logger.
pub struct ActivityLoggerConfig {
    pub jsonl_config: JsonlConfig,
    pub channel_capacity: usize,
}

impl Default for ActivityLoggerConfig {
    fn default() -> Self {
        Self {
            jsonl_config: JsonlConfig::default(),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread and return a handle plus its join handle.
///
/// The thread runs until `handle.shutdown()` is called or all senders drop.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("entropy-logger".to_string())
        .spawn(move || logger_thread_main(rx, config.jsonl_config, dropped_clone))
        .map_err(|e| EntropyError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

#[allow(clippy::needless_pass_by_value)]
fn logger_thread_main(rx: Receiver<ActivityEvent>, jsonl_config: JsonlConfig, dropped: Arc<AtomicU64>) {
    let mut jsonl = JsonlWriter::open(jsonl_config);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Warning, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }

        jsonl.write_entry(&event_to_log_entry(&event));
    }

    jsonl.flush();
}

// ──────────────────── event conversion ────────────────────

#[allow(clippy::too_many_lines)]
fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::RunStarted {
            version,
            config_hash,
            root,
            mode,
        } => {
            let mut e = LogEntry::new(EventType::RunStarted, Severity::Info);
            e.path = Some(root.clone());
            e.details = Some(format!("version={version} config_hash={config_hash} mode={mode}"));
            e
        }
        ActivityEvent::FileAnalyzed {
            path,
            loc,
            mock_density,
            token_cost,
            churn_rate,
            unique_coverage,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::FileAnalyzed, Severity::Info);
            e.path = Some(path.clone());
            e.unique_coverage = Some(*unique_coverage);
            e.duration_ms = Some(*duration_ms);
            e.details = Some(format!(
                "loc={loc} mock_density={mock_density:.3} token_cost={token_cost} churn={churn_rate}"
            ));
            e
        }
        ActivityEvent::Warning {
            path,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::Warning, Severity::Warning);
            e.path.clone_from(path);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::VerdictIssued {
            path,
            action,
            tags,
            score,
            unique_coverage,
        } => {
            let mut e = LogEntry::new(EventType::VerdictIssued, Severity::Info);
            e.path = Some(path.clone());
            e.action = Some(action.clone());
            e.tags = Some(tags.clone());
            e.score = Some(*score);
            e.unique_coverage = Some(*unique_coverage);
            e
        }
        ActivityEvent::RemediationApplied {
            path,
            action,
            details,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::RemediationApplied, Severity::Info);
            e.path = Some(path.clone());
            e.action = Some(action.clone());
            e.details = Some(details.clone());
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e
        }
        ActivityEvent::RemediationFailed {
            path,
            action,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::RemediationFailed, Severity::Warning);
            e.path = Some(path.clone());
            e.action = Some(action.clone());
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::VibeCheckAborted { flagged, cap } => {
            let mut e = LogEntry::new(EventType::VibeCheckAborted, Severity::Critical);
            e.details = Some(format!("flagged={flagged} cap={cap}"));
            e.ok = Some(false);
            e
        }
        ActivityEvent::CoverageCliff {
            baseline_pct,
            post_pct,
            allowed_delta,
        } => {
            let mut e = LogEntry::new(EventType::CoverageCliff, Severity::Critical);
            let post = post_pct.map_or_else(|| "unavailable".to_string(), |p| format!("{p:.2}"));
            e.details = Some(format!(
                "baseline={baseline_pct:.2} post={post} allowed_delta={allowed_delta}"
            ));
            e.ok = Some(false);
            e
        }
        ActivityEvent::RunCompleted {
            scanned,
            actioned,
            outcome,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::RunCompleted, Severity::Info);
            e.duration_ms = Some(*duration_ms);
            e.details = Some(format!("scanned={scanned} actioned={actioned} outcome={outcome}"));
            e.ok = Some(outcome == "ok");
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::RunCompleted, Severity::Info),
    }
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path, capacity: usize) -> ActivityLoggerConfig {
        ActivityLoggerConfig {
            jsonl_config: JsonlConfig {
                path: Some(dir.join("activity.jsonl")),
                max_size_bytes: 10 * 1024 * 1024,
                max_rotated_files: 2,
            },
            channel_capacity: capacity,
        }
    }

    #[test]
    fn spawn_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path(), 64)).unwrap();
        handle.send(ActivityEvent::RunStarted {
            version: "0.1.0".to_string(),
            config_hash: "abc".to_string(),
            root: "/repo".to_string(),
            mode: "PR_SUGGESTION".to_string(),
        });
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("activity.jsonl")).unwrap();
        assert!(contents.contains("run_started"));
        assert!(contents.contains("config_hash=abc"));
    }

    #[test]
    fn events_from_cloned_handles_are_logged_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path(), 64)).unwrap();
        let h2 = handle.clone();

        handle.send(ActivityEvent::VerdictIssued {
            path: "tests/test_a.py".to_string(),
            action: "DELETE".to_string(),
            tags: vec!["TAUTOLOGY".to_string()],
            score: 50,
            unique_coverage: 0,
        });
        h2.send(ActivityEvent::RemediationFailed {
            path: "tests/test_b.py".to_string(),
            action: "QUARANTINE".to_string(),
            error_code: "ENT-3001".to_string(),
            error_message: "permission denied".to_string(),
        });
        handle.send(ActivityEvent::VibeCheckAborted {
            flagged: 25,
            cap: 20,
        });
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("activity.jsonl")).unwrap();
        let events: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["event"], "verdict_issued");
        assert_eq!(events[1]["error_code"], "ENT-3001");
        assert_eq!(events[1]["ok"], false);
        assert_eq!(events[2]["severity"], "critical");
    }

    #[test]
    fn warning_event_from_error() {
        let err = EntropyError::ParseFailure {
            path: "tests/test_bad.py".into(),
            details: "invalid utf-8".to_string(),
        };
        let entry = event_to_log_entry(&ActivityEvent::warning(
            Some("tests/test_bad.py".to_string()),
            &err,
        ));
        assert_eq!(entry.event, EventType::Warning);
        assert_eq!(entry.error_code.as_deref(), Some("ENT-2001"));
    }

    #[test]
    fn disabled_handle_discards_silently() {
        let handle = ActivityLoggerHandle::disabled();
        for _ in 0..10 {
            handle.send(ActivityEvent::VibeCheckAborted { flagged: 1, cap: 0 });
        }
        handle.shutdown();
        assert_eq!(handle.dropped_events(), 0);
    }

    #[test]
    fn dropping_all_senders_stops_thread() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path(), 4)).unwrap();
        drop(handle);
        join.join().unwrap();
    }
}
