//! Churn analyzer: commits touching a file within a trailing window.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::core::config::Config;
use crate::core::errors::{EntropyError, Result};
use crate::platform::process::{describe, run_with_timeout};

/// Source of per-file commit counts.
pub trait ChurnSource: Send + Sync {
    /// Commits touching `path` inside the window. Errors are for logging only;
    /// callers treat any error as zero churn.
    fn commits_in_window(&self, path: &Path) -> Result<u32>;

    /// Infallible form: any failure counts as zero.
    fn churn_rate(&self, path: &Path) -> u32 {
        self.commits_in_window(path).unwrap_or(0)
    }
}

/// `git log` backed churn source.
#[derive(Debug, Clone)]
pub struct GitChurn {
    repo_root: PathBuf,
    git_command: String,
    window_days: u32,
    timeout: Duration,
}

impl GitChurn {
    pub fn new(repo_root: &Path, config: &Config) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            git_command: config.churn.git_command.clone(),
            window_days: config.churn_window_days,
            timeout: Duration::from_secs(config.churn.timeout_secs),
        }
    }

    fn command(&self, path: &Path) -> Command {
        let mut cmd = Command::new(&self.git_command);
        cmd.current_dir(&self.repo_root)
            .arg("log")
            .arg(format!("--since={}.days.ago", self.window_days))
            .arg("--format=%H")
            .arg("--")
            .arg(path);
        cmd
    }
}

impl ChurnSource for GitChurn {
    fn commits_in_window(&self, path: &Path) -> Result<u32> {
        let mut cmd = self.command(path);
        let output = run_with_timeout(&mut cmd, self.timeout)?;
        if !output.success {
            return Err(EntropyError::Runtime {
                details: format!(
                    "{} exited with {}: {}",
                    describe(&cmd),
                    output.code.unwrap_or(-1),
                    output.stderr.trim()
                ),
            });
        }
        Ok(count_commits(&output.stdout))
    }
}

/// Fixed churn for every file. Used when history is unavailable by choice.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoChurn;

impl ChurnSource for NoChurn {
    fn commits_in_window(&self, _path: &Path) -> Result<u32> {
        Ok(0)
    }
}

fn count_commits(stdout: &str) -> u32 {
    let count = stdout.lines().filter(|line| !line.trim().is_empty()).count();
    u32::try_from(count).unwrap_or(u32::MAX)
}
