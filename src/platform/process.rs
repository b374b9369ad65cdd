//! External process execution with a hard timeout.
//!
//! Every subprocess the auditor launches (test runner, coverage tool, version
//! control) goes through `run_with_timeout`. The child leads its own process
//! group so that descendants holding its pipes can be killed with it. Output
//! is drained on helper threads and handed back over a channel, so waiting for
//! it is bounded even when some descendant never closes its end.

#![allow(missing_docs)]

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::core::errors::{EntropyError, Result};

const POLL_MIN: Duration = Duration::from_millis(5);
const POLL_MAX: Duration = Duration::from_millis(100);
/// How long to wait for pipe EOF once the direct child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Captured result of a finished subprocess.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Human-readable `program arg1 arg2` rendering for logs and errors.
pub fn describe(command: &Command) -> String {
    let mut parts = vec![command.get_program().to_string_lossy().into_owned()];
    parts.extend(command.get_args().map(|arg| arg.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Run `command` to completion or kill it after `timeout`.
///
/// Spawn failures map to `Io`, deadline overruns to `ToolTimeout`. A non-zero
/// exit is not an error here; callers inspect `success`. Descendants left
/// behind by the child are killed once it exits, and output they were still
/// holding open is truncated.
pub fn run_with_timeout(command: &mut Command, timeout: Duration) -> Result<ProcessOutput> {
    let label = describe(command);
    let started = Instant::now();

    own_process_group(command);
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| EntropyError::io(PathBuf::from(command.get_program()), source))?;

    let mut pipes = Pipes::drain(&mut child);

    let status = match wait_deadline(&mut child, started + timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            kill_group(&mut child);
            let _ = child.wait();
            pipes.collect(Instant::now() + DRAIN_GRACE);
            return Err(EntropyError::ToolTimeout {
                command: label,
                timeout_secs: timeout.as_secs(),
            });
        }
        Err(source) => {
            kill_group(&mut child);
            let _ = child.wait();
            return Err(EntropyError::io(PathBuf::from(command.get_program()), source));
        }
    };

    if !pipes.collect(Instant::now() + DRAIN_GRACE) {
        // Some descendant still holds a pipe; its group id stays reserved while it lives.
        kill_group(&mut child);
        pipes.collect(Instant::now() + DRAIN_GRACE);
    }

    Ok(ProcessOutput {
        code: status.code(),
        success: status.success(),
        stdout: pipes.stdout.unwrap_or_default(),
        stderr: pipes.stderr.unwrap_or_default(),
        elapsed: started.elapsed(),
    })
}

#[cfg(unix)]
fn own_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_command: &mut Command) {}

/// SIGKILL the child's whole process group.
#[cfg(unix)]
fn kill_group(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Ok(pid) = i32::try_from(child.id()) {
        let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    let _ = child.kill();
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Output of both pipes, filled in as reader threads reach EOF.
struct Pipes {
    rx: Receiver<(Stream, String)>,
    stdout: Option<String>,
    stderr: Option<String>,
}

impl Pipes {
    fn drain(child: &mut Child) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(2);
        read_to_channel(child.stdout.take(), Stream::Stdout, tx.clone());
        read_to_channel(child.stderr.take(), Stream::Stderr, tx);
        Self {
            rx,
            stdout: None,
            stderr: None,
        }
    }

    /// Wait until `deadline` for both streams. `true` once both hit EOF.
    fn collect(&mut self, deadline: Instant) -> bool {
        while self.stdout.is_none() || self.stderr.is_none() {
            match self.rx.recv_deadline(deadline) {
                Ok((Stream::Stdout, text)) => self.stdout = Some(text),
                Ok((Stream::Stderr, text)) => self.stderr = Some(text),
                Err(_) => return false,
            }
        }
        true
    }
}

/// `Ok(None)` when the deadline passed before the child exited.
fn wait_deadline(
    child: &mut Child,
    deadline: Instant,
) -> std::io::Result<Option<std::process::ExitStatus>> {
    let mut poll = POLL_MIN;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(poll.min(deadline - now));
        poll = (poll * 2).min(POLL_MAX);
    }
}

fn read_to_channel<R: Read + Send + 'static>(pipe: Option<R>, stream: Stream, tx: Sender<(Stream, String)>) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send((stream, String::from_utf8_lossy(&buf).into_owned()));
    });
}
