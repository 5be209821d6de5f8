//! Subprocess supervision.
//!
//! One primitive for every process the harness owns — the game server, each
//! test client, and the packet capture: spawn with stdout/stderr redirected
//! to a log file, poll liveness, and stop with a graceful-then-forceful
//! protocol. A process is only ever stopped through [`ManagedProcess::stop`],
//! so a graceful SIGTERM always gets a chance to let the child flush its
//! final output before escalation.

use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

/// How often `stop` re-checks a child while waiting out the grace period.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    Server,
    Client,
    Capture,
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Server => "server",
            Self::Client => "client",
            Self::Capture => "capture",
        })
    }
}

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to open log file {path}: {source}")]
    LogFile { path: PathBuf, source: io::Error },
    #[error("failed to spawn {program}: {source}")]
    Spawn { program: String, source: io::Error },
}

impl SpawnError {
    /// True when the program itself is missing from the host, as opposed to
    /// failing to start for some other reason.
    pub fn is_program_missing(&self) -> bool {
        matches!(
            self,
            Self::Spawn { source, .. } if source.kind() == io::ErrorKind::NotFound
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process had already exited before `stop` was called; no signal
    /// was sent.
    AlreadyDead,
    /// The process exited within the grace period after SIGTERM.
    StoppedGracefully,
    /// The process ignored SIGTERM and was killed after one escalation.
    StoppedForcefully,
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AlreadyDead => "already dead",
            Self::StoppedGracefully => "stopped gracefully",
            Self::StoppedForcefully => "stopped forcefully",
        })
    }
}

/// Handle to a subprocess owned by the harness.
#[derive(Debug)]
pub struct ManagedProcess {
    pub kind: ProcessKind,
    pub pid: u32,
    pub log_path: PathBuf,
    started_at: Instant,
    child: Child,
}

/// Spawn a subprocess with stdout and stderr appended to `log_path`.
pub fn spawn(
    kind: ProcessKind,
    program: &str,
    args: &[String],
    envs: &[(String, String)],
    log_path: &Path,
) -> Result<ManagedProcess, SpawnError> {
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|source| SpawnError::LogFile {
            path: log_path.to_path_buf(),
            source,
        })?;
    let log_err = log.try_clone().map_err(|source| SpawnError::LogFile {
        path: log_path.to_path_buf(),
        source,
    })?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));

    let child = cmd.spawn().map_err(|source| SpawnError::Spawn {
        program: program.to_string(),
        source,
    })?;
    let pid = child.id();

    tracing::info!(%kind, pid, program, log = %log_path.display(), "spawned");

    Ok(ManagedProcess {
        kind,
        pid,
        log_path: log_path.to_path_buf(),
        started_at: Instant::now(),
        child,
    })
}

impl ManagedProcess {
    /// Check whether the child is still running.
    pub fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(_)) => false,
            Ok(None) => true,
            // Error checking — assume still running
            Err(_) => true,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Two-phase stop: SIGTERM, wait out `grace`, then SIGKILL.
    ///
    /// The graceful phase lets the child flush buffered output (a client's
    /// final metric rows, a capture's trailing packets) before collection
    /// ends.
    pub fn stop(&mut self, grace: Duration) -> StopOutcome {
        if !self.is_alive() {
            tracing::debug!(kind = %self.kind, pid = self.pid, "already exited before stop");
            return StopOutcome::AlreadyDead;
        }

        // SAFETY: `self.pid` is the OS process ID of our child. Sending
        // SIGTERM is safe; worst case is a no-op if the process already
        // exited (kill returns -1 / ESRCH).
        unsafe {
            libc::kill(self.pid as libc::pid_t, libc::SIGTERM);
        }

        if self.wait_until(grace) {
            tracing::info!(kind = %self.kind, pid = self.pid, "stopped gracefully");
            return StopOutcome::StoppedGracefully;
        }

        tracing::warn!(kind = %self.kind, pid = self.pid, "ignored SIGTERM, killing");
        let _ = self.child.kill();
        let _ = self.child.wait();
        StopOutcome::StoppedForcefully
    }

    /// Poll `try_wait` until the child exits or `timeout` elapses. Returns
    /// `true` if the child exited in time.
    fn wait_until(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return true,
                Ok(None) | Err(_) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    std::thread::sleep(STOP_POLL_INTERVAL);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_sh(script: &str, log: &Path) -> ManagedProcess {
        spawn(
            ProcessKind::Client,
            "sh",
            &["-c".to_string(), script.to_string()],
            &[],
            log,
        )
        .expect("spawn sh")
    }

    #[test]
    fn cooperative_child_stops_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = spawn_sh("sleep 30", &dir.path().join("c.log"));
        assert!(p.is_alive());
        assert_eq!(
            p.stop(Duration::from_secs(2)),
            StopOutcome::StoppedGracefully
        );
        assert!(!p.is_alive());
    }

    #[test]
    fn sigterm_ignoring_child_is_killed_after_one_escalation() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = spawn_sh("trap '' TERM; sleep 30", &dir.path().join("c.log"));
        // Give the shell a moment to install the trap.
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(
            p.stop(Duration::from_millis(500)),
            StopOutcome::StoppedForcefully
        );
        assert!(!p.is_alive());
    }

    #[test]
    fn exited_child_reports_already_dead() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = spawn_sh("true", &dir.path().join("c.log"));
        assert!(p.wait_until(Duration::from_secs(5)));
        assert_eq!(p.stop(Duration::from_secs(1)), StopOutcome::AlreadyDead);
    }

    #[test]
    fn missing_program_is_distinguishable() {
        let dir = tempfile::tempdir().unwrap();
        let err = spawn(
            ProcessKind::Capture,
            "gauntlet-definitely-missing-tool",
            &[],
            &[],
            &dir.path().join("c.log"),
        )
        .unwrap_err();
        assert!(err.is_program_missing());
    }

    #[test]
    fn child_output_lands_in_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("c.log");
        let mut p = spawn_sh("echo hello-from-child", &log);
        assert!(p.wait_until(Duration::from_secs(5)));
        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.contains("hello-from-child"));
    }
}
