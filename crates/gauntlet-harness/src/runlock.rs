//! Single-instance run lock and exit guard.
//!
//! One JSON file (`gauntlet.lock.json`) holds the harness pid, the
//! interface under impairment, and the pid of every subprocess currently
//! alive. That gives the harness explicit ownership of everything it has to
//! clean up — no pattern-matching against other processes' command lines,
//! ever. Only pids this harness (or a dead predecessor, through its own
//! lock file) actually spawned are signalled.
//!
//! Recovery paths:
//! - a live lock (owner pid still running) means a second harness instance;
//!   that is a pre-flight failure, since the impairment rule and the server
//!   port are exclusive host-wide resources;
//! - a stale lock (owner dead, e.g. a SIGKILLed run) is adopted: recorded
//!   pids still alive are killed, the recorded interface is cleared, and
//!   the file is replaced;
//! - [`RunLock::cleanup`] runs on every exit path — normal completion, an
//!   error, or an interrupt via the `ctrlc` handler — and is idempotent.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Serialize, Deserialize)]
struct LockData {
    harness_pid: u32,
    interface: String,
    pids: Vec<PidEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidEntry {
    pub kind: String,
    pub pid: u32,
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another harness instance (pid {pid}) holds {path}")]
    Held { pid: u32, path: PathBuf },
    #[error("failed to access lock file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    data: Mutex<LockData>,
    cleaned: AtomicBool,
}

impl RunLock {
    /// Acquire the run lock, adopting and cleaning up after a dead
    /// predecessor if its lock file is still around.
    pub fn acquire(path: &Path, interface: &str) -> Result<Arc<Self>, LockError> {
        if path.exists() {
            adopt_stale(path)?;
        }

        let lock = Arc::new(Self {
            path: path.to_path_buf(),
            data: Mutex::new(LockData {
                harness_pid: std::process::id(),
                interface: interface.to_string(),
                pids: Vec::new(),
            }),
            cleaned: AtomicBool::new(false),
        });
        lock.persist_new()?;
        tracing::debug!(path = %path.display(), "run lock acquired");
        Ok(lock)
    }

    /// First write of the lock file. `create_new` closes the race between
    /// two harnesses starting at the same instant: exactly one wins.
    fn persist_new(&self) -> Result<(), LockError> {
        use std::io::Write;

        let data = self.data.lock().unwrap();
        let json = serde_json::to_string_pretty(&*data).expect("lock data serializes");
        let result = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(json.as_bytes()));
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let pid = std::fs::read_to_string(&self.path)
                    .ok()
                    .and_then(|text| serde_json::from_str::<LockData>(&text).ok())
                    .map(|d| d.harness_pid)
                    .unwrap_or_default();
                Err(LockError::Held {
                    pid,
                    path: self.path.clone(),
                })
            }
            Err(source) => Err(LockError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Record a subprocess the harness now owns.
    pub fn register(&self, kind: &str, pid: u32) {
        {
            let mut data = self.data.lock().unwrap();
            data.pids.push(PidEntry {
                kind: kind.to_string(),
                pid,
            });
        }
        let _ = self.persist();
    }

    /// Forget a subprocess that has been stopped through the supervisor.
    pub fn unregister(&self, pid: u32) {
        {
            let mut data = self.data.lock().unwrap();
            data.pids.retain(|e| e.pid != pid);
        }
        let _ = self.persist();
    }

    pub fn tracked(&self) -> Vec<PidEntry> {
        self.data.lock().unwrap().pids.clone()
    }

    /// Kill every still-live tracked pid, clear the interface, and remove
    /// the lock file. Safe to call from the interrupt handler and from the
    /// scope guard; only the first call does anything.
    pub fn cleanup(&self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }

        let data = self.data.lock().unwrap();
        for entry in &data.pids {
            if pid_alive(entry.pid) {
                tracing::warn!(kind = %entry.kind, pid = entry.pid, "force-stopping tracked process");
                // SAFETY: this pid was spawned by this harness and is
                // recorded in the lock; SIGKILL at worst races a normal
                // exit (ESRCH).
                unsafe {
                    libc::kill(entry.pid as libc::pid_t, libc::SIGKILL);
                }
            }
        }

        if let Err(e) = gauntlet_netem::clear(&data.interface) {
            tracing::warn!(interface = %data.interface, error = %e, "failed to clear impairment on exit");
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "lock file not removed");
        }
        tracing::debug!("run lock released");
    }

    fn persist(&self) -> Result<(), LockError> {
        let data = self.data.lock().unwrap();
        let json = serde_json::to_string_pretty(&*data).expect("lock data serializes");
        std::fs::write(&self.path, json).map_err(|source| LockError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Deal with an existing lock file: error if its owner is alive, otherwise
/// kill whatever the dead run left behind, clear its interface, and remove
/// the file.
fn adopt_stale(path: &Path) -> Result<(), LockError> {
    let text = std::fs::read_to_string(path).map_err(|source| LockError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    match serde_json::from_str::<LockData>(&text) {
        Ok(stale) => {
            if pid_alive(stale.harness_pid) {
                return Err(LockError::Held {
                    pid: stale.harness_pid,
                    path: path.to_path_buf(),
                });
            }

            tracing::warn!(
                harness_pid = stale.harness_pid,
                leftover_pids = stale.pids.len(),
                "adopting stale lock from a dead run"
            );
            for entry in &stale.pids {
                if pid_alive(entry.pid) {
                    tracing::warn!(kind = %entry.kind, pid = entry.pid, "stopping leftover process");
                    // SAFETY: recorded by a previous harness as its own
                    // child; SIGKILL at worst hits a since-reused pid, which
                    // the pre-flight surfaces in the log above.
                    unsafe {
                        libc::kill(entry.pid as libc::pid_t, libc::SIGKILL);
                    }
                }
            }
            if let Err(e) = gauntlet_netem::clear(&stale.interface) {
                tracing::warn!(interface = %stale.interface, error = %e, "failed to clear stale impairment");
            }
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable lock file, discarding");
        }
    }

    std::fs::remove_file(path).map_err(|source| LockError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn pid_alive(pid: u32) -> bool {
    // SAFETY: signal 0 performs error checking only; no signal is sent.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

/// Scope guard that runs [`RunLock::cleanup`] when dropped, so the run body
/// cleans up on early returns and panics as well as normal completion.
pub struct CleanupGuard {
    lock: Arc<RunLock>,
}

impl CleanupGuard {
    pub fn new(lock: Arc<RunLock>) -> Self {
        Self { lock }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.lock.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::{Duration, Instant};

    fn wait_for_exit(child: &mut std::process::Child, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return true,
                _ => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }

    /// A pid that is certainly dead: spawn a short-lived child and reap it.
    fn dead_pid() -> u32 {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn acquire_writes_lock_and_cleanup_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gauntlet.lock.json");
        let lock = RunLock::acquire(&path, "lo").unwrap();
        assert!(path.exists());

        let pid = dead_pid();
        lock.register("server", pid);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains(&pid.to_string()));

        lock.unregister(pid);
        assert!(lock.tracked().is_empty());

        lock.cleanup();
        assert!(!path.exists());
        // Second cleanup is a no-op.
        lock.cleanup();
    }

    #[test]
    fn live_lock_is_a_held_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gauntlet.lock.json");
        let _lock = RunLock::acquire(&path, "lo").unwrap();

        // Same process is, by definition, alive.
        let err = RunLock::acquire(&path, "lo").unwrap_err();
        assert!(matches!(err, LockError::Held { .. }));
    }

    #[test]
    fn stale_lock_is_adopted_and_leftovers_are_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gauntlet.lock.json");

        let mut leftover = Command::new("sleep").arg("300").spawn().unwrap();
        let stale = LockData {
            harness_pid: dead_pid(),
            interface: "gnt_stale0".to_string(),
            pids: vec![PidEntry {
                kind: "server".to_string(),
                pid: leftover.id(),
            }],
        };
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        let lock = RunLock::acquire(&path, "lo").unwrap();
        assert!(
            wait_for_exit(&mut leftover, Duration::from_secs(5)),
            "leftover process should have been killed during adoption"
        );
        assert!(lock.tracked().is_empty());
    }

    #[test]
    fn garbage_lock_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gauntlet.lock.json");
        std::fs::write(&path, "not json at all").unwrap();

        let lock = RunLock::acquire(&path, "lo").unwrap();
        assert!(lock.tracked().is_empty());
    }

    #[test]
    fn guard_cleans_up_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gauntlet.lock.json");
        let lock = RunLock::acquire(&path, "lo").unwrap();
        {
            let _guard = CleanupGuard::new(lock.clone());
        }
        assert!(!path.exists());
    }
}
