//! Best-effort packet capture.
//!
//! Runs one `tcpdump` per scenario, filtered to the game's UDP port. The
//! capture tool being absent is not an error — the scenario proceeds without
//! a trace and the degradation is recorded. A capture that dies right after
//! spawning (bad interface, missing privilege) is detected by a liveness
//! check after a short settle delay, so a silently-broken capture is never
//! believed to be running.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::supervisor::{self, ManagedProcess, ProcessKind, SpawnError};

/// How long to wait after spawning before confirming the capture survived.
const SETTLE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture process exited during startup, see {log}")]
    ExitedEarly { log: PathBuf },
    #[error(transparent)]
    Spawn(SpawnError),
}

/// Outcome of a capture start attempt.
#[derive(Debug)]
pub enum CaptureStart {
    Started(ManagedProcess),
    /// The capture tool is not installed on this host.
    Unavailable,
}

/// Start a packet capture on `interface`, writing to `pcap_path`.
///
/// The pcap file is only considered valid once the returned handle has been
/// stopped through the supervisor's two-phase protocol.
pub fn start(
    program: &str,
    interface: &str,
    port: u16,
    pcap_path: &Path,
    log_path: &Path,
) -> Result<CaptureStart, CaptureError> {
    let args: Vec<String> = vec![
        "-i".into(),
        interface.into(),
        "-w".into(),
        pcap_path.display().to_string(),
        "udp".into(),
        "port".into(),
        port.to_string(),
    ];

    let mut handle = match supervisor::spawn(ProcessKind::Capture, program, &args, &[], log_path) {
        Ok(h) => h,
        Err(e) if e.is_program_missing() => {
            tracing::warn!(program, "capture tool unavailable, continuing without trace");
            return Ok(CaptureStart::Unavailable);
        }
        Err(e) => return Err(CaptureError::Spawn(e)),
    };

    // Confirm the capture actually came up. tcpdump exits immediately on a
    // bad interface or missing privilege, long before the scenario ends.
    std::thread::sleep(SETTLE_DELAY);
    if !handle.is_alive() {
        return Err(CaptureError::ExitedEarly {
            log: log_path.to_path_buf(),
        });
    }

    tracing::info!(interface, pcap = %pcap_path.display(), "capture running");
    Ok(CaptureStart::Started(handle))
}
