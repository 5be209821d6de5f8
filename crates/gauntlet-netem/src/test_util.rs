//! Helpers for privileged integration tests.

use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};

/// Monotonically increasing counter for generating unique test resource names.
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Check whether we have sufficient privileges and tools to create scratch
/// interfaces and modify qdiscs. Probes by adding and removing a dummy link;
/// returns `false` if the environment cannot support impairment tests.
pub fn check_privileges() -> bool {
    let probe = unique_if_name("gnt_pr");
    let created = Command::new("ip")
        .args(["link", "add", &probe, "type", "dummy"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if created {
        let _ = Command::new("ip").args(["link", "del", &probe]).output();
    }
    created
}

/// Generates a unique interface name with the given prefix.
///
/// Combines the prefix, process ID, and an atomic counter to avoid
/// collisions when tests run in parallel. Names are truncated to 15
/// characters to respect the Linux interface name limit.
pub fn unique_if_name(prefix: &str) -> String {
    let seq = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    let name = format!("{}_{:x}_{}", prefix, pid % 0xFFFF, seq);
    if name.len() > 15 {
        name[..15].to_string()
    } else {
        name
    }
}
