//! Forced termination of a process and all of its descendants.
//!
//! Order matters here: descendants are enumerated and killed before the
//! root, because killing the root first orphans grandchildren on some
//! platforms before they can be found. If the root survives the direct
//! kill, one retry goes through the platform's own tree-kill utility.

use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

/// Grace period for descendants to exit before the root is killed.
const CHILD_EXIT_GRACE: Duration = Duration::from_millis(100);

/// How long to wait for the root to disappear after the direct kill.
const ROOT_EXIT_TIMEOUT: Duration = Duration::from_secs(3);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Forcibly terminate `root` and every process it transitively spawned.
/// Blocking (sleeps between polls); call from a blocking context or via
/// `spawn_blocking`. Failures are logged, never propagated — by the time
/// this is called the run is already over.
pub fn terminate_tree(root: u32) {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    let descendants = collect_descendants(&sys, root);
    debug!(
        pid = root,
        descendants = descendants.len(),
        "terminating process tree"
    );

    for pid in &descendants {
        if let Some(proc_) = sys.process(*pid) {
            proc_.kill();
        }
    }
    if !descendants.is_empty() {
        std::thread::sleep(CHILD_EXIT_GRACE);
    }

    if let Some(proc_) = sys.process(Pid::from_u32(root)) {
        proc_.kill();
    }

    let deadline = Instant::now() + ROOT_EXIT_TIMEOUT;
    loop {
        sys.refresh_processes(ProcessesToUpdate::All, true);
        match sys.process(Pid::from_u32(root)) {
            None => return,
            // A zombie is dead; the parent just hasn't reaped it yet.
            Some(p) if p.status() == sysinfo::ProcessStatus::Zombie => return,
            Some(_) => {}
        }
        if Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(EXIT_POLL_INTERVAL);
    }

    warn!(pid = root, "process survived direct kill, using platform tree kill");
    if let Err(e) = platform::force_kill_tree(root) {
        warn!(pid = root, "platform tree kill failed: {e}");
    }
}

/// All live descendants of `root`, found by walking parent links.
/// Traversal order is irrelevant; every descendant gets the same kill.
pub fn collect_descendants(sys: &System, root: u32) -> Vec<Pid> {
    let mut out: Vec<Pid> = Vec::new();
    let mut frontier = vec![Pid::from_u32(root)];
    while let Some(parent) = frontier.pop() {
        for (pid, proc_) in sys.processes() {
            if proc_.parent() == Some(parent) && !out.contains(pid) {
                out.push(*pid);
                frontier.push(*pid);
            }
        }
    }
    out
}

/// Fresh snapshot of the live descendants of `root` (test helper and
/// post-kill verification).
pub fn living_descendants(root: u32) -> Vec<Pid> {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);
    collect_descendants(&sys, root)
}

// ─── Platform fallback ────────────────────────────────────────────────────────

#[cfg(windows)]
mod platform {
    /// `taskkill /T` kills the whole descendant tree by pid.
    pub fn force_kill_tree(pid: u32) -> std::io::Result<()> {
        std::process::Command::new("taskkill")
            .args(["/T", "/F", "/PID", &pid.to_string()])
            .output()
            .map(|_| ())
    }
}

#[cfg(not(windows))]
mod platform {
    /// The supervisor spawns the agent in its own process group with
    /// pgid == pid, so a negative-pid signal reaches the whole tree.
    pub fn force_kill_tree(pid: u32) -> std::io::Result<()> {
        std::process::Command::new("kill")
            .args(["-9", &format!("-{pid}")])
            .output()
            .map(|_| ())
    }
}
