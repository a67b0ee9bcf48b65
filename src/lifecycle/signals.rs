//! Process signalling on top of `sysinfo`
//!
//! Every call refreshes only the process it targets. A zombie counts as gone:
//! it holds no ports and will never answer a signal.

use std::time::Duration;

use sysinfo::{Pid, Process, ProcessStatus, ProcessesToUpdate, Signal, System};
use tokio::time::{Instant, sleep};
use tracing::trace;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

fn with_process<T>(pid: u32, f: impl FnOnce(&Process) -> T) -> Option<T> {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).map(f)
}

pub fn pid_exists(pid: u32) -> bool {
    with_process(pid, |process| process.status() != ProcessStatus::Zombie).unwrap_or(false)
}

/// Ask the process to stop. Returns false when the signal could not be delivered
/// (process gone, permission denied, or no graceful signal on this platform).
pub fn send_terminate(pid: u32) -> bool {
    let delivered = with_process(pid, |process| process.kill_with(Signal::Term))
        .flatten()
        .unwrap_or(false);
    trace!("SIGTERM to {pid}: delivered={delivered}");
    delivered
}

/// Kill the process outright.
pub fn send_kill(pid: u32) -> bool {
    let delivered = with_process(pid, |process| process.kill()).unwrap_or(false);
    trace!("SIGKILL to {pid}: delivered={delivered}");
    delivered
}

/// Poll until `pid` is gone or `timeout` elapses. Returns true if it exited.
pub async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !pid_exists(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(EXIT_POLL_INTERVAL).await;
    }
}

/// Snapshot of the process table as (pid, name), sorted by pid.
pub fn list_processes() -> Vec<(u32, String)> {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);
    let mut processes: Vec<(u32, String)> = sys
        .processes()
        .iter()
        .filter(|(_, process)| process.status() != ProcessStatus::Zombie)
        .map(|(pid, process)| (pid.as_u32(), process.name().to_string_lossy().into_owned()))
        .collect();
    processes.sort_by_key(|(pid, _)| *pid);
    processes
}
