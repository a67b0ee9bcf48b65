//! PortReaper - frees TCP ports by terminating whatever listens on them
//!
//! Killing an unrelated process that happens to listen on a managed port is an
//! accepted risk of reclaiming. Clients connected to the port are never
//! targeted, and neither is the console's own process.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use super::scanners::{NativeScanner, PortScanner, ProcessTableScanner};
use super::signals::{pid_exists, send_kill, send_terminate, wait_for_exit};

pub use crate::util::is_port_available;

/// How long a forcefully killed process gets to disappear from the process table
const KILL_SETTLE: Duration = Duration::from_millis(500);

/// Scan-and-terminate passes before a port is given up on
const MAX_ROUNDS: usize = 3;

pub struct PortReaper {
    native: Option<Box<dyn PortScanner>>,
    fallback: Box<dyn PortScanner>,
    grace: Duration,
}

impl PortReaper {
    /// Reaper using the platform's native listing tool with the process-table fallback
    pub fn new(grace: Duration) -> Self {
        let native = NativeScanner::detect().map(|scanner| Box::new(scanner) as Box<dyn PortScanner>);
        Self::with_scanners(native, Box::new(ProcessTableScanner), grace)
    }

    pub fn with_scanners(
        native: Option<Box<dyn PortScanner>>,
        fallback: Box<dyn PortScanner>,
        grace: Duration,
    ) -> Self {
        Self {
            native,
            fallback,
            grace,
        }
    }

    /// Try to free `port`.
    ///
    /// Returns true only when at least one listener was terminated and the port
    /// can be bound afterwards. A listener that survives, or one the scanners
    /// missed, keeps the result false.
    #[instrument(skip(self))]
    pub async fn reclaim(&self, port: u16) -> bool {
        let mut attempted = HashSet::new();
        let mut terminated_any = false;

        for round in 1..=MAX_ROUNDS {
            let pids: Vec<u32> = self
                .find_listeners(port)
                .await
                .into_iter()
                .filter(|pid| attempted.insert(*pid))
                .collect();
            if pids.is_empty() {
                debug!("no new listener on port {port} (round {round})");
                break;
            }

            for pid in pids {
                terminated_any |= self.terminate(pid, port).await;
            }

            if terminated_any && is_port_available(port) {
                return true;
            }
        }

        if terminated_any {
            warn!("port {port} is still bound after terminating its listeners");
        }
        false
    }

    /// Listener pids from the native tool, or from the fallback when the tool
    /// is missing, fails, or finds nothing
    async fn find_listeners(&self, port: u16) -> Vec<u32> {
        if let Some(native) = &self.native {
            match native.find_pids(port).await {
                Ok(pids) if !pids.is_empty() => return pids,
                Ok(_) => debug!("{} found nothing on port {port}", native.name()),
                Err(e) => warn!("{} unavailable: {e}", native.name()),
            }
        }

        debug!("using {} fallback for port {port}", self.fallback.name());
        self.fallback.find_pids(port).await.unwrap_or_else(|e| {
            warn!("{} scan failed: {e}", self.fallback.name());
            Vec::new()
        })
    }

    /// Graceful signal, grace period, then forceful kill if still alive
    async fn terminate(&self, pid: u32, port: u16) -> bool {
        if pid == std::process::id() {
            warn!("port {port} is held by this console itself; not terminating");
            return false;
        }

        info!("process {pid} is using port {port}; terminating");

        if !send_terminate(pid) {
            debug!("graceful signal to {pid} not delivered");
        }
        sleep(self.grace).await;

        if pid_exists(pid) {
            warn!("process {pid} survived the grace period; killing");
            if !send_kill(pid) {
                warn!("failed to kill process {pid}");
            }
            wait_for_exit(pid, KILL_SETTLE).await;
        }

        let gone = !pid_exists(pid);
        if !gone {
            warn!("process {pid} still holds port {port}");
        }
        gone
    }
}
