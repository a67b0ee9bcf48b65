//! ProcessSupervisor - spawns supervised children and owns their termination
//!
//! Termination here is graceful only: one stop signal, then a bounded wait.
//! A child that ignores the signal is reported as [`TerminateOutcome::StillRunning`]
//! and left to the caller. Unlike the port reaper, the supervisor never
//! escalates to a hard kill.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chrono::Local;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::signals::{pid_exists, send_terminate, wait_for_exit};
use crate::config::ServiceConfig;

/// A running supervised child
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    child: Child,
    log_file: File,
    log_path: PathBuf,
    pid_file: PathBuf,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// Append a console-side note to the child's log
    pub fn annotate(&mut self, note: &str) {
        use std::io::Write;
        if let Err(e) = writeln!(self.log_file, "[stagehand] {note}") {
            debug!("could not annotate {}: {e}", self.log_path.display());
        }
    }
}

/// Result of a graceful stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    Exited { code: Option<i32> },
    StillRunning,
}

#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    base_env: HashMap<String, String>,
}

impl ProcessSupervisor {
    /// Supervisor whose children inherit a copy of the current environment
    pub fn new() -> Self {
        Self::with_env(std::env::vars().collect())
    }

    pub fn with_env(base_env: HashMap<String, String>) -> Self {
        Self { base_env }
    }

    /// The full environment a child of `service` receives
    pub fn child_environment(&self, service: &ServiceConfig) -> HashMap<String, String> {
        let mut env = self.base_env.clone();
        env.extend(service.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    /// Start `service` with stdout and stderr appended to `log_path`, and record its pid in `pid_file`.
    ///
    /// On error nothing is left behind: no PID file, and no running child.
    #[instrument(skip(self, service), fields(service = %service.name))]
    pub fn spawn(
        &self,
        service: &ServiceConfig,
        log_path: &Path,
        pid_file: &Path,
    ) -> io::Result<ProcessHandle> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let log_file = OpenOptions::new().create(true).append(true).open(log_path)?;

        let mut command = Command::new(&service.command);
        command
            .args(&service.args)
            .env_clear()
            .envs(self.child_environment(service))
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file.try_clone()?))
            .stderr(Stdio::from(log_file.try_clone()?))
            .kill_on_drop(false);

        if let Some(dir) = &service.working_dir {
            command.current_dir(dir);
        }

        // Own process group: a Ctrl+C aimed at the console must not reach the service
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;

        let Some(pid) = child.id() else {
            return Err(io::Error::other("child exited before its pid could be read"));
        };

        if let Some(parent) = pid_file.parent()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            let _ = child.start_kill();
            return Err(e);
        }
        if let Err(e) = std::fs::write(pid_file, pid.to_string()) {
            let _ = child.start_kill();
            return Err(e);
        }

        info!("started {} with pid {pid}, logging to {}", service.command, log_path.display());

        Ok(ProcessHandle {
            pid,
            child,
            log_file,
            log_path: log_path.to_path_buf(),
            pid_file: pid_file.to_path_buf(),
        })
    }

    /// Non-blocking exit check
    pub fn try_exit(&self, handle: &mut ProcessHandle) -> Option<ExitStatus> {
        match handle.child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                warn!("could not poll pid {}: {e}", handle.pid);
                None
            }
        }
    }

    /// Send the stop signal and wait up to `limit` for the child to exit
    #[instrument(skip(self, handle), fields(pid = handle.pid))]
    pub async fn terminate(&self, handle: &mut ProcessHandle, limit: Duration) -> TerminateOutcome {
        if let Some(status) = self.try_exit(handle) {
            debug!("process already exited with {status}");
            return TerminateOutcome::Exited {
                code: status.code(),
            };
        }

        handle.annotate("stop requested");
        if !send_terminate(handle.pid) {
            warn!("stop signal to {} was not delivered", handle.pid);
        }

        match timeout(limit, handle.child.wait()).await {
            Ok(Ok(status)) => {
                info!("process {} exited with {status}", handle.pid);
                TerminateOutcome::Exited {
                    code: status.code(),
                }
            }
            Ok(Err(e)) => {
                warn!("waiting for {} failed: {e}", handle.pid);
                if pid_exists(handle.pid) {
                    TerminateOutcome::StillRunning
                } else {
                    TerminateOutcome::Exited { code: None }
                }
            }
            Err(_) => {
                warn!("process {} still running after {limit:?}", handle.pid);
                TerminateOutcome::StillRunning
            }
        }
    }

    /// Clean up after a previous console instance: stop the process named in
    /// `pid_file` (gracefully) and delete the file. Returns the pid if it was alive.
    #[instrument(skip(self))]
    pub async fn recover_stale(&self, pid_file: &Path, limit: Duration) -> Option<u32> {
        let content = std::fs::read_to_string(pid_file).ok()?;

        let alive = match content.trim().parse::<u32>() {
            Ok(pid) if pid != std::process::id() && pid_exists(pid) => {
                info!("stopping leftover process {pid} from {}", pid_file.display());
                send_terminate(pid);
                if !wait_for_exit(pid, limit).await {
                    warn!("leftover process {pid} did not exit within {limit:?}");
                }
                Some(pid)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("ignoring malformed PID file {}: {e}", pid_file.display());
                None
            }
        };

        remove_pid_file(pid_file);
        alive
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Delete a PID file; a missing file is fine
pub fn remove_pid_file(pid_file: &Path) {
    match std::fs::remove_file(pid_file) {
        Ok(()) => debug!("removed {}", pid_file.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("could not remove {}: {e}", pid_file.display()),
    }
}

/// Fresh per-start log path: `<log_dir>/<service>-<YYYYmmddHHMMSS>.log`
pub fn new_log_path(log_dir: &Path, service: &str) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d%H%M%S");
    log_dir.join(format!("{service}-{timestamp}.log"))
}
