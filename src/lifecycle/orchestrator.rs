//! ServiceOrchestrator - brings the supervised stack up and takes it down
//!
//! ## Launch flow
//!
//! ```text
//! Idle → PortsReclaiming → [Building] → Spawning → AwaitingReadiness → Running
//!            │                 │            │              │
//!            └─────────────────┴────────────┴──────────────┴──→ Failed (rollback)
//! ```
//!
//! Every managed port is reclaimed before the first spawn. Services start one
//! at a time and each must be ready before the next one is spawned. A launch
//! is all-or-nothing: when a later service fails, the ones already started are
//! stopped again.
//!
//! The orchestrator is driven from the foreground only. Exit detection is a
//! poll. The dashboard tick calls [`ServiceOrchestrator::detect_exits`], which
//! only schedules watchdog restarts; the menu calls
//! [`ServiceOrchestrator::poll_exits`], which also runs the due ones.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Local;
use tokio::process::Command;
use tracing::{debug, error, info, instrument, warn};

use super::error::{LaunchError, LaunchResult};
use super::readiness::{ReadinessCheck, ReadinessProbe};
use super::reaper::{PortReaper, is_port_available};
use super::state::{LifecycleState, Transition};
use super::supervisor::{
    ProcessHandle, ProcessSupervisor, TerminateOutcome, new_log_path, remove_pid_file,
};
use super::watchdog::RestartBudget;
use crate::config::{BuildConfig, ConsoleConfig, ServiceConfig};
use crate::stage_config;
use crate::util::tail_lines;

/// Lines of the service log quoted when a service never became ready
const LOG_EXCERPT_LINES: usize = 20;

#[derive(Debug, Clone, Copy, Default)]
pub struct LaunchOptions {
    /// Run the build step even if the artifact exists
    pub rebuild: bool,
}

/// A service started by the orchestrator
#[derive(Debug)]
pub struct ManagedService {
    config: ServiceConfig,
    handle: Option<ProcessHandle>,
    state: LifecycleState,
}

impl ManagedService {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().map(ProcessHandle::pid)
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.handle.as_ref().map(ProcessHandle::log_path)
    }

    fn view(&self) -> ServiceView {
        ServiceView {
            name: self.config.name.clone(),
            port: self.config.port,
            url: self.config.url(),
            state: self.state,
            pid: self.pid(),
            log_path: self.log_path().map(Path::to_path_buf),
        }
    }
}

/// Read-only row for menus and the dashboard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceView {
    pub name: String,
    pub port: u16,
    pub url: String,
    pub state: LifecycleState,
    pub pid: Option<u32>,
    pub log_path: Option<PathBuf>,
}

/// A supervised process that exited on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    pub service: String,
    pub code: Option<i32>,
    pub restart_scheduled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    pub service: String,
    pub pid: u32,
    pub outcome: TerminateOutcome,
}

#[derive(Debug)]
struct PendingRestart {
    config: ServiceConfig,
    due: Instant,
}

pub struct ServiceOrchestrator {
    config: ConsoleConfig,
    reaper: PortReaper,
    supervisor: ProcessSupervisor,
    readiness: Box<dyn ReadinessCheck>,
    services: Vec<ManagedService>,
    pending: Vec<PendingRestart>,
    budgets: HashMap<String, RestartBudget>,
    state: LifecycleState,
    history: Vec<Transition>,
}

impl ServiceOrchestrator {
    /// Orchestrator with the stock reaper, supervisor and readiness probe
    pub fn new(config: ConsoleConfig) -> anyhow::Result<Self> {
        let readiness = ReadinessProbe::new(config.readiness_interval())
            .context("failed to build the readiness HTTP client")?;
        let reaper = PortReaper::new(config.reclaim_grace());

        Ok(Self::with_parts(
            config,
            reaper,
            ProcessSupervisor::new(),
            Box::new(readiness),
        ))
    }

    pub fn with_parts(
        config: ConsoleConfig,
        reaper: PortReaper,
        supervisor: ProcessSupervisor,
        readiness: Box<dyn ReadinessCheck>,
    ) -> Self {
        Self {
            config,
            reaper,
            supervisor,
            readiness,
            services: Vec::new(),
            pending: Vec::new(),
            budgets: HashMap::new(),
            state: LifecycleState::Idle,
            history: Vec::new(),
        }
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Steps taken since the last launch request
    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// Whether any service is tracked (running or awaiting a restart)
    pub fn is_active(&self) -> bool {
        !self.services.is_empty() || !self.pending.is_empty()
    }

    /// One row per configured service, tracked or not
    pub fn services(&self) -> Vec<ServiceView> {
        let untracked = if self.state == LifecycleState::Failed {
            LifecycleState::Failed
        } else {
            LifecycleState::Idle
        };

        self.config
            .services
            .iter()
            .map(|config| match self.find(&config.name) {
                Some(managed) => managed.view(),
                None => ServiceView {
                    name: config.name.clone(),
                    port: config.port,
                    url: config.url(),
                    state: untracked,
                    pid: None,
                    log_path: None,
                },
            })
            .collect()
    }

    /// Log of the first running service, the one the dashboard tails
    pub fn primary_log(&self) -> Option<PathBuf> {
        self.services
            .iter()
            .find_map(|service| service.log_path().map(Path::to_path_buf))
    }

    fn find(&self, name: &str) -> Option<&ManagedService> {
        self.services.iter().find(|service| service.config.name == name)
    }

    /// Start every configured service.
    ///
    /// Fails with [`LaunchError::AlreadyRunning`] while anything is still tracked.
    #[instrument(skip(self))]
    pub async fn launch(&mut self, options: LaunchOptions) -> LaunchResult<()> {
        if let Some(name) = self
            .services
            .first()
            .map(|service| service.config.name.clone())
            .or_else(|| self.pending.first().map(|p| p.config.name.clone()))
        {
            return Err(LaunchError::AlreadyRunning(name));
        }

        self.history.clear();
        self.budgets.clear();
        self.enter(None, LifecycleState::PortsReclaiming);

        if let Err(e) = self.prepare_runtime() {
            return Err(self.fail(e).await);
        }

        for port in self.config.managed_ports() {
            if is_port_available(port) {
                debug!("port {port} is already free");
                continue;
            }
            if self.reaper.reclaim(port).await {
                info!("reclaimed port {port}");
            }
            if !is_port_available(port) {
                return Err(self.fail(LaunchError::PortUnavailable(port)).await);
            }
        }

        let configs = self.config.services.clone();
        for service in &configs {
            match self.start_service(service, options.rebuild).await {
                Ok(managed) => self.services.push(managed),
                Err(e) => return Err(self.fail(e).await),
            }
        }

        self.enter(None, LifecycleState::Running);
        info!("{} service(s) running", self.services.len());
        Ok(())
    }

    /// Stop every tracked service, newest first
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Vec<StopReport> {
        self.pending.clear();

        match self.state {
            LifecycleState::Failed => {
                self.enter(None, LifecycleState::Idle);
                Vec::new()
            }
            LifecycleState::Running => {
                self.enter(None, LifecycleState::Stopping);
                let reports = self.teardown().await;
                self.enter(None, LifecycleState::Idle);
                reports
            }
            _ => {
                debug!("nothing to stop");
                self.teardown().await
            }
        }
    }

    /// Detect exits and run the restarts that are due
    pub async fn poll_exits(&mut self) -> Vec<ExitReport> {
        let reports = self.detect_exits();
        self.run_due_restarts().await;
        reports
    }

    /// Record services that exited on their own and schedule their restarts.
    ///
    /// Never waits on a child, so it is safe to call from a render loop.
    pub fn detect_exits(&mut self) -> Vec<ExitReport> {
        let mut reports = Vec::new();
        let mut index = 0;

        while index < self.services.len() {
            let exited = match self.services[index].handle.as_mut() {
                Some(handle) => self.supervisor.try_exit(handle),
                None => None,
            };
            let Some(status) = exited else {
                index += 1;
                continue;
            };

            let mut service = self.services.remove(index);
            let name = service.config.name.clone();
            warn!("{name} exited unexpectedly with {status}");

            service.state = LifecycleState::Stopping;
            self.enter(Some(name.as_str()), LifecycleState::Stopping);
            if let Some(handle) = service.handle.take() {
                remove_pid_file(handle.pid_file());
            }
            self.enter(Some(name.as_str()), LifecycleState::Idle);
            self.append_error_log(&format!("{name} exited unexpectedly with {status}"));

            let restart_scheduled = self.config.watchdog.enabled
                && self
                    .budgets
                    .entry(name.clone())
                    .or_insert_with(|| RestartBudget::from_config(&self.config.watchdog))
                    .try_acquire(Instant::now());

            if restart_scheduled {
                let delay = Duration::from_secs(self.config.watchdog.restart_delay_secs);
                info!("restarting {name} in {delay:?}");
                self.pending.push(PendingRestart {
                    config: service.config,
                    due: Instant::now() + delay,
                });
            } else if self.config.watchdog.enabled {
                error!("{name} crashed too often, giving up");
            }

            reports.push(ExitReport {
                service: name,
                code: status.code(),
                restart_scheduled,
            });
        }

        self.settle_if_empty();
        reports
    }

    /// Restart services whose watchdog delay has elapsed. Each restart waits for
    /// readiness, so this can take as long as the readiness window.
    pub async fn run_due_restarts(&mut self) {
        let now = Instant::now();
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|restart| restart.due <= now);
        self.pending = waiting;

        for restart in due {
            self.restart(&restart.config).await;
        }

        self.settle_if_empty();
    }

    /// Whether a watchdog restart is due now
    pub fn has_due_restart(&self) -> bool {
        let now = Instant::now();
        self.pending.iter().any(|restart| restart.due <= now)
    }

    fn settle_if_empty(&mut self) {
        if self.state == LifecycleState::Running && !self.is_active() {
            self.enter(None, LifecycleState::Stopping);
            self.enter(None, LifecycleState::Idle);
        }
    }

    /// Stop processes recorded in PID files by an earlier console instance.
    ///
    /// Services tracked by this instance are left alone.
    pub async fn recover_stale(&self) -> Vec<(String, u32)> {
        let mut recovered = Vec::new();
        for service in &self.config.services {
            if self.find(&service.name).is_some() {
                continue;
            }
            let pid_file = self.config.pid_file(&service.name);
            if let Some(pid) = self
                .supervisor
                .recover_stale(&pid_file, self.config.terminate_timeout())
                .await
            {
                recovered.push((service.name.clone(), pid));
            }
        }
        recovered
    }

    /// Free every managed port that is still bound, whoever holds it
    pub async fn reclaim_ports(&self) -> Vec<(u16, bool)> {
        let mut results = Vec::new();
        for port in self.config.managed_ports() {
            if !is_port_available(port) {
                results.push((port, self.reaper.reclaim(port).await));
            }
        }
        results
    }

    async fn start_service(
        &mut self,
        service: &ServiceConfig,
        rebuild: bool,
    ) -> LaunchResult<ManagedService> {
        let name = service.name.as_str();

        if let Some(build) = &service.build {
            let artifact = artifact_path(build);
            if rebuild || !artifact.exists() {
                self.enter(Some(name), LifecycleState::Building);
                self.run_build(service, build).await?;
                if !artifact.exists() {
                    return Err(LaunchError::BuildFailed {
                        service: name.to_string(),
                        artifact,
                    });
                }
            }
        }

        self.enter(Some(name), LifecycleState::Spawning);
        let log_path = new_log_path(&self.config.log_dir, name);
        let pid_file = self.config.pid_file(name);
        let mut handle = self
            .supervisor
            .spawn(service, &log_path, &pid_file)
            .map_err(|source| LaunchError::SpawnFailed {
                service: name.to_string(),
                source,
            })?;

        self.enter(Some(name), LifecycleState::AwaitingReadiness);
        let url = service.url();
        let result = self
            .readiness
            .wait_until_ready(&url, self.config.readiness_attempts)
            .await;

        if !result.ready {
            let log_excerpt = read_log_tail(&log_path, LOG_EXCERPT_LINES);
            let outcome = self
                .supervisor
                .terminate(&mut handle, self.config.terminate_timeout())
                .await;
            if outcome == TerminateOutcome::StillRunning {
                warn!("{name} (pid {}) is still running after a failed launch", handle.pid());
            }
            remove_pid_file(&pid_file);

            return Err(LaunchError::NotReady {
                service: name.to_string(),
                url,
                attempts: result.attempts,
                log_excerpt,
            });
        }

        info!(
            "{name} ready at {url} after {} attempt(s) (HTTP {:?})",
            result.attempts, result.http_status
        );

        Ok(ManagedService {
            config: service.clone(),
            handle: Some(handle),
            state: LifecycleState::Running,
        })
    }

    #[instrument(skip(self, service), fields(service = %service.name))]
    async fn restart(&mut self, service: &ServiceConfig) {
        let name = service.name.as_str();
        self.enter(Some(name), LifecycleState::PortsReclaiming);

        if !is_port_available(service.port) {
            self.reaper.reclaim(service.port).await;
        }

        let result = if is_port_available(service.port) {
            self.start_service(service, false).await
        } else {
            Err(LaunchError::PortUnavailable(service.port))
        };

        match result {
            Ok(managed) => {
                self.enter(Some(name), LifecycleState::Running);
                info!("{name} restarted with pid {:?}", managed.pid());
                self.services.push(managed);
            }
            Err(e) => {
                error!("restart of {name} failed: {}", e.summary());
                self.enter(Some(name), LifecycleState::Failed);
                self.append_error_log(&format!("restart of {name} failed: {e}"));
            }
        }
    }

    async fn run_build(&self, service: &ServiceConfig, build: &BuildConfig) -> LaunchResult<()> {
        let mut error_log = self.open_error_log()?;
        writeln!(
            error_log,
            "[{}] building {}: {} {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            service.name,
            build.command,
            build.args.join(" ")
        )?;

        let mut command = Command::new(&build.command);
        command
            .args(&build.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(error_log.try_clone()?))
            .stderr(Stdio::from(error_log.try_clone()?));
        if let Some(dir) = &build.working_dir {
            command.current_dir(dir);
        }

        info!("building {}", service.name);
        match command.status().await {
            Ok(status) if status.success() => info!("build for {} finished", service.name),
            Ok(status) => warn!("build for {} exited with {status}", service.name),
            Err(e) => {
                warn!("could not run {}: {e}", build.command);
                writeln!(error_log, "could not run {}: {e}", build.command)?;
            }
        }

        Ok(())
    }

    fn prepare_runtime(&self) -> LaunchResult<()> {
        std::fs::create_dir_all(&self.config.log_dir)?;
        for dir in &self.config.runtime_dirs {
            std::fs::create_dir_all(dir)?;
        }

        if let Err(e) = stage_config::ensure_default(&self.config.app_config) {
            warn!("could not create the app config: {e:#}");
        }

        Ok(())
    }

    /// Mark the launch failed, roll back what it started and record the error
    async fn fail(&mut self, err: LaunchError) -> LaunchError {
        error!("launch failed: {}", err.summary());
        self.enter(None, LifecycleState::Failed);

        let rolled_back = self.teardown().await;
        if !rolled_back.is_empty() {
            info!("rolled back {} service(s)", rolled_back.len());
        }

        self.append_error_log(&format!("launch failed: {err}"));
        err
    }

    async fn teardown(&mut self) -> Vec<StopReport> {
        let limit = self.config.terminate_timeout();
        let mut reports = Vec::new();

        while let Some(mut service) = self.services.pop() {
            service.state = LifecycleState::Stopping;
            let Some(mut handle) = service.handle.take() else {
                continue;
            };

            let outcome = self.supervisor.terminate(&mut handle, limit).await;
            if outcome == TerminateOutcome::StillRunning {
                warn!(
                    "{} (pid {}) ignored the stop signal",
                    service.config.name,
                    handle.pid()
                );
            }
            remove_pid_file(handle.pid_file());

            reports.push(StopReport {
                service: service.config.name.clone(),
                pid: handle.pid(),
                outcome,
            });
        }

        reports
    }

    fn enter(&mut self, service: Option<&str>, to: LifecycleState) {
        // watchdog steps for one service leave the orchestrator Running
        let per_service = service.is_some() && self.state == LifecycleState::Running;
        let from = if per_service {
            self.last_phase(service)
        } else {
            self.state
        };

        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            warn!("unexpected transition {from} -> {to}");
        }
        debug!(service = service.unwrap_or("-"), "{from} -> {to}");

        if !per_service {
            self.state = to;
        }
        self.history.push(Transition {
            at: Local::now(),
            service: service.map(str::to_string),
            from,
            to,
        });
    }

    fn last_phase(&self, service: Option<&str>) -> LifecycleState {
        self.history
            .iter()
            .rev()
            .find(|transition| transition.service.as_deref() == service)
            .map_or(LifecycleState::Idle, |transition| transition.to)
    }

    fn open_error_log(&self) -> std::io::Result<File> {
        if let Some(parent) = self.config.error_log.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.error_log)
    }

    fn append_error_log(&self, message: &str) {
        let written = self.open_error_log().and_then(|mut file| {
            writeln!(
                file,
                "[{}] {message}",
                Local::now().format("%Y-%m-%d %H:%M:%S")
            )
        });
        if let Err(e) = written {
            warn!("could not write {}: {e}", self.config.error_log.display());
        }
    }
}

fn artifact_path(build: &BuildConfig) -> PathBuf {
    match &build.working_dir {
        Some(dir) => dir.join(&build.artifact),
        None => build.artifact.clone(),
    }
}

fn read_log_tail(path: &Path, lines: usize) -> Vec<String> {
    match std::fs::read(path) {
        Ok(bytes) => tail_lines(&String::from_utf8_lossy(&bytes), lines),
        Err(e) => {
            debug!("could not read {}: {e}", path.display());
            Vec::new()
        }
    }
}
