//! Console - owns the orchestrator and the background monitors
//!
//! Every operation the menu offers goes through here and returns an
//! [`OperationReport`]. Teardown happens in [`Console::shutdown`], which both
//! the quit path and the interrupt path call.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::config::ConsoleConfig;
use crate::dashboard::Dashboard;
use crate::lifecycle::{ExitReport, LaunchOptions, ServiceOrchestrator, TerminateOutcome};
use crate::monitors::{MetricsHandle, ProtocolMonitor};

/// Outcome of one console operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationReport {
    pub success: bool,
    pub message: String,
}

impl OperationReport {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl fmt::Display for OperationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Set once teardown has started
#[derive(Debug, Default)]
pub struct ShutdownGuard(AtomicBool);

impl ShutdownGuard {
    /// `true` for the first caller only
    pub fn begin(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Console {
    orchestrator: ServiceOrchestrator,
    metrics: Option<MetricsHandle>,
    protocol: ProtocolMonitor,
    shutdown: ShutdownGuard,
}

impl Console {
    pub fn new(config: ConsoleConfig) -> anyhow::Result<Self> {
        Ok(Self::with_orchestrator(ServiceOrchestrator::new(config)?))
    }

    pub fn with_orchestrator(orchestrator: ServiceOrchestrator) -> Self {
        let protocol = ProtocolMonitor::new(orchestrator.config().osc_port);
        Self::with_parts(orchestrator, protocol)
    }

    pub fn with_parts(orchestrator: ServiceOrchestrator, protocol: ProtocolMonitor) -> Self {
        Self {
            orchestrator,
            metrics: None,
            protocol,
            shutdown: ShutdownGuard::default(),
        }
    }

    pub fn orchestrator(&self) -> &ServiceOrchestrator {
        &self.orchestrator
    }

    pub fn protocol(&self) -> &ProtocolMonitor {
        &self.protocol
    }

    pub fn metrics_running(&self) -> bool {
        self.metrics.as_ref().is_some_and(MetricsHandle::is_running)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_shut_down()
    }

    /// Clean up processes left behind by an earlier run
    #[instrument(skip(self))]
    pub async fn recover(&self) -> OperationReport {
        let recovered = self.orchestrator.recover_stale().await;
        if recovered.is_empty() {
            return OperationReport::ok("no leftover processes");
        }

        let names: Vec<String> = recovered
            .iter()
            .map(|(service, pid)| format!("{service} (pid {pid})"))
            .collect();
        info!("stopped leftovers: {}", names.join(", "));
        OperationReport::ok(format!("stopped leftover {}", names.join(", ")))
    }

    /// Launch the stack and start the background monitors
    #[instrument(skip(self))]
    pub async fn launch(&mut self, options: LaunchOptions) -> OperationReport {
        if let Err(e) = self.orchestrator.launch(options).await {
            return OperationReport::failed(e.to_string());
        }

        let mut lines: Vec<String> = self
            .orchestrator
            .services()
            .iter()
            .map(|service| match service.pid {
                Some(pid) => format!("{} running at {} (pid {pid})", service.name, service.url),
                None => format!("{} {}", service.name, service.state),
            })
            .collect();

        if self.orchestrator.config().open_browser
            && let Some(service) = self.orchestrator.config().services.first()
        {
            let url = service.home_url();
            match open_browser(&url) {
                Ok(()) => lines.push(format!("opened {url} in the browser")),
                Err(e) => {
                    warn!("could not open a browser for {url}: {e}");
                    lines.push(format!("could not open a browser: {e}"));
                }
            }
        }

        self.start_metrics().await;
        if !self.protocol.is_running() {
            match self.protocol.start().await {
                Ok(_) => lines.push(format!("OSC monitor listening on {}", self.protocol.bind_addr())),
                Err(e) => {
                    warn!("could not start OSC monitor: {e}");
                    lines.push(format!("OSC monitor unavailable: {e}"));
                }
            }
        }

        OperationReport::ok(lines.join("\n"))
    }

    async fn start_metrics(&mut self) {
        let log = self.orchestrator.primary_log();
        match &self.metrics {
            Some(handle) if handle.is_running() => {
                handle.set_log_path(log).await;
            }
            _ => self.metrics = Some(MetricsHandle::spawn(log)),
        }
    }

    async fn stop_metrics(&mut self) {
        if let Some(handle) = self.metrics.take() {
            handle.stop().await;
        }
    }

    /// The aggregator only runs while something is supervised
    async fn stop_metrics_if_idle(&mut self) {
        if self.metrics.is_some() && !self.orchestrator.is_active() {
            info!("no service left running, stopping metrics");
            self.stop_metrics().await;
        }
    }

    /// Stop all services and the metrics aggregator. The OSC monitor keeps running.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> OperationReport {
        let was_active = self.orchestrator.is_active();
        let reports = self.orchestrator.stop().await;
        self.stop_metrics().await;

        if reports.is_empty() {
            return if was_active {
                OperationReport::ok("services stopped")
            } else {
                OperationReport::ok("nothing was running")
            };
        }

        let mut lines = Vec::new();
        let mut success = true;
        for report in reports {
            match report.outcome {
                TerminateOutcome::Exited { .. } => {
                    lines.push(format!("{} (pid {}) stopped", report.service, report.pid));
                }
                TerminateOutcome::StillRunning => {
                    success = false;
                    lines.push(format!(
                        "{} (pid {}) did not exit; it will be killed on quit",
                        report.service, report.pid
                    ));
                }
            }
        }

        OperationReport {
            success,
            message: lines.join("\n"),
        }
    }

    #[instrument(skip(self))]
    pub async fn toggle_osc(&mut self) -> OperationReport {
        if self.protocol.is_running() {
            self.protocol.stop().await;
            return OperationReport::ok("OSC monitor stopped");
        }

        match self.protocol.start().await {
            Ok(_) => OperationReport::ok(format!(
                "OSC monitor listening on {}",
                self.protocol.bind_addr()
            )),
            Err(e) => OperationReport::failed(format!(
                "could not listen on {}: {e}",
                self.protocol.bind_addr()
            )),
        }
    }

    /// Services, their state and pid, and which monitors are running
    pub fn status(&self) -> OperationReport {
        let mut lines: Vec<String> = vec![format!("stack: {}", self.orchestrator.state())];

        for service in self.orchestrator.services() {
            let pid = service
                .pid
                .map_or_else(|| "-".to_string(), |pid| pid.to_string());
            lines.push(format!(
                "{:<12} {:<20} pid {:<8} {}",
                service.name, service.state, pid, service.url
            ));
        }

        lines.push(format!(
            "OSC monitor: {}",
            match self.protocol.local_addr() {
                Some(addr) if self.protocol.is_running() => format!("listening on {addr}"),
                _ => "off".to_string(),
            }
        ));
        lines.push(format!(
            "metrics: {}",
            if self.metrics_running() { "running" } else { "off" }
        ));

        OperationReport::ok(lines.join("\n"))
    }

    /// Detect services that exited behind the console's back and run the
    /// watchdog restarts that are due
    pub async fn poll(&mut self) -> Vec<ExitReport> {
        let reports = self.orchestrator.poll_exits().await;
        self.stop_metrics_if_idle().await;
        reports
    }

    /// Open the live dashboard until the operator leaves it
    pub async fn dashboard(&mut self) -> OperationReport {
        let result = Dashboard::new(
            &mut self.orchestrator,
            self.metrics.as_ref(),
            &self.protocol,
        )
        .run()
        .await;

        // crashes seen by the dashboard may have left nothing to measure
        self.stop_metrics_if_idle().await;

        match result {
            Ok(()) => OperationReport::ok("left dashboard"),
            Err(e) => {
                warn!("dashboard failed: {e:#}");
                OperationReport::failed(format!("dashboard unavailable: {e}"))
            }
        }
    }

    /// Stop everything this console started and clean up after it. Runs once.
    #[instrument(skip(self))]
    pub async fn shutdown(&mut self) -> OperationReport {
        if !self.shutdown.begin() {
            return OperationReport::ok("already shut down");
        }

        info!("shutting down");
        let stopped = self.stop().await;

        if self.protocol.is_running() {
            self.protocol.stop().await;
        }

        self.orchestrator.recover_stale().await;

        let mut lines = vec![stopped.message];
        for (port, reclaimed) in self.orchestrator.reclaim_ports().await {
            if reclaimed {
                lines.push(format!("freed port {port}"));
            } else {
                warn!("port {port} is still in use");
                lines.push(format!("port {port} is still in use"));
            }
        }

        OperationReport {
            success: stopped.success,
            message: lines.join("\n"),
        }
    }
}

/// Command that hands `url` to the desktop's default browser
fn browser_command(url: &str) -> (&'static str, Vec<String>) {
    if cfg!(windows) {
        ("cmd", vec!["/C".to_string(), "start".to_string(), String::new(), url.to_string()])
    } else if cfg!(target_os = "macos") {
        ("open", vec![url.to_string()])
    } else {
        ("xdg-open", vec![url.to_string()])
    }
}

fn open_browser(url: &str) -> std::io::Result<()> {
    let (program, args) = browser_command(url);
    debug!("opening {url} with {program}");
    Command::new(program)
        .args(&args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map(|_| ())
}
