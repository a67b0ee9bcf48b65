//! Read-side state of the dashboard, rebuilt on every tick

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::lifecycle::{ExitReport, LifecycleState, ServiceOrchestrator, ServiceView};
use crate::monitors::{MetricsHandle, MetricsSnapshot, ProtocolMessage, ProtocolMonitor};

/// Protocol messages shown on screen
pub const VISIBLE_MESSAGES: usize = 5;

/// CPU samples kept for the sparkline
const CPU_HISTORY: usize = 120;

/// Events kept for the footer
const MAX_NOTICES: usize = 3;

#[derive(Debug, Clone)]
pub struct Notice {
    pub at: DateTime<Local>,
    pub text: String,
    pub is_error: bool,
}

#[derive(Debug, Clone)]
pub struct DashboardState {
    pub lifecycle: LifecycleState,
    pub services: Vec<ServiceView>,

    /// `None` while the aggregator is not running
    pub metrics: Option<Arc<MetricsSnapshot>>,

    /// CPU percent per sample, oldest first
    pub cpu_history: VecDeque<u64>,

    pub messages: Vec<ProtocolMessage>,
    pub messages_total: u64,

    /// Bound address while the OSC monitor runs
    pub osc_addr: Option<SocketAddr>,

    pub notices: VecDeque<Notice>,

    /// Draws that failed since the dashboard opened
    pub draw_failures: u64,
}

impl DashboardState {
    pub fn new() -> Self {
        Self {
            lifecycle: LifecycleState::Idle,
            services: Vec::new(),
            metrics: None,
            cpu_history: VecDeque::with_capacity(CPU_HISTORY),
            messages: Vec::new(),
            messages_total: 0,
            osc_addr: None,
            notices: VecDeque::with_capacity(MAX_NOTICES),
            draw_failures: 0,
        }
    }

    /// Pull the latest view of everything the dashboard shows
    pub fn refresh(
        &mut self,
        orchestrator: &ServiceOrchestrator,
        metrics: Option<&MetricsHandle>,
        monitor: &ProtocolMonitor,
    ) {
        self.lifecycle = orchestrator.state();
        self.services = orchestrator.services();

        match metrics.filter(|handle| handle.is_running()) {
            Some(handle) => {
                let snapshot = handle.latest();
                let is_new = self
                    .metrics
                    .as_ref()
                    .is_none_or(|previous| previous.taken_at != snapshot.taken_at);
                if is_new {
                    self.push_cpu(snapshot.cpu_percent);
                }
                self.metrics = Some(snapshot);
            }
            None => self.metrics = None,
        }

        let log = monitor.log();
        let log = log.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.messages = log.recent(VISIBLE_MESSAGES);
        self.messages_total = log.total_received();
        drop(log);

        self.osc_addr = monitor.local_addr().filter(|_| monitor.is_running());
    }

    pub fn push_cpu(&mut self, percent: f32) {
        if self.cpu_history.len() == CPU_HISTORY {
            self.cpu_history.pop_front();
        }
        self.cpu_history.push_back(percent.round().clamp(0.0, 100.0) as u64);
    }

    pub fn record_exit(&mut self, report: &ExitReport) {
        let code = report
            .code
            .map_or_else(|| "a signal".to_string(), |code| format!("code {code}"));
        let text = if report.restart_scheduled {
            format!("{} exited with {code}, restarting", report.service)
        } else {
            format!("{} exited with {code}", report.service)
        };
        self.notify(text, true);
    }

    pub fn notify(&mut self, text: String, is_error: bool) {
        if self.notices.len() == MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(Notice {
            at: Local::now(),
            text,
            is_error,
        });
    }
}

impl Default for DashboardState {
    fn default() -> Self {
        Self::new()
    }
}
