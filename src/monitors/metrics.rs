//! MetricsAggregator - samples system load and tails the service log
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick (1s) → sysinfo sample + log tail → watch::Sender<Arc<MetricsSnapshot>> → dashboard
//!     ↑
//!     └─── Commands (SetLogPath, SampleNow, Shutdown)
//! ```

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use sysinfo::System;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, instrument, trace, warn};

use super::join_or_abort;
use super::messages::{MetricsCommand, MetricsSnapshot};
use crate::util::tail_lines;

/// Log lines kept in each snapshot
pub const TAIL_LINES: usize = 5;

pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Bytes read from the end of the log when tailing
const TAIL_WINDOW: u64 = 16 * 1024;

pub struct MetricsAggregator {
    system: System,

    /// Log being tailed, if any
    log_path: Option<PathBuf>,

    /// Last successfully read window
    log_lines: Vec<String>,

    command_rx: mpsc::Receiver<MetricsCommand>,

    snapshot_tx: watch::Sender<Arc<MetricsSnapshot>>,

    interval_duration: Duration,
}

impl MetricsAggregator {
    pub fn new(
        log_path: Option<PathBuf>,
        command_rx: mpsc::Receiver<MetricsCommand>,
        snapshot_tx: watch::Sender<Arc<MetricsSnapshot>>,
        interval_duration: Duration,
    ) -> Self {
        let mut system = System::new();
        // CPU usage is a delta, so it needs a baseline refresh
        system.refresh_cpu_usage();

        Self {
            system,
            log_path,
            log_lines: Vec::new(),
            command_rx,
            snapshot_tx,
            interval_duration,
        }
    }

    /// Run until a Shutdown command arrives or every handle is dropped
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting metrics aggregator");

        let mut ticker = interval(self.interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sample().await;
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(MetricsCommand::SetLogPath { path }) => {
                            debug!("tailing {:?}", path);
                            self.log_path = path;
                            self.log_lines.clear();
                        }

                        Some(MetricsCommand::SampleNow { respond_to }) => {
                            let snapshot = self.sample().await;
                            let _ = respond_to.send(snapshot);
                        }

                        Some(MetricsCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        debug!("metrics aggregator stopped");
    }

    /// Take a sample and publish it
    async fn sample(&mut self) -> Arc<MetricsSnapshot> {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        if let Some(path) = &self.log_path {
            match read_tail(path, TAIL_LINES).await {
                Ok(lines) => self.log_lines = lines,
                // keep the previous window
                Err(e) => trace!("could not tail {}: {e}", path.display()),
            }
        }

        let memory_total = self.system.total_memory();
        let memory_used = self.system.used_memory();
        let memory_percent = if memory_total == 0 {
            0.0
        } else {
            (memory_used as f64 / memory_total as f64 * 100.0) as f32
        };

        let snapshot = Arc::new(MetricsSnapshot {
            cpu_percent: self.system.global_cpu_usage().clamp(0.0, 100.0),
            memory_percent,
            memory_used,
            memory_total,
            taken_at: Local::now(),
            log_lines: self.log_lines.clone(),
        });

        self.snapshot_tx.send_replace(snapshot.clone());
        snapshot
    }
}

/// Last `lines` lines of the file at `path`, reading at most [`TAIL_WINDOW`] bytes
pub async fn read_tail(path: &Path, lines: usize) -> std::io::Result<Vec<String>> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let offset = len.saturating_sub(TAIL_WINDOW);
    file.seek(SeekFrom::Start(offset)).await?;

    let mut bytes = Vec::with_capacity((len - offset) as usize);
    file.read_to_end(&mut bytes).await?;

    let mut text = String::from_utf8_lossy(&bytes).into_owned();
    if offset > 0 {
        // first line is most likely cut off
        let start = text.find('\n').map_or(text.len(), |i| i + 1);
        text.replace_range(..start, "");
    }

    Ok(tail_lines(&text, lines))
}

/// Owner-side handle of a running aggregator
pub struct MetricsHandle {
    command_tx: mpsc::Sender<MetricsCommand>,
    snapshot_rx: watch::Receiver<Arc<MetricsSnapshot>>,
    task: JoinHandle<()>,
}

impl MetricsHandle {
    /// Spawn an aggregator on the standard 1 s cadence
    pub fn spawn(log_path: Option<PathBuf>) -> Self {
        Self::spawn_with_interval(log_path, SAMPLE_INTERVAL)
    }

    pub fn spawn_with_interval(log_path: Option<PathBuf>, every: Duration) -> Self {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(MetricsSnapshot::default()));

        let aggregator = MetricsAggregator::new(log_path, command_rx, snapshot_tx, every);
        let task = tokio::spawn(aggregator.run());

        Self {
            command_tx,
            snapshot_rx,
            task,
        }
    }

    /// Most recently published snapshot
    pub fn latest(&self) -> Arc<MetricsSnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<MetricsSnapshot>> {
        self.snapshot_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub async fn set_log_path(&self, path: Option<PathBuf>) -> bool {
        self.command_tx
            .send(MetricsCommand::SetLogPath { path })
            .await
            .is_ok()
    }

    pub async fn sample_now(&self) -> Option<Arc<MetricsSnapshot>> {
        let (respond_to, response) = oneshot::channel();
        self.command_tx
            .send(MetricsCommand::SampleNow { respond_to })
            .await
            .ok()?;
        response.await.ok()
    }

    /// Ask the aggregator to stop and wait for it
    pub async fn stop(self) {
        if self.command_tx.send(MetricsCommand::Shutdown).await.is_err() {
            debug!("metrics aggregator already gone");
        }
        join_or_abort("metrics aggregator", self.task).await;
    }
}
