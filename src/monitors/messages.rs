//! Message types for the background workers
//!
//! Commands travel over mpsc to a single worker. Metrics go the other way
//! through a `watch` channel, so readers only ever see the latest snapshot.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::oneshot;

/// One sample of system load plus the tail of the watched service log
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    /// Global CPU utilisation, 0-100
    pub cpu_percent: f32,

    /// Used memory relative to total, 0-100
    pub memory_percent: f32,

    pub memory_used: u64,

    pub memory_total: u64,

    /// Wall-clock time the sample was taken
    pub taken_at: DateTime<Local>,

    /// Last lines of the service log, oldest first
    pub log_lines: Vec<String>,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            cpu_percent: 0.0,
            memory_percent: 0.0,
            memory_used: 0,
            memory_total: 0,
            taken_at: Local::now(),
            log_lines: Vec::new(),
        }
    }
}

/// Commands that can be sent to the MetricsAggregator
#[derive(Debug)]
pub enum MetricsCommand {
    /// Tail a different log (or none)
    ///
    /// The current window is cleared; the next sample fills it from the new file.
    SetLogPath { path: Option<PathBuf> },

    /// Sample immediately (bypassing the interval timer)
    SampleNow {
        respond_to: oneshot::Sender<Arc<MetricsSnapshot>>,
    },

    /// Stop the aggregator after the current sample
    Shutdown,
}

/// Commands that can be sent to the protocol receive loop
#[derive(Debug)]
pub enum ReceiverCommand {
    Shutdown,
}
