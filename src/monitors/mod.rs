//! Background workers feeding the dashboard
//!
//! - [`metrics`]: samples CPU and memory once a second and tails the service log
//! - [`protocol`]: receives OSC datagrams and keeps the most recent messages

pub mod messages;
pub mod metrics;
pub mod protocol;

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::warn;

pub use messages::{MetricsCommand, MetricsSnapshot};
pub use metrics::{MetricsAggregator, MetricsHandle};
pub use protocol::{MessageLog, ProtocolMessage, ProtocolMonitor};

/// How long a worker gets to exit after its shutdown command
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Wait for a worker that was asked to stop; abort it if it takes too long
pub(crate) async fn join_or_abort(name: &str, mut task: JoinHandle<()>) {
    match timeout(JOIN_TIMEOUT, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("{name} task ended abnormally: {e}"),
        Err(_) => {
            warn!("{name} did not stop within {JOIN_TIMEOUT:?}, aborting");
            task.abort();
        }
    }
}
