//! ReadinessProbe - waits for a service endpoint to come up
//!
//! A service counts as ready as soon as it accepts a TCP connection. After the
//! handshake a `HEAD` request is sent. Its answer is recorded, but a failed
//! request does not make the service not-ready: HTTP stacks that come up
//! after the socket starts listening are tolerated on purpose.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, instrument, trace, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

const HEAD_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of one readiness wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessResult {
    pub ready: bool,

    /// Attempts made, including the successful one
    pub attempts: u32,

    /// Status of the HEAD request, if the service answered it
    pub http_status: Option<u16>,
}

/// Something that can decide whether a service is reachable
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    async fn wait_until_ready(&self, url: &str, max_attempts: u32) -> ReadinessResult;
}

/// What a single probe attempt observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Unreachable,
    /// Socket accepted, HTTP request failed
    SocketOnly,
    /// Socket accepted and HTTP answered with this status
    Http(u16),
}

impl AttemptOutcome {
    pub fn is_ready(&self) -> bool {
        !matches!(self, AttemptOutcome::Unreachable)
    }
}

/// TCP-then-HEAD probe with a fixed interval between attempts
pub struct ReadinessProbe {
    client: reqwest::Client,
    interval: Duration,
}

impl ReadinessProbe {
    pub fn new(interval: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HEAD_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self { client, interval })
    }

    /// Single attempt against an already parsed URL
    pub async fn probe_once(&self, url: &Url) -> AttemptOutcome {
        let host = url.host_str().unwrap_or("localhost");
        let port = url.port_or_known_default().unwrap_or(80);

        match timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => {
                trace!("socket connection to {host}:{port} successful");
            }
            Ok(Err(e)) => {
                trace!("socket connection to {host}:{port} failed: {e}");
                return AttemptOutcome::Unreachable;
            }
            Err(_) => {
                trace!("socket connection to {host}:{port} timed out");
                return AttemptOutcome::Unreachable;
            }
        }

        match self.client.head(url.clone()).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                debug!("HEAD {url} answered with {status}");
                AttemptOutcome::Http(status)
            }
            Err(e) => {
                debug!("HEAD {url} failed ({e}); treating open socket as ready");
                AttemptOutcome::SocketOnly
            }
        }
    }
}

#[async_trait]
impl ReadinessCheck for ReadinessProbe {
    #[instrument(skip(self))]
    async fn wait_until_ready(&self, url: &str, max_attempts: u32) -> ReadinessResult {
        let url = match Url::parse(url) {
            Ok(url) => url,
            Err(e) => {
                warn!("invalid readiness URL {url}: {e}");
                return ReadinessResult {
                    ready: false,
                    attempts: 0,
                    http_status: None,
                };
            }
        };

        for attempt in 1..=max_attempts {
            let outcome = self.probe_once(&url).await;
            if outcome.is_ready() {
                debug!("{url} ready after {attempt} attempt(s)");
                return ReadinessResult {
                    ready: true,
                    attempts: attempt,
                    http_status: match outcome {
                        AttemptOutcome::Http(status) => Some(status),
                        _ => None,
                    },
                };
            }

            if attempt < max_attempts {
                sleep(self.interval).await;
            }
        }

        warn!("{url} not ready after {max_attempts} attempts");
        ReadinessResult {
            ready: false,
            attempts: max_attempts,
            http_status: None,
        }
    }
}
