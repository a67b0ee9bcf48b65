//! ProtocolMonitor - listens for OSC traffic and keeps the latest messages
//!
//! The receive loop is the only writer of the [`MessageLog`]; the dashboard
//! reads it under the same mutex.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use super::join_or_abort;
use super::messages::ReceiverCommand;
use crate::osc::{self, OscArg};

/// Messages kept before the oldest is evicted
pub const MESSAGE_LOG_CAPACITY: usize = 100;

/// Largest UDP payload over IPv4
const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolMessage {
    pub received_at: DateTime<Local>,
    pub address: String,
    pub args: Vec<OscArg>,
}

impl fmt::Display for ProtocolMessage {
    /// `HH:MM:SS.mmm /address: [arg, ...]`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: [", self.received_at.format("%H:%M:%S%.3f"), self.address)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str("]")
    }
}

/// Fixed-capacity FIFO of received messages
#[derive(Debug, Clone)]
pub struct MessageLog {
    entries: VecDeque<ProtocolMessage>,
    capacity: usize,
    total: u64,
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            total: 0,
        }
    }

    pub fn push(&mut self, message: ProtocolMessage) {
        self.total += 1;
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(message);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages received since the monitor was created, evicted ones included
    pub fn total_received(&self) -> u64 {
        self.total
    }

    /// The newest `n` messages, oldest first
    pub fn recent(&self, n: usize) -> Vec<ProtocolMessage> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProtocolMessage> {
        self.entries.iter()
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(MESSAGE_LOG_CAPACITY)
    }
}

pub type SharedMessageLog = Arc<Mutex<MessageLog>>;

fn lock(log: &SharedMessageLog) -> MutexGuard<'_, MessageLog> {
    log.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Receiver {
    command_tx: mpsc::Sender<ReceiverCommand>,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

pub struct ProtocolMonitor {
    bind_addr: SocketAddr,
    log: SharedMessageLog,
    receiver: Option<Receiver>,
}

impl ProtocolMonitor {
    /// Monitor listening on `127.0.0.1:<port>` once started
    pub fn new(port: u16) -> Self {
        Self::with_addr(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
    }

    pub fn with_addr(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            log: Arc::new(Mutex::new(MessageLog::default())),
            receiver: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.receiver
            .as_ref()
            .is_some_and(|receiver| !receiver.task.is_finished())
    }

    /// Address actually bound, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.receiver.as_ref().map(|receiver| receiver.local_addr)
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    pub fn log(&self) -> SharedMessageLog {
        self.log.clone()
    }

    /// The newest `n` messages, oldest first
    pub fn recent(&self, n: usize) -> Vec<ProtocolMessage> {
        lock(&self.log).recent(n)
    }

    /// Bind the socket and start receiving. Returns `false` if already running.
    #[instrument(skip(self), fields(addr = %self.bind_addr))]
    pub async fn start(&mut self) -> io::Result<bool> {
        if self.is_running() {
            warn!("protocol monitor is already running");
            return Ok(false);
        }

        let socket = UdpSocket::bind(self.bind_addr).await?;
        let local_addr = socket.local_addr()?;
        let (command_tx, command_rx) = mpsc::channel(1);
        let task = tokio::spawn(receive_loop(socket, self.log.clone(), command_rx));

        info!("listening for OSC on {local_addr}");
        self.receiver = Some(Receiver {
            command_tx,
            task,
            local_addr,
        });
        Ok(true)
    }

    /// Stop receiving. Returns `false` if the monitor was not running.
    #[instrument(skip(self), fields(addr = %self.bind_addr))]
    pub async fn stop(&mut self) -> bool {
        let Some(receiver) = self.receiver.take() else {
            warn!("protocol monitor is not running");
            return false;
        };

        if receiver.command_tx.send(ReceiverCommand::Shutdown).await.is_err() {
            debug!("receive loop already gone");
        }
        join_or_abort("protocol monitor", receiver.task).await;
        info!("stopped listening on {}", receiver.local_addr);
        true
    }
}

async fn receive_loop(
    socket: UdpSocket,
    log: SharedMessageLog,
    mut command_rx: mpsc::Receiver<ReceiverCommand>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, peer)) => record(&log, &buf[..len], peer),
                    Err(e) => warn!("receive failed: {e}"),
                }
            }

            cmd = command_rx.recv() => {
                match cmd {
                    Some(ReceiverCommand::Shutdown) | None => break,
                }
            }
        }
    }

    debug!("receive loop stopped");
}

fn record(log: &SharedMessageLog, datagram: &[u8], peer: SocketAddr) {
    let packet = match osc::decode(datagram) {
        Ok(packet) => packet,
        Err(e) => {
            warn!("dropping {} byte datagram from {peer}: {e}", datagram.len());
            return;
        }
    };

    let received_at = Local::now();
    let mut log = lock(log);
    for message in packet.into_messages() {
        trace!("{peer} -> {}", message.address);
        log.push(ProtocolMessage {
            received_at,
            address: message.address,
            args: message.args,
        });
    }
}
