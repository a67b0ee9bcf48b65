//! Port-to-process scanners
//!
//! Two ways to answer "who holds this port": the platform's own listing tool,
//! and a walk over the process table that works without any external binary.
//! Both report listeners only. Clients connected to the port are left alone.

use std::collections::HashSet;
use std::io;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::error;

/// Finds the processes bound to a TCP port
#[async_trait]
pub trait PortScanner: Send + Sync {
    /// Human-readable name for logs
    fn name(&self) -> &'static str;

    /// Process ids bound to `port`, in discovery order, without duplicates
    async fn find_pids(&self, port: u16) -> io::Result<Vec<u32>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeTool {
    Lsof,
    Netstat,
}

/// Scanner backed by `lsof` (Unix) or `netstat -ano` (Windows)
#[derive(Debug, Clone)]
pub struct NativeScanner {
    tool: NativeTool,
}

impl NativeScanner {
    pub fn new(tool: NativeTool) -> Self {
        Self { tool }
    }

    /// Pick the listing tool for the current platform, if there is one
    pub fn detect() -> Option<Self> {
        if cfg!(windows) {
            Some(Self::new(NativeTool::Netstat))
        } else if cfg!(unix) {
            Some(Self::new(NativeTool::Lsof))
        } else {
            None
        }
    }

    pub fn tool(&self) -> NativeTool {
        self.tool
    }
}

#[async_trait]
impl PortScanner for NativeScanner {
    fn name(&self) -> &'static str {
        match self.tool {
            NativeTool::Lsof => "lsof",
            NativeTool::Netstat => "netstat",
        }
    }

    async fn find_pids(&self, port: u16) -> io::Result<Vec<u32>> {
        match self.tool {
            NativeTool::Lsof => {
                let output = Command::new("lsof")
                    .arg("-nP")
                    .arg(format!("-iTCP:{port}"))
                    .arg("-sTCP:LISTEN")
                    .output()
                    .await?;
                // lsof exits with 1 when nothing matches
                if !output.status.success() && output.stdout.is_empty() {
                    return Ok(Vec::new());
                }
                Ok(parse_lsof(&String::from_utf8_lossy(&output.stdout)))
            }
            NativeTool::Netstat => {
                let output = Command::new("netstat").arg("-ano").output().await?;
                if !output.status.success() {
                    return Err(io::Error::other(format!(
                        "netstat exited with {}",
                        output.status
                    )));
                }
                Ok(parse_netstat(&String::from_utf8_lossy(&output.stdout), port))
            }
        }
    }
}

type Pattern = LazyLock<Result<Regex, regex::Error>>;

static LSOF_LISTENER: Pattern =
    LazyLock::new(|| Regex::new(r"^\S+\s+(\d+)\s.*\(LISTEN\)\s*$"));

static NETSTAT_LISTENER: Pattern =
    LazyLock::new(|| Regex::new(r"^\s*TCP\s+\S+:(\d+)\s+\S+\s+LISTENING\s+(\d+)\s*$"));

fn compiled(pattern: &'static Pattern) -> Option<&'static Regex> {
    match LazyLock::force(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            error!("invalid scanner pattern: {e}");
            None
        }
    }
}

/// PIDs of `(LISTEN)` rows in `lsof -i` output (header line skipped)
pub fn parse_lsof(output: &str) -> Vec<u32> {
    let Some(listener) = compiled(&LSOF_LISTENER) else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    output
        .lines()
        .skip(1)
        .filter_map(|line| listener.captures(line))
        .filter_map(|caps| caps[1].parse::<u32>().ok())
        .filter(|pid| seen.insert(*pid))
        .collect()
}

/// Owning PIDs of sockets listening on local `port` in `netstat -ano` output
pub fn parse_netstat(output: &str, port: u16) -> Vec<u32> {
    let Some(listener) = compiled(&NETSTAT_LISTENER) else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    output
        .lines()
        .filter_map(|line| listener.captures(line))
        .filter(|caps| caps[1].parse::<u16>().ok() == Some(port))
        .filter_map(|caps| caps[2].parse::<u32>().ok())
        .filter(|pid| *pid != 0 && seen.insert(*pid))
        .collect()
}

/// Fallback scanner: inspects every process's open sockets
///
/// On Linux the socket inodes bound to the port come from `/proc/net/tcp{,6}` and
/// are matched against `/proc/<pid>/fd`. Other platforms report no match.
#[derive(Debug, Clone, Default)]
pub struct ProcessTableScanner;

#[async_trait]
impl PortScanner for ProcessTableScanner {
    fn name(&self) -> &'static str {
        "process-table"
    }

    async fn find_pids(&self, port: u16) -> io::Result<Vec<u32>> {
        #[cfg(target_os = "linux")]
        {
            tokio::task::spawn_blocking(move || linux::find_pid(port))
                .await
                .map_err(io::Error::other)
        }

        #[cfg(not(target_os = "linux"))]
        {
            tracing::debug!("process-table scan not supported on this platform (port {port})");
            Ok(Vec::new())
        }
    }
}

/// `st` column value of a listening socket
const TCP_LISTEN: &str = "0A";

/// Inodes of sockets listening on local `port` in a `/proc/net/tcp`-format table
pub fn parse_proc_net_tcp(content: &str, port: u16) -> Vec<u64> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let local = fields.get(1)?;
            let (_, port_hex) = local.rsplit_once(':')?;
            let local_port = u16::from_str_radix(port_hex, 16).ok()?;
            if *fields.get(3)? != TCP_LISTEN {
                return None;
            }
            let inode = fields.get(9)?.parse::<u64>().ok()?;
            (local_port == port && inode != 0).then_some(inode)
        })
        .collect()
}

#[cfg(target_os = "linux")]
mod linux {
    use std::collections::HashSet;
    use std::fs;

    use tracing::{debug, trace};

    use super::parse_proc_net_tcp;
    use crate::lifecycle::signals::list_processes;

    pub(super) fn find_pid(port: u16) -> Vec<u32> {
        let inodes: HashSet<u64> = ["/proc/net/tcp", "/proc/net/tcp6"]
            .iter()
            .filter_map(|table| fs::read_to_string(table).ok())
            .flat_map(|content| parse_proc_net_tcp(&content, port))
            .collect();

        if inodes.is_empty() {
            trace!("no socket bound to port {port} in /proc/net");
            return Vec::new();
        }

        for (pid, name) in list_processes() {
            // Processes we may not inspect are skipped silently
            let Ok(entries) = fs::read_dir(format!("/proc/{pid}/fd")) else {
                continue;
            };
            let holds_port = entries.filter_map(Result::ok).any(|entry| {
                fs::read_link(entry.path())
                    .ok()
                    .and_then(|target| socket_inode(&target.to_string_lossy()))
                    .is_some_and(|inode| inodes.contains(&inode))
            });
            if holds_port {
                debug!("process {pid} ({name}) holds port {port}");
                return vec![pid];
            }
        }

        Vec::new()
    }

    fn socket_inode(link: &str) -> Option<u64> {
        link.strip_prefix("socket:[")?
            .strip_suffix(']')?
            .parse()
            .ok()
    }

}
