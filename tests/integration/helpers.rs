//! Helper functions for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use stagehand::config::{ConsoleConfig, ServiceConfig};
use stagehand::lifecycle::{
    PortReaper, PortScanner, ProcessSupervisor, ReadinessCheck, ReadinessResult,
    ServiceOrchestrator, is_port_available,
};

/// A port nobody listens on right now
pub fn free_port() -> u16 {
    std::net::TcpListener::bind(("127.0.0.1", 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Console config rooted in a temporary directory, with no reserved ports
pub fn test_config(dir: &Path, services: Vec<ServiceConfig>) -> ConsoleConfig {
    ConsoleConfig {
        log_dir: dir.join("logs"),
        error_log: dir.join("errors.log"),
        app_config: dir.join("data").join("config.json"),
        reserved_ports: Vec::new(),
        runtime_dirs: vec![dir.join("dist").join("data"), dir.join("dist").join("logs")],
        readiness_attempts: 3,
        terminate_timeout_secs: 2,
        services,
        ..ConsoleConfig::default()
    }
}

/// Service running a shell snippet
pub fn shell_service(name: &str, port: u16, script: &str) -> ServiceConfig {
    ServiceConfig {
        name: name.to_string(),
        port,
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        working_dir: None,
        env: HashMap::new(),
        readiness_path: "/".to_string(),
        build: None,
    }
}

pub fn sleeper(name: &str) -> ServiceConfig {
    shell_service(name, free_port(), "echo booting; exec sleep 30")
}

fn listen_script(port: u16) -> String {
    format!(
        "import socket, time\n\
         s = socket.socket()\n\
         s.setsockopt(socket.SOL_SOCKET, socket.SO_REUSEADDR, 1)\n\
         s.bind(('127.0.0.1', {port}))\n\
         s.listen(16)\n\
         print('listening', flush=True)\n\
         time.sleep(60)\n"
    )
}

fn connect_script(port: u16) -> String {
    format!(
        "import socket, time\n\
         c = socket.create_connection(('127.0.0.1', {port}))\n\
         print('connected', flush=True)\n\
         time.sleep(60)\n"
    )
}

/// Whether a `python3` interpreter can be spawned
pub fn python3_available() -> bool {
    Command::new("python3")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

/// Service that binds a real TCP listener on its port and never answers HTTP
pub fn listener_service(name: &str) -> ServiceConfig {
    let port = free_port();
    ServiceConfig {
        name: name.to_string(),
        port,
        command: "python3".to_string(),
        args: vec!["-c".to_string(), listen_script(port)],
        working_dir: None,
        env: HashMap::new(),
        readiness_path: "/".to_string(),
        build: None,
    }
}

/// Child process listening on `port`, returned once the socket is bound
pub fn spawn_listener(port: u16) -> Child {
    spawn_python(&listen_script(port))
}

/// Child process holding an established connection to `port`
pub fn spawn_client(port: u16) -> Child {
    spawn_python(&connect_script(port))
}

fn spawn_python(script: &str) -> Child {
    let mut child = Command::new("python3")
        .arg("-c")
        .arg(script)
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();

    let mut line = String::new();
    BufReader::new(child.stdout.take().unwrap())
        .read_line(&mut line)
        .unwrap();
    assert!(!line.is_empty(), "python child exited before it was ready");
    child
}

/// Kill a helper child if it is still around and reap it
pub fn cleanup(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Readiness check with a fixed answer, optionally failing one port only
pub struct FakeReadiness {
    pub failing_port: Option<u16>,
    pub ready: bool,
    pub delay: Duration,
}

impl FakeReadiness {
    pub fn always() -> Box<Self> {
        Box::new(Self {
            failing_port: None,
            ready: true,
            delay: Duration::ZERO,
        })
    }

    pub fn never() -> Box<Self> {
        Box::new(Self {
            failing_port: None,
            ready: false,
            delay: Duration::from_millis(300),
        })
    }

    pub fn failing_on(port: u16) -> Box<Self> {
        Box::new(Self {
            failing_port: Some(port),
            ready: true,
            delay: Duration::from_millis(300),
        })
    }
}

#[async_trait]
impl ReadinessCheck for FakeReadiness {
    async fn wait_until_ready(&self, url: &str, max_attempts: u32) -> ReadinessResult {
        tokio::time::sleep(self.delay).await;

        let ready = match self.failing_port {
            Some(port) => !url.contains(&format!(":{port}/")),
            None => self.ready,
        };

        ReadinessResult {
            ready,
            attempts: if ready { 1 } else { max_attempts },
            http_status: None,
        }
    }
}

/// Never ready, but records whether the service's port was bound while waiting
pub struct BoundButNeverReady {
    pub port: u16,
    pub saw_listener: Arc<AtomicBool>,
}

impl BoundButNeverReady {
    pub fn new(port: u16) -> (Box<Self>, Arc<AtomicBool>) {
        let saw_listener = Arc::new(AtomicBool::new(false));
        (
            Box::new(Self {
                port,
                saw_listener: saw_listener.clone(),
            }),
            saw_listener,
        )
    }
}

#[async_trait]
impl ReadinessCheck for BoundButNeverReady {
    async fn wait_until_ready(&self, _url: &str, max_attempts: u32) -> ReadinessResult {
        let port = self.port;
        if eventually(Duration::from_secs(3), || !is_port_available(port)).await {
            self.saw_listener.store(true, Ordering::SeqCst);
        }

        ReadinessResult {
            ready: false,
            attempts: max_attempts,
            http_status: None,
        }
    }
}

/// Scanner returning a fixed pid list
pub struct FixedScanner(pub Vec<u32>);

#[async_trait]
impl PortScanner for FixedScanner {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn find_pids(&self, _port: u16) -> io::Result<Vec<u32>> {
        Ok(self.0.clone())
    }
}

pub struct BrokenScanner;

#[async_trait]
impl PortScanner for BrokenScanner {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn find_pids(&self, _port: u16) -> io::Result<Vec<u32>> {
        Err(io::Error::new(io::ErrorKind::NotFound, "tool missing"))
    }
}

pub fn orchestrator(config: ConsoleConfig, readiness: Box<dyn ReadinessCheck>) -> ServiceOrchestrator {
    let reaper = PortReaper::with_scanners(
        None,
        Box::new(FixedScanner(Vec::new())),
        Duration::from_millis(50),
    );
    ServiceOrchestrator::with_parts(config, reaper, ProcessSupervisor::new(), readiness)
}

/// Poll `condition` every 20ms until it holds or `limit` passes
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
