use std::net::{Ipv4Addr, TcpListener};

const BACKEND_PORT: u16 = 3000;

const FRONTEND_PORT: u16 = 3001;

const OSC_PORT: u16 = 8000;

pub fn get_default_backend_port() -> u16 {
    BACKEND_PORT
}

pub fn get_default_frontend_port() -> u16 {
    FRONTEND_PORT
}

const STAGEHAND_OSC_PORT: &str = "STAGEHAND_OSC_PORT";

/// OSC monitor port, overridable through the environment.
pub fn get_osc_port() -> u16 {
    let port_from_env = std::env::var(STAGEHAND_OSC_PORT);
    port_from_env.map_or(OSC_PORT, |res| res.parse().unwrap_or(OSC_PORT))
}

const STAGEHAND_LOG: &str = "STAGEHAND_LOG";

pub fn get_log_filter() -> Option<String> {
    std::env::var(STAGEHAND_LOG).ok()
}

const LOOPBACK: Ipv4Addr = Ipv4Addr::LOCALHOST;

/// Whether a TCP listener could bind `port` on the loopback interface right now.
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind((LOOPBACK, port)).is_ok()
}

/// Last `n` lines of `content`, oldest first.
pub fn tail_lines(content: &str, n: usize) -> Vec<String> {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].iter().map(|line| line.to_string()).collect()
}
