//! Integration tests for port reclamation
//!
//! These tests verify that:
//! - A process reported by the native scanner is terminated
//! - A missing native tool falls back to the process-table scan
//! - Nothing found means nothing is killed
//! - A real listener is reclaimed while its connected clients survive

use std::time::Duration;

use stagehand::lifecycle::{PortReaper, is_port_available, signals};

use crate::helpers::{
    BrokenScanner, FixedScanner, cleanup, eventually, free_port, python3_available, spawn_client,
    spawn_listener,
};

#[cfg(unix)]
#[tokio::test]
async fn test_native_match_is_terminated() {
    let mut holder = std::process::Command::new("sleep").arg("30").spawn().unwrap();
    let pid = holder.id();

    let reaper = PortReaper::with_scanners(
        Some(Box::new(FixedScanner(vec![pid]))),
        Box::new(FixedScanner(Vec::new())),
        Duration::from_millis(100),
    );

    assert!(reaper.reclaim(free_port()).await);
    assert!(!signals::pid_exists(pid));
    holder.wait().unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_broken_native_tool_uses_fallback() {
    let mut holder = std::process::Command::new("sleep").arg("30").spawn().unwrap();
    let pid = holder.id();

    let reaper = PortReaper::with_scanners(
        Some(Box::new(BrokenScanner)),
        Box::new(FixedScanner(vec![pid])),
        Duration::from_millis(100),
    );

    assert!(reaper.reclaim(free_port()).await);
    let gone = eventually(Duration::from_secs(1), || !signals::pid_exists(pid)).await;
    assert!(gone);
    holder.wait().unwrap();
}

#[tokio::test]
async fn test_nothing_found_reclaims_nothing() {
    let reaper = PortReaper::with_scanners(
        Some(Box::new(FixedScanner(Vec::new()))),
        Box::new(FixedScanner(Vec::new())),
        Duration::from_millis(10),
    );

    assert!(!reaper.reclaim(free_port()).await);
    assert!(!reaper.reclaim(free_port()).await);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_process_table_finds_listener() {
    use stagehand::lifecycle::PortScanner;
    use stagehand::lifecycle::scanners::ProcessTableScanner;

    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let port = listener.local_addr().unwrap().port();

    let pids = ProcessTableScanner.find_pids(port).await.unwrap();
    assert!(pids.contains(&std::process::id()));

    // the reaper refuses to terminate the console itself
    let reaper = PortReaper::with_scanners(None, Box::new(ProcessTableScanner), Duration::from_millis(10));
    assert!(!reaper.reclaim(port).await);
    assert!(!is_port_available(port));
}

#[cfg(unix)]
#[tokio::test]
async fn test_reclaim_kills_listener_and_spares_client() {
    if !python3_available() {
        eprintln!("python3 not found, skipping");
        return;
    }

    let port = free_port();
    let listener = spawn_listener(port);
    let client = spawn_client(port);
    let (listener_pid, client_pid) = (listener.id(), client.id());
    assert!(!is_port_available(port));

    let reaper = PortReaper::new(Duration::from_millis(300));
    assert!(reaper.reclaim(port).await);

    assert!(is_port_available(port));
    assert!(!signals::pid_exists(listener_pid));
    assert!(signals::pid_exists(client_pid), "connected client was terminated");

    cleanup(client);
    cleanup(listener);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_process_table_fallback_reclaims_real_listener() {
    use stagehand::lifecycle::scanners::ProcessTableScanner;

    if !python3_available() {
        eprintln!("python3 not found, skipping");
        return;
    }

    let port = free_port();
    let listener = spawn_listener(port);
    let client = spawn_client(port);
    let client_pid = client.id();

    let reaper = PortReaper::with_scanners(
        Some(Box::new(BrokenScanner)),
        Box::new(ProcessTableScanner),
        Duration::from_millis(300),
    );
    assert!(reaper.reclaim(port).await);

    assert!(is_port_available(port));
    assert!(signals::pid_exists(client_pid));

    cleanup(client);
    cleanup(listener);
}
