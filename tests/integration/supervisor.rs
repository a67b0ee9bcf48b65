//! Integration tests for the process supervisor
//!
//! These tests verify that:
//! - Spawned children write into their log and get a PID file
//! - Environment overrides reach the child
//! - A stubborn child is reported, not killed
//! - Stale PID files from an earlier run are cleaned up

use std::collections::HashMap;
use std::time::Duration;

use stagehand::lifecycle::{ProcessSupervisor, TerminateOutcome, signals};

use crate::helpers::{eventually, shell_service};

#[tokio::test]
async fn test_spawn_captures_output_and_writes_pid_file() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("logs").join("backend.log");
    let pid_file = dir.path().join("logs").join("backend.pid");
    let supervisor = ProcessSupervisor::new();

    let mut handle = supervisor
        .spawn(
            &shell_service("backend", 0, "echo booting; exec sleep 30"),
            &log_path,
            &pid_file,
        )
        .unwrap();

    let recorded = std::fs::read_to_string(&pid_file).unwrap();
    assert_eq!(recorded, handle.pid().to_string());

    let logged = eventually(Duration::from_secs(2), || {
        std::fs::read_to_string(&log_path).is_ok_and(|log| log.contains("booting"))
    })
    .await;
    assert!(logged);

    let outcome = supervisor.terminate(&mut handle, Duration::from_secs(2)).await;
    assert!(matches!(outcome, TerminateOutcome::Exited { .. }));
    assert!(!signals::pid_exists(handle.pid()));
}

#[tokio::test]
async fn test_env_overrides_reach_child() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("env.log");
    let mut service = shell_service("env", 0, "echo \"mark=$STAGE_MARK\"");
    service.env = HashMap::from([("STAGE_MARK".to_string(), "cue42".to_string())]);

    let supervisor = ProcessSupervisor::new();
    let mut handle = supervisor
        .spawn(&service, &log_path, &dir.path().join("env.pid"))
        .unwrap();

    let exited = eventually(Duration::from_secs(2), || supervisor.try_exit(&mut handle).is_some()).await;
    assert!(exited);
    assert!(std::fs::read_to_string(&log_path).unwrap().contains("mark=cue42"));
}

#[tokio::test]
async fn test_stubborn_child_is_still_running() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = ProcessSupervisor::new();
    let mut handle = supervisor
        .spawn(
            &shell_service("stubborn", 0, "trap '' TERM; sleep 30"),
            &dir.path().join("stubborn.log"),
            &dir.path().join("stubborn.pid"),
        )
        .unwrap();

    // let the shell install its trap
    tokio::time::sleep(Duration::from_millis(200)).await;

    let outcome = supervisor
        .terminate(&mut handle, Duration::from_millis(300))
        .await;
    assert_eq!(outcome, TerminateOutcome::StillRunning);
    assert!(signals::pid_exists(handle.pid()));

    // clean up by force
    assert!(signals::send_kill(handle.pid()));
    let exited = eventually(Duration::from_secs(2), || supervisor.try_exit(&mut handle).is_some()).await;
    assert!(exited);
}

#[tokio::test]
async fn test_recover_stale_stops_leftover_process() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("backend.pid");

    let mut leftover = std::process::Command::new("sleep").arg("30").spawn().unwrap();
    std::fs::write(&pid_file, leftover.id().to_string()).unwrap();

    let supervisor = ProcessSupervisor::new();
    let recovered = supervisor
        .recover_stale(&pid_file, Duration::from_secs(2))
        .await;

    assert_eq!(recovered, Some(leftover.id()));
    assert!(!pid_file.exists());

    let status = leftover.wait().unwrap();
    assert!(!status.success());
}

#[tokio::test]
async fn test_recover_without_pid_file_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = ProcessSupervisor::new();

    let recovered = supervisor
        .recover_stale(&dir.path().join("missing.pid"), Duration::from_millis(100))
        .await;
    assert_eq!(recovered, None);
}
