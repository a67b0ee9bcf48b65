//! Integration tests for the service orchestrator
//!
//! These tests verify that:
//! - Launch walks the lifecycle in order and stop returns to idle
//! - A second launch is rejected while services are tracked
//! - A failed launch rolls back everything it started
//! - Crashes are detected and restarted within the watchdog budget
//! - Exit detection never runs a restart inline

use std::net::TcpListener;
use std::sync::atomic::Ordering;
use std::time::Duration;

use stagehand::lifecycle::{
    LaunchError, LaunchOptions, LifecycleState, TerminateOutcome, signals,
};

use crate::helpers::{
    BoundButNeverReady, FakeReadiness, eventually, free_port, listener_service, orchestrator,
    python3_available, shell_service, sleeper, test_config,
};

#[tokio::test]
async fn test_launch_and_stop_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), vec![sleeper("backend")]);
    let pid_file = config.pid_file("backend");
    let mut orchestrator = orchestrator(config, FakeReadiness::always());

    orchestrator.launch(LaunchOptions::default()).await.unwrap();

    assert_eq!(orchestrator.state(), LifecycleState::Running);
    let steps: Vec<LifecycleState> = orchestrator.history().iter().map(|t| t.to).collect();
    assert_eq!(
        steps,
        vec![
            LifecycleState::PortsReclaiming,
            LifecycleState::Spawning,
            LifecycleState::AwaitingReadiness,
            LifecycleState::Running,
        ]
    );

    let services = orchestrator.services();
    assert_eq!(services.len(), 1);
    let pid = services[0].pid.unwrap();
    assert_eq!(services[0].state, LifecycleState::Running);
    assert_eq!(std::fs::read_to_string(&pid_file).unwrap(), pid.to_string());
    assert!(orchestrator.primary_log().is_some());

    let reports = orchestrator.stop().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].pid, pid);
    assert!(matches!(reports[0].outcome, TerminateOutcome::Exited { .. }));

    assert_eq!(orchestrator.state(), LifecycleState::Idle);
    assert!(!pid_file.exists());
    assert!(!signals::pid_exists(pid));
    assert!(!orchestrator.is_active());
}

#[tokio::test]
async fn test_second_launch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), vec![sleeper("backend")]);
    let mut orchestrator = orchestrator(config, FakeReadiness::always());

    orchestrator.launch(LaunchOptions::default()).await.unwrap();
    let pid = orchestrator.services()[0].pid;

    let err = orchestrator
        .launch(LaunchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LaunchError::AlreadyRunning(ref name) if name == "backend"));

    // the running service is untouched
    assert_eq!(orchestrator.state(), LifecycleState::Running);
    assert_eq!(orchestrator.services()[0].pid, pid);

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_failed_readiness_rolls_back_earlier_services() {
    let dir = tempfile::tempdir().unwrap();
    let first = sleeper("backend");
    let second = sleeper("frontend");
    let failing_port = second.port;
    let config = test_config(dir.path(), vec![first, second]);
    let backend_pid_file = config.pid_file("backend");
    let frontend_pid_file = config.pid_file("frontend");
    let error_log = config.error_log.clone();
    let mut orchestrator = orchestrator(config, FakeReadiness::failing_on(failing_port));

    let err = orchestrator
        .launch(LaunchOptions::default())
        .await
        .unwrap_err();

    match err {
        LaunchError::NotReady {
            service,
            log_excerpt,
            ..
        } => {
            assert_eq!(service, "frontend");
            assert!(log_excerpt.iter().any(|line| line.contains("booting")));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(orchestrator.state(), LifecycleState::Failed);
    assert!(!orchestrator.is_active());
    assert!(!backend_pid_file.exists());
    assert!(!frontend_pid_file.exists());
    assert!(
        orchestrator
            .services()
            .iter()
            .all(|service| service.pid.is_none() && service.state == LifecycleState::Failed)
    );
    assert!(std::fs::read_to_string(error_log).unwrap().contains("launch failed"));

    orchestrator.stop().await;
    assert_eq!(orchestrator.state(), LifecycleState::Idle);
}

#[tokio::test]
async fn test_held_port_aborts_before_spawn() {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = test_config(
        dir.path(),
        vec![shell_service("backend", port, "exec sleep 30")],
    );
    let pid_file = config.pid_file("backend");
    let mut orchestrator = orchestrator(config, FakeReadiness::always());

    let err = orchestrator
        .launch(LaunchOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, LaunchError::PortUnavailable(p) if p == port));
    assert_eq!(orchestrator.state(), LifecycleState::Failed);
    assert!(!pid_file.exists());
    assert!(
        !orchestrator
            .history()
            .iter()
            .any(|t| t.to == LifecycleState::Spawning)
    );
}

#[tokio::test]
async fn test_crash_is_reported_and_returns_to_idle() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(
        dir.path(),
        vec![shell_service("backend", free_port(), "sleep 0.2; exit 3")],
    );
    let pid_file = config.pid_file("backend");
    let error_log = config.error_log.clone();
    let mut orchestrator = orchestrator(config, FakeReadiness::always());

    orchestrator.launch(LaunchOptions::default()).await.unwrap();

    let mut exits = Vec::new();
    for _ in 0..100 {
        exits.extend(orchestrator.poll_exits().await);
        if !exits.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].service, "backend");
    assert_eq!(exits[0].code, Some(3));
    assert!(!exits[0].restart_scheduled);

    assert_eq!(orchestrator.state(), LifecycleState::Idle);
    assert!(!pid_file.exists());
    assert!(
        std::fs::read_to_string(error_log)
            .unwrap()
            .contains("backend exited unexpectedly")
    );
}

#[tokio::test]
async fn test_watchdog_restarts_within_budget() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(
        dir.path(),
        vec![shell_service("backend", free_port(), "sleep 0.2; exit 3")],
    );
    config.watchdog.enabled = true;
    config.watchdog.max_restarts = 1;
    config.watchdog.restart_delay_secs = 0;
    let mut orchestrator = orchestrator(config, FakeReadiness::always());

    orchestrator.launch(LaunchOptions::default()).await.unwrap();

    let mut exits = Vec::new();
    for _ in 0..200 {
        exits.extend(orchestrator.poll_exits().await);
        if exits.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(exits.len(), 2);
    assert!(exits[0].restart_scheduled);
    assert!(!exits[1].restart_scheduled);

    // the restarted process came up before crashing again
    assert!(
        orchestrator
            .history()
            .iter()
            .any(|t| t.service.as_deref() == Some("backend") && t.to == LifecycleState::Running)
    );
    assert_eq!(orchestrator.state(), LifecycleState::Idle);
    assert!(!orchestrator.is_active());
}

#[tokio::test]
async fn test_recover_stale_skips_tracked_services() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), vec![sleeper("backend")]);
    let mut orchestrator = orchestrator(config, FakeReadiness::always());

    orchestrator.launch(LaunchOptions::default()).await.unwrap();
    let pid = orchestrator.services()[0].pid.unwrap();

    let recovered = orchestrator.recover_stale().await;
    assert!(recovered.is_empty());

    let alive = eventually(Duration::from_millis(200), || signals::pid_exists(pid)).await;
    assert!(alive);

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_hung_service_fails_and_cleans_up() {
    if !python3_available() {
        eprintln!("python3 not found, skipping");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let service = listener_service("backend");
    let port = service.port;
    let config = test_config(dir.path(), vec![service]);
    let pid_file = config.pid_file("backend");
    let (readiness, saw_listener) = BoundButNeverReady::new(port);
    let mut orchestrator = orchestrator(config, readiness);

    let err = orchestrator
        .launch(LaunchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LaunchError::NotReady { attempts: 3, .. }));

    // the service really held its port while readiness was pending
    assert!(saw_listener.load(Ordering::SeqCst));

    assert_eq!(orchestrator.state(), LifecycleState::Failed);
    assert!(
        !orchestrator
            .history()
            .iter()
            .any(|t| t.to == LifecycleState::Running)
    );
    assert!(!pid_file.exists());
    let freed = eventually(Duration::from_secs(2), || stagehand::lifecycle::is_port_available(port)).await;
    assert!(freed);
    assert!(!orchestrator.is_active());
}

#[tokio::test]
async fn test_exit_detection_only_schedules_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(
        dir.path(),
        vec![shell_service("backend", free_port(), "sleep 0.2; exit 3")],
    );
    config.watchdog.enabled = true;
    config.watchdog.max_restarts = 1;
    config.watchdog.restart_delay_secs = 0;
    let mut orchestrator = orchestrator(config, FakeReadiness::always());

    orchestrator.launch(LaunchOptions::default()).await.unwrap();

    let mut exits = Vec::new();
    for _ in 0..100 {
        exits.extend(orchestrator.detect_exits());
        if !exits.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(exits.len(), 1);
    assert!(exits[0].restart_scheduled);
    // nothing was spawned again yet, the restart only waits in the queue
    assert!(orchestrator.services().iter().all(|s| s.pid.is_none()));
    assert!(orchestrator.has_due_restart());
    assert!(orchestrator.is_active());
    assert_eq!(orchestrator.state(), LifecycleState::Running);

    orchestrator.run_due_restarts().await;

    assert!(!orchestrator.has_due_restart());
    assert!(orchestrator.services().iter().any(|s| s.pid.is_some()));

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_stop_when_idle_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), vec![sleeper("backend")]);
    let pid_file = config.pid_file("backend");
    let mut orchestrator = orchestrator(config, FakeReadiness::always());

    let reports = orchestrator.stop().await;

    assert!(reports.is_empty());
    assert_eq!(orchestrator.state(), LifecycleState::Idle);
    assert!(orchestrator.history().is_empty());
    assert!(!pid_file.exists());
}
