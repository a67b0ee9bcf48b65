//! Integration tests for the readiness probe
//!
//! These tests verify that:
//! - An answered HEAD request makes a service ready
//! - An accepted socket alone is enough (soft ready)
//! - An unreachable port uses up every attempt

use std::time::{Duration, Instant};

use stagehand::lifecycle::{ReadinessCheck, ReadinessProbe};
use tokio::net::TcpListener;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::free_port;

#[tokio::test]
async fn test_http_answer_is_ready() {
    let mock_server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let probe = ReadinessProbe::new(Duration::from_millis(50)).unwrap();
    let result = probe
        .wait_until_ready(&format!("{}/", mock_server.uri()), 5)
        .await;

    assert!(result.ready);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.http_status, Some(200));
}

#[tokio::test]
async fn test_error_status_still_counts_as_ready() {
    let mock_server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let probe = ReadinessProbe::new(Duration::from_millis(50)).unwrap();
    let result = probe
        .wait_until_ready(&format!("{}/", mock_server.uri()), 5)
        .await;

    assert!(result.ready);
    assert_eq!(result.http_status, Some(503));
}

#[tokio::test]
async fn test_accepted_socket_is_soft_ready() {
    // Accepts connections and closes them without speaking HTTP
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });

    let probe = ReadinessProbe::new(Duration::from_secs(1)).unwrap();
    let started = Instant::now();
    let result = probe
        .wait_until_ready(&format!("http://127.0.0.1:{port}/"), 3)
        .await;

    assert!(result.ready);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.http_status, None);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_unreachable_port_exhausts_attempts() {
    let port = free_port();
    let probe = ReadinessProbe::new(Duration::from_millis(50)).unwrap();

    let result = probe
        .wait_until_ready(&format!("http://127.0.0.1:{port}/"), 2)
        .await;

    assert!(!result.ready);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.http_status, None);
}

#[tokio::test]
async fn test_late_listener_is_seen_on_next_attempt() {
    let port = free_port();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });

    let probe = ReadinessProbe::new(Duration::from_millis(200)).unwrap();
    let result = probe
        .wait_until_ready(&format!("http://127.0.0.1:{port}/"), 10)
        .await;

    assert!(result.ready);
    assert!(result.attempts <= 3);
}
