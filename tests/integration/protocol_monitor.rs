//! Integration tests for the OSC protocol monitor
//!
//! These tests verify that:
//! - Messages sent over UDP show up in the log
//! - Bundles are flattened in order
//! - Undecodable datagrams are dropped
//! - The log keeps only the newest 100 messages

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use stagehand::monitors::ProtocolMonitor;
use stagehand::osc::{OscArg, OscBundle, OscMessage, OscPacket};
use tokio::net::UdpSocket;

use crate::helpers::eventually;

async fn started_monitor() -> (ProtocolMonitor, UdpSocket, SocketAddr) {
    let mut monitor = ProtocolMonitor::with_addr(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)));
    assert!(monitor.start().await.unwrap());
    let target = monitor.local_addr().unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    (monitor, sender, target)
}

fn logged(monitor: &ProtocolMonitor) -> usize {
    monitor.log().lock().map(|log| log.len()).unwrap_or(0)
}

#[tokio::test]
async fn test_message_is_recorded() {
    let (mut monitor, sender, target) = started_monitor().await;

    let message = OscMessage::new(
        "/fader/1",
        vec![OscArg::Float(0.75), OscArg::String("main".to_string())],
    );
    sender.send_to(&message.encode(), target).await.unwrap();

    assert!(eventually(Duration::from_secs(2), || logged(&monitor) == 1).await);
    let recent = monitor.recent(5);
    assert_eq!(recent[0].address, "/fader/1");
    assert_eq!(recent[0].args, message.args);

    assert!(monitor.stop().await);
    assert!(!monitor.is_running());
}

#[tokio::test]
async fn test_bundle_is_flattened_in_order() {
    let (mut monitor, sender, target) = started_monitor().await;

    let bundle = OscPacket::Bundle(OscBundle {
        timetag: 1,
        content: vec![
            OscPacket::Message(OscMessage::new("/cue/go", vec![OscArg::Int(12)])),
            OscPacket::Message(OscMessage::new("/cue/fade", vec![OscArg::Double(2.5)])),
        ],
    });
    sender.send_to(&bundle.encode(), target).await.unwrap();

    assert!(eventually(Duration::from_secs(2), || logged(&monitor) == 2).await);
    let addresses: Vec<String> = monitor
        .recent(5)
        .into_iter()
        .map(|message| message.address)
        .collect();
    assert_eq!(addresses, vec!["/cue/go", "/cue/fade"]);

    monitor.stop().await;
}

#[tokio::test]
async fn test_garbage_is_dropped() {
    let (mut monitor, sender, target) = started_monitor().await;

    sender.send_to(b"not osc", target).await.unwrap();
    sender
        .send_to(&OscMessage::new("/ping", Vec::new()).encode(), target)
        .await
        .unwrap();

    // datagrams arrive in order on loopback, so the ping lands after the garbage
    assert!(eventually(Duration::from_secs(2), || logged(&monitor) == 1).await);
    assert_eq!(monitor.recent(5)[0].address, "/ping");
    assert_eq!(monitor.log().lock().unwrap().total_received(), 1);

    monitor.stop().await;
}

#[tokio::test]
async fn test_log_keeps_newest_hundred() {
    let (mut monitor, sender, target) = started_monitor().await;

    for i in 0..150 {
        let message = OscMessage::new("/count", vec![OscArg::Int(i)]);
        sender.send_to(&message.encode(), target).await.unwrap();
        if i % 25 == 0 {
            // let the receiver drain the socket buffer
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    let total = |monitor: &ProtocolMonitor| {
        monitor
            .log()
            .lock()
            .map(|log| log.total_received())
            .unwrap_or(0)
    };
    assert!(eventually(Duration::from_secs(3), || total(&monitor) == 150).await);

    let log = monitor.log();
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 100);
    let first = log.iter().next().unwrap();
    assert_eq!(first.args, vec![OscArg::Int(50)]);
    drop(log);

    monitor.stop().await;
}

#[tokio::test]
async fn test_restart_after_stop() {
    let (mut monitor, _sender, _target) = started_monitor().await;

    assert!(!monitor.start().await.unwrap());
    assert!(monitor.stop().await);
    assert!(!monitor.stop().await);
    assert!(monitor.start().await.unwrap());
    assert!(monitor.is_running());

    monitor.stop().await;
}
