mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{connect, next, providers, quiet_liveness, EchoSynth, VERSION};
use relay_core::{
    ChannelRegistry, ControlOutcome, DisconnectReason, LivenessConfig, Outbound, RelayError,
    RequestQueue, TicketBook,
};
use tokio::sync::mpsc;

fn registry(liveness: LivenessConfig) -> (ChannelRegistry, RequestQueue, TicketBook) {
    let queue = RequestQueue::new();
    let tickets = TicketBook::new();
    let registry = ChannelRegistry::new(VERSION, liveness, queue.clone(), tickets.clone());
    (registry, queue, tickets)
}

#[tokio::test]
async fn register_assigns_stable_names() {
    let (registry, _, _) = registry(quiet_liveness());
    let (a, _rx_a) = connect(&registry, "Streamer");
    let (b, _rx_b) = connect(&registry, "streamer");

    assert_eq!(a.channel, "streamer");
    assert_ne!(a.id, b.id);
    assert!(!a.display_name.is_empty());
    assert_eq!(registry.clients("streamer").len(), 2);
    assert_eq!(registry.clients("streamer")[0].handle.display_name, a.display_name);
    assert_eq!(registry.channels(), vec!["streamer".to_string()]);
}

#[tokio::test]
async fn outdated_client_is_told_to_update() {
    let (registry, _, _) = registry(quiet_liveness());
    let (tx, mut rx) = mpsc::channel(4);

    let err = registry
        .register("chan", Some("old-hash"), tx)
        .expect_err("version mismatch");
    assert!(matches!(err, RelayError::VersionMismatch { .. }));
    assert_eq!(rx.recv().await, Some(Outbound::Text(format!("update {VERSION}"))));
    assert_eq!(rx.recv().await, None);
    assert!(!registry.has_client("chan"));
}

#[tokio::test]
async fn send_fans_out_to_every_connection() -> relay_core::Result<()> {
    let (registry, _, _) = registry(quiet_liveness());
    let (_a, mut rx_a) = connect(&registry, "chan");
    let (_b, mut rx_b) = connect(&registry, "chan");
    let (_c, mut rx_c) = connect(&registry, "other");

    let reached = registry.send("chan", Outbound::Text("hello".into())).await?;
    assert_eq!(reached, 2);
    assert_eq!(next(&mut rx_a).await, Outbound::Text("hello".into()));
    assert_eq!(next(&mut rx_b).await, Outbound::Text("hello".into()));
    assert!(rx_c.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn send_without_client_is_not_found() {
    let (registry, _, _) = registry(quiet_liveness());
    let err = registry
        .send("nobody", Outbound::Text("x".into()))
        .await
        .expect_err("no client");
    assert!(matches!(err, RelayError::NotFound(_)));
}

#[tokio::test]
async fn write_failure_unregisters() {
    let (registry, _, _) = registry(quiet_liveness());
    let (_handle, rx) = connect(&registry, "chan");
    drop(rx);

    let err = registry
        .send("chan", Outbound::Binary(vec![1, 2, 3]))
        .await
        .expect_err("writer gone");
    assert!(matches!(err, RelayError::Transport(_)));
    assert!(!registry.has_client("chan"));
}

#[tokio::test]
async fn unregister_is_idempotent_and_cancels_pending() {
    let (registry, queue, tickets) = registry(quiet_liveness());
    let (handle, _rx) = connect(&registry, "chan");
    let batch = queue.admit("chan", vec![]).expect("admitted");
    tickets.open("chan", &batch.correlation_id);

    assert!(registry.unregister(&handle, DisconnectReason::Disconnected));
    assert!(!registry.unregister(&handle, DisconnectReason::Disconnected));
    assert!(!queue.is_pending("chan"));
    assert!(tickets.is_empty());
    assert!(batch.cancellation.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn silent_client_is_dropped_after_initial_deadline() {
    let (registry, _, _) = registry(LivenessConfig::default());
    let (_handle, mut rx) = connect(&registry, "chan");

    tokio::time::sleep(Duration::from_secs(119)).await;
    assert!(registry.has_client("chan"));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!registry.has_client("chan"));

    let mut keepalives = 0;
    while let Some(msg) = rx.recv().await {
        if msg == Outbound::Keepalive {
            keepalives += 1;
        }
    }
    assert!(keepalives >= 3);
}

#[tokio::test(start_paused = true)]
async fn ping_extends_liveness() {
    let (registry, _, _) = registry(LivenessConfig::default());
    let (handle, _rx) = connect(&registry, "chan");

    tokio::time::sleep(Duration::from_secs(100)).await;
    assert!(registry.heartbeat(&handle));
    tokio::time::sleep(Duration::from_secs(50)).await;
    assert!(registry.has_client("chan"));

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(!registry.has_client("chan"));
}

#[tokio::test]
async fn close_message_unregisters() {
    let relay = common::relay(providers(Arc::new(EchoSynth::default())));
    let (handle, _rx) = connect(&relay.registry, "chan");

    assert_eq!(relay.handle_control(&handle, "ping"), ControlOutcome::Continue);
    assert_eq!(relay.handle_control(&handle, "hello?"), ControlOutcome::Continue);
    assert_eq!(relay.handle_control(&handle, "close"), ControlOutcome::Disconnect);
    assert!(!relay.registry.has_client("chan"));
}

#[test]
fn liveness_deadline_must_exceed_interval() {
    let cfg = LivenessConfig {
        expected_interval: Duration::from_secs(60),
        deadline: Duration::from_secs(60),
        ..LivenessConfig::default()
    };
    assert!(cfg.validate().is_err());
    assert!(LivenessConfig::default().validate().is_ok());
}
