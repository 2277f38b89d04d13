//! Lifecycle tests for the link manager over the in-process transport

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use peerlink::link::{LinkEvent, LinkManager, LinkState, PeerAddr, ServiceId};
use peerlink::transport::{Connection, MemHub, MemTransport, RecvStream, Transport};

fn service() -> ServiceId {
    ServiceId::default()
}

fn spawn_node(
    hub: &Arc<MemHub>,
    node: &str,
) -> (
    Arc<LinkManager<MemTransport>>,
    mpsc::UnboundedReceiver<LinkEvent>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(MemTransport::new(hub, node));
    (LinkManager::new(transport, service(), event_tx), event_rx)
}

/// Let every woken worker task run to completion of its current step.
async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    sleep(Duration::from_millis(20)).await;
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

fn drain(events: &mut mpsc::UnboundedReceiver<LinkEvent>) -> Vec<LinkEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

#[tokio::test]
async fn inbound_connection_emits_events_in_order() {
    let hub = MemHub::new();
    let (manager, mut events) = spawn_node(&hub, "alpha");

    manager.start();
    settle().await;

    let remote = MemTransport::new(&hub, "beta");
    let (_conn, _info) = remote
        .dial(&PeerAddr::from("alpha"), &service())
        .await
        .unwrap();
    settle().await;

    assert_eq!(manager.state(), LinkState::Connected);
    let peer = manager.peer().unwrap();
    assert_eq!(peer.addr, PeerAddr::from("beta"));
    assert_eq!(peer.name.as_deref(), Some("beta"));

    let drained = drain(&mut events);
    assert_eq!(drained.len(), 3);
    assert_eq!(drained[0], LinkEvent::StateChanged(LinkState::Listening));
    assert!(matches!(
        &drained[1],
        LinkEvent::PeerIdentified(info) if info.addr == PeerAddr::from("beta")
    ));
    assert_eq!(drained[2], LinkEvent::StateChanged(LinkState::Connected));
}

#[tokio::test]
async fn dial_failure_surfaces_fault_and_returns_to_listening() {
    let hub = MemHub::new();
    let (manager, mut events) = spawn_node(&hub, "alpha");

    manager.connect(PeerAddr::from("nobody"));
    settle().await;

    assert_eq!(manager.state(), LinkState::Listening);
    assert_eq!(hub.listener_count(), 1);
    assert!(hub.discovery_cancels() >= 1);

    let drained = drain(&mut events);
    assert_eq!(
        drained,
        vec![
            LinkEvent::StateChanged(LinkState::Connecting),
            LinkEvent::Fault("unable to connect".to_string()),
            LinkEvent::StateChanged(LinkState::Listening),
        ]
    );
}

#[tokio::test]
async fn lost_connection_recovers_to_a_fresh_listener() {
    let hub = MemHub::new();
    let (manager, mut events) = spawn_node(&hub, "alpha");

    manager.start();
    settle().await;

    let remote = MemTransport::new(&hub, "beta");
    let (conn, _info) = remote
        .dial(&PeerAddr::from("alpha"), &service())
        .await
        .unwrap();
    settle().await;
    assert_eq!(manager.state(), LinkState::Connected);
    drain(&mut events);

    // Remote goes away: the pump's read fails and recovery kicks in.
    drop(conn);
    settle().await;

    assert_eq!(manager.state(), LinkState::Listening);
    assert_eq!(hub.listener_count(), 1);
    assert!(manager.peer().is_none());

    let drained = drain(&mut events);
    assert_eq!(
        drained,
        vec![
            LinkEvent::Fault("connection lost".to_string()),
            LinkEvent::StateChanged(LinkState::Listening),
        ]
    );
}

#[tokio::test]
async fn write_is_a_noop_unless_connected() {
    let hub = MemHub::new();
    let (manager, mut events) = spawn_node(&hub, "alpha");

    manager.write(Bytes::from_static(b"ignored while idle"));
    settle().await;
    assert!(drain(&mut events).is_empty());

    manager.start();
    settle().await;
    drain(&mut events);

    manager.write(Bytes::from_static(b"ignored while listening"));
    settle().await;
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn connecting_retires_the_listener_before_the_pump_runs() {
    let hub = MemHub::new();
    let (manager, mut events) = spawn_node(&hub, "alpha");

    manager.start();
    settle().await;
    assert_eq!(hub.listener_count(), 1);

    let remote = MemTransport::new(&hub, "beta");
    let (conn, _info) = remote
        .dial(&PeerAddr::from("alpha"), &service())
        .await
        .unwrap();
    settle().await;

    // Entering the connected state retired the acceptor.
    assert_eq!(hub.listener_count(), 0);
    drain(&mut events);

    manager.write(Bytes::from_static(b"post-retire"));
    settle().await;
    let (mut remote_rx, _remote_tx) = conn.split();
    assert_eq!(
        remote_rx.recv().await.unwrap(),
        Bytes::from_static(b"post-retire")
    );
    settle().await;
    let drained = drain(&mut events);
    assert_eq!(drained, vec![LinkEvent::Sent(Bytes::from_static(b"post-retire"))]);
}

#[tokio::test]
async fn rapid_connects_only_activate_the_second_target() {
    let hub = MemHub::new();
    let (peer_a, _events_a) = spawn_node(&hub, "a");
    let (peer_b, _events_b) = spawn_node(&hub, "b");
    peer_a.start();
    peer_b.start();
    settle().await;

    let (manager, mut events) = spawn_node(&hub, "m");
    manager.connect(PeerAddr::from("a"));
    manager.connect(PeerAddr::from("b"));
    settle().await;

    assert_eq!(manager.state(), LinkState::Connected);
    assert_eq!(manager.peer().unwrap().addr, PeerAddr::from("b"));
    assert_eq!(peer_b.state(), LinkState::Connected);
    assert_eq!(peer_b.peer().unwrap().addr, PeerAddr::from("m"));

    // The superseded dial never produced a connected transition.
    let drained = drain(&mut events);
    assert!(!drained
        .iter()
        .any(|e| matches!(e, LinkEvent::PeerIdentified(info) if info.addr == PeerAddr::from("a"))));

    // Whatever the first dial managed to open is gone again.
    assert_eq!(hub.open_endpoints(), 2);
    assert_ne!(peer_a.state(), LinkState::Connected);
}

#[tokio::test]
async fn connect_while_connected_replaces_the_pump_without_fault() {
    let hub = MemHub::new();
    let (peer_c, _events_c) = spawn_node(&hub, "c");
    peer_c.start();
    let (manager, mut events) = spawn_node(&hub, "m");
    manager.start();
    settle().await;

    let remote = MemTransport::new(&hub, "beta");
    let (_conn, _info) = remote
        .dial(&PeerAddr::from("m"), &service())
        .await
        .unwrap();
    settle().await;
    assert_eq!(manager.peer().unwrap().addr, PeerAddr::from("beta"));
    drain(&mut events);

    manager.connect(PeerAddr::from("c"));
    settle().await;

    assert_eq!(manager.state(), LinkState::Connected);
    assert_eq!(manager.peer().unwrap().addr, PeerAddr::from("c"));

    // The replaced pump was cancelled, not lost: no fault is surfaced.
    let drained = drain(&mut events);
    assert!(!drained.iter().any(|e| matches!(e, LinkEvent::Fault(_))));
    assert_eq!(drained[0], LinkEvent::StateChanged(LinkState::Connecting));
    assert!(matches!(
        &drained[1],
        LinkEvent::PeerIdentified(info) if info.addr == PeerAddr::from("c")
    ));
    assert_eq!(drained[2], LinkEvent::StateChanged(LinkState::Connected));
}

#[tokio::test]
async fn second_inbound_connection_is_closed_not_activated() {
    let hub = MemHub::new();
    let (manager, _events) = spawn_node(&hub, "alpha");
    manager.start();
    settle().await;

    let first = MemTransport::new(&hub, "first");
    let second = MemTransport::new(&hub, "second");
    let (first_conn, _) = first
        .dial(&PeerAddr::from("alpha"), &service())
        .await
        .unwrap();
    let (second_conn, _) = second
        .dial(&PeerAddr::from("alpha"), &service())
        .await
        .unwrap();
    settle().await;

    assert_eq!(manager.state(), LinkState::Connected);
    assert_eq!(manager.peer().unwrap().addr, PeerAddr::from("first"));

    // The runner-up connection was closed rather than activated.
    let (mut second_rx, _second_tx) = second_conn.split();
    let err = second_rx.recv().await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);

    drop(first_conn);
}

#[tokio::test]
async fn listener_death_is_recovered_by_a_retried_start() {
    let hub = MemHub::new();
    let (manager, _events) = spawn_node(&hub, "alpha");
    manager.start();
    settle().await;
    assert_eq!(hub.listener_count(), 1);

    // The listening handle dies under the acceptor; the worker exits and
    // the link silently remains without a listener.
    assert!(hub.close_listener(&service(), &PeerAddr::from("alpha")));
    settle().await;
    assert_eq!(hub.listener_count(), 0);
    assert_eq!(manager.state(), LinkState::Listening);

    // A retried start spawns a fresh acceptor.
    manager.start();
    settle().await;
    assert_eq!(hub.listener_count(), 1);

    let remote = MemTransport::new(&hub, "beta");
    let (_conn, _info) = remote
        .dial(&PeerAddr::from("alpha"), &service())
        .await
        .unwrap();
    settle().await;
    assert_eq!(manager.state(), LinkState::Connected);
}

#[tokio::test]
async fn stop_cancels_every_worker_and_the_machine_can_cycle() {
    let hub = MemHub::new();
    let (manager, mut events) = spawn_node(&hub, "alpha");
    manager.start();
    settle().await;

    let remote = MemTransport::new(&hub, "beta");
    let (conn, _info) = remote
        .dial(&PeerAddr::from("alpha"), &service())
        .await
        .unwrap();
    settle().await;
    assert_eq!(manager.state(), LinkState::Connected);
    drain(&mut events);

    manager.stop();
    settle().await;

    assert_eq!(manager.state(), LinkState::Idle);
    assert!(manager.peer().is_none());
    assert_eq!(hub.listener_count(), 0);
    assert_eq!(drain(&mut events), vec![LinkEvent::StateChanged(LinkState::Idle)]);
    drop(conn);
    settle().await;
    assert_eq!(hub.open_endpoints(), 0);

    // The lifecycle is designed to cycle indefinitely.
    manager.start();
    settle().await;
    assert_eq!(manager.state(), LinkState::Listening);
    let (_conn, _info) = remote
        .dial(&PeerAddr::from("alpha"), &service())
        .await
        .unwrap();
    settle().await;
    assert_eq!(manager.state(), LinkState::Connected);
}

#[tokio::test]
async fn round_trip_preserves_bytes_and_order_including_empty_chunks() {
    let hub = MemHub::new();
    let (listener_node, mut listener_events) = spawn_node(&hub, "alpha");
    let (dialer_node, mut dialer_events) = spawn_node(&hub, "beta");

    listener_node.start();
    settle().await;
    dialer_node.connect(PeerAddr::from("alpha"));
    settle().await;

    assert_eq!(listener_node.state(), LinkState::Connected);
    assert_eq!(dialer_node.state(), LinkState::Connected);
    drain(&mut listener_events);
    drain(&mut dialer_events);

    let chunks: [&[u8]; 4] = [b"first", b"", b"second", b"third"];
    for chunk in chunks {
        dialer_node.write(Bytes::copy_from_slice(chunk));
    }
    settle().await;

    let received: Vec<Bytes> = drain(&mut listener_events)
        .into_iter()
        .filter_map(|e| match e {
            LinkEvent::Received(bytes) => Some(bytes),
            _ => None,
        })
        .collect();
    assert_eq!(received, chunks.map(Bytes::copy_from_slice).to_vec());

    let sent: Vec<Bytes> = drain(&mut dialer_events)
        .into_iter()
        .filter_map(|e| match e {
            LinkEvent::Sent(bytes) => Some(bytes),
            _ => None,
        })
        .collect();
    assert_eq!(sent, chunks.map(Bytes::copy_from_slice).to_vec());

    // And the other direction.
    listener_node.write(Bytes::from_static(b"reply"));
    settle().await;
    let received: Vec<Bytes> = drain(&mut dialer_events)
        .into_iter()
        .filter_map(|e| match e {
            LinkEvent::Received(bytes) => Some(bytes),
            _ => None,
        })
        .collect();
    assert_eq!(received, vec![Bytes::from_static(b"reply")]);
}
