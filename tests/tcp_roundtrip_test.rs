//! End-to-end round trip between two link managers over real TCP loopback

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration, Instant};

use peerlink::link::{LinkEvent, LinkManager, LinkState, PeerAddr, ServiceId};
use peerlink::transport::TcpTransport;

fn spawn_node() -> (
    Arc<LinkManager<TcpTransport>>,
    Arc<TcpTransport>,
    mpsc::UnboundedReceiver<LinkEvent>,
) {
    let transport = Arc::new(TcpTransport::new("127.0.0.1:0".parse().unwrap()));
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let manager = LinkManager::new(Arc::clone(&transport), ServiceId::default(), event_tx);
    (manager, transport, event_rx)
}

async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        sleep(Duration::from_millis(10)).await;
    }
}

/// Collect `Received` payloads until `expected` bytes arrived, concatenated.
/// TCP is free to merge or split chunks.
async fn recv_exactly(events: &mut mpsc::UnboundedReceiver<LinkEvent>, expected: usize) -> Bytes {
    let mut collected = BytesMut::new();
    while collected.len() < expected {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for received bytes")
            .expect("event channel closed");
        if let LinkEvent::Received(bytes) = event {
            collected.extend_from_slice(&bytes);
        }
    }
    collected.freeze()
}

#[tokio::test]
async fn tcp_round_trip_delivers_bytes_in_order() {
    let (listener_node, listener_transport, mut listener_events) = spawn_node();
    let (dialer_node, _dialer_transport, mut dialer_events) = spawn_node();

    listener_node.start();
    wait_until(|| listener_transport.bound_addr().is_some(), "listener bind").await;
    let addr = listener_transport.bound_addr().unwrap();

    dialer_node.connect(PeerAddr::new(addr.to_string()));
    wait_until(
        || {
            listener_node.state() == LinkState::Connected
                && dialer_node.state() == LinkState::Connected
        },
        "both sides connected",
    )
    .await;

    let peer = dialer_node.peer().unwrap();
    assert_eq!(peer.addr, PeerAddr::new(addr.to_string()));

    dialer_node.write(Bytes::from_static(b"hello over tcp"));
    dialer_node.write(Bytes::from_static(b", more"));
    let received = recv_exactly(&mut listener_events, b"hello over tcp, more".len()).await;
    assert_eq!(received, Bytes::from_static(b"hello over tcp, more"));

    listener_node.write(Bytes::from_static(b"right back"));
    let received = recv_exactly(&mut dialer_events, b"right back".len()).await;
    assert_eq!(received, Bytes::from_static(b"right back"));

    listener_node.stop();
    dialer_node.stop();
}

#[tokio::test]
async fn tcp_peer_shutdown_recovers_to_listening() {
    let (listener_node, listener_transport, _listener_events) = spawn_node();
    let (dialer_node, _dialer_transport, mut dialer_events) = spawn_node();

    listener_node.start();
    wait_until(|| listener_transport.bound_addr().is_some(), "listener bind").await;
    let addr = listener_transport.bound_addr().unwrap();

    dialer_node.connect(PeerAddr::new(addr.to_string()));
    wait_until(
        || dialer_node.state() == LinkState::Connected,
        "dialer connected",
    )
    .await;

    // The remote side goes away entirely; the dialer's pump read fails and
    // the link returns to listening.
    listener_node.stop();
    wait_until(
        || dialer_node.state() == LinkState::Listening,
        "dialer back to listening",
    )
    .await;

    let mut saw_fault = false;
    while let Ok(event) = dialer_events.try_recv() {
        if matches!(&event, LinkEvent::Fault(message) if message == "connection lost") {
            saw_fault = true;
        }
    }
    assert!(saw_fault, "expected a connection-lost fault");

    dialer_node.stop();
}
