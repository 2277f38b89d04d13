//! In-process transport
//!
//! Channel-backed duplex pairs wired through a shared [`MemHub`] that routes
//! dials to registered listeners by node name. Supports named nodes,
//! zero-length chunks, and connection-refused dial failures, and exposes
//! listener and open-endpoint counters, which makes it the simulated
//! transport the lifecycle and invariant tests run against. Also usable as
//! a loopback transport for in-process consumers.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Connection, Listener, RecvStream, SendStream, Transport};
use crate::link::{PeerAddr, PeerInfo, ServiceId};

type Inbound = (MemConn, PeerInfo);

struct Registration {
    id: u64,
    name: Option<String>,
    inbound: mpsc::UnboundedSender<Inbound>,
}

/// Routing hub shared by every [`MemTransport`] node in a test or process.
pub struct MemHub {
    listeners: Mutex<HashMap<(ServiceId, PeerAddr), Registration>>,
    next_registration_id: AtomicU64,
    open_endpoints: Arc<AtomicUsize>,
    discovery_cancels: AtomicUsize,
}

impl MemHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            listeners: Mutex::new(HashMap::new()),
            next_registration_id: AtomicU64::new(1),
            open_endpoints: Arc::new(AtomicUsize::new(0)),
            discovery_cancels: AtomicUsize::new(0),
        })
    }

    /// Number of connection endpoints currently open across the hub. A fully
    /// established link counts two, one per side.
    pub fn open_endpoints(&self) -> usize {
        self.open_endpoints.load(Ordering::SeqCst)
    }

    /// Number of registered listeners across all services and nodes.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// How many times a dialer cleared discovery mode.
    pub fn discovery_cancels(&self) -> usize {
        self.discovery_cancels.load(Ordering::SeqCst)
    }

    /// Tear down a registered listener out-of-band, making its pending
    /// accept fail. Simulates a listening handle dying under the worker.
    pub fn close_listener(&self, service: &ServiceId, node: &PeerAddr) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        listeners.remove(&(service.clone(), node.clone())).is_some()
    }

    fn register(
        &self,
        service: ServiceId,
        node: PeerAddr,
        name: Option<String>,
    ) -> (u64, mpsc::UnboundedReceiver<Inbound>) {
        let id = self.next_registration_id.fetch_add(1, Ordering::SeqCst);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let mut listeners = self.listeners.lock().unwrap();
        let previous = listeners.insert(
            (service, node.clone()),
            Registration {
                id,
                name,
                inbound: inbound_tx,
            },
        );
        if previous.is_some() {
            // The replaced listener's accept observes a closed channel.
            debug!(node = %node, "listener registration replaced");
        }
        (id, inbound_rx)
    }

    fn unregister(&self, service: &ServiceId, node: &PeerAddr, id: u64) {
        let mut listeners = self.listeners.lock().unwrap();
        if let Some(registration) = listeners.get(&(service.clone(), node.clone())) {
            if registration.id == id {
                listeners.remove(&(service.clone(), node.clone()));
            }
        }
    }

    fn conn_pair(&self) -> (MemConn, MemConn) {
        let (near_tx, far_rx) = mpsc::unbounded_channel();
        let (far_tx, near_rx) = mpsc::unbounded_channel();
        (
            MemConn {
                rx: near_rx,
                tx: near_tx,
                ticket: EndpointTicket::new(&self.open_endpoints),
            },
            MemConn {
                rx: far_rx,
                tx: far_tx,
                ticket: EndpointTicket::new(&self.open_endpoints),
            },
        )
    }
}

/// Counts one open connection endpoint for as long as either half of it is
/// alive.
struct EndpointTicket {
    counter: Arc<AtomicUsize>,
}

impl EndpointTicket {
    fn new(counter: &Arc<AtomicUsize>) -> Arc<Self> {
        counter.fetch_add(1, Ordering::SeqCst);
        Arc::new(Self {
            counter: Arc::clone(counter),
        })
    }
}

impl Drop for EndpointTicket {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One named node on a [`MemHub`]. The node name doubles as its peer
/// address and its advertised human-readable name.
pub struct MemTransport {
    hub: Arc<MemHub>,
    node: PeerAddr,
    name: Option<String>,
}

impl MemTransport {
    pub fn new(hub: &Arc<MemHub>, node: impl Into<String>) -> Self {
        let node = node.into();
        Self {
            hub: Arc::clone(hub),
            name: Some(node.clone()),
            node: PeerAddr::new(node),
        }
    }

    pub fn node(&self) -> &PeerAddr {
        &self.node
    }
}

#[async_trait]
impl Transport for MemTransport {
    type Conn = MemConn;
    type Listener = MemListener;

    async fn listen(&self, service: &ServiceId) -> io::Result<Self::Listener> {
        let (id, inbound) =
            self.hub
                .register(service.clone(), self.node.clone(), self.name.clone());
        Ok(MemListener {
            hub: Arc::clone(&self.hub),
            service: service.clone(),
            node: self.node.clone(),
            id,
            inbound,
        })
    }

    async fn dial(
        &self,
        peer: &PeerAddr,
        service: &ServiceId,
    ) -> io::Result<(Self::Conn, PeerInfo)> {
        let key = (service.clone(), peer.clone());
        let (inbound, peer_name) = {
            let listeners = self.hub.listeners.lock().unwrap();
            match listeners.get(&key) {
                Some(registration) => (registration.inbound.clone(), registration.name.clone()),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionRefused,
                        format!("no listener for {peer}"),
                    ))
                }
            }
        };

        let (local, remote) = self.hub.conn_pair();
        let local_info = PeerInfo::new(self.node.clone(), self.name.clone());
        if inbound.send((remote, local_info)).is_err() {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("listener for {peer} is gone"),
            ));
        }
        Ok((local, PeerInfo::new(peer.clone(), peer_name)))
    }

    async fn cancel_discovery(&self) {
        self.hub.discovery_cancels.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MemListener {
    hub: Arc<MemHub>,
    service: ServiceId,
    node: PeerAddr,
    id: u64,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl Listener for MemListener {
    type Conn = MemConn;

    async fn accept(&mut self) -> io::Result<(Self::Conn, PeerInfo)> {
        self.inbound.recv().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionAborted, "listening endpoint closed")
        })
    }
}

impl Drop for MemListener {
    fn drop(&mut self) {
        self.hub.unregister(&self.service, &self.node, self.id);
    }
}

pub struct MemConn {
    rx: mpsc::UnboundedReceiver<Bytes>,
    tx: mpsc::UnboundedSender<Bytes>,
    ticket: Arc<EndpointTicket>,
}

impl std::fmt::Debug for MemConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemConn").finish_non_exhaustive()
    }
}

impl Connection for MemConn {
    type Rx = MemRecv;
    type Tx = MemSend;

    fn split(self) -> (Self::Rx, Self::Tx) {
        (
            MemRecv {
                rx: self.rx,
                _ticket: Arc::clone(&self.ticket),
            },
            MemSend {
                tx: self.tx,
                _ticket: self.ticket,
            },
        )
    }
}

pub struct MemRecv {
    rx: mpsc::UnboundedReceiver<Bytes>,
    _ticket: Arc<EndpointTicket>,
}

#[async_trait]
impl RecvStream for MemRecv {
    async fn recv(&mut self) -> io::Result<Bytes> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "stream closed"))
    }
}

pub struct MemSend {
    tx: mpsc::UnboundedSender<Bytes>,
    _ticket: Arc<EndpointTicket>,
}

#[async_trait]
impl SendStream for MemSend {
    async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.tx
            .send(Bytes::copy_from_slice(bytes))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"))
    }
}
