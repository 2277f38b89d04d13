//! Link manager
//!
//! Sole owner and mutator of the link lifecycle state and the three worker
//! slots. Every public operation and every worker report serializes through
//! one mutex; no await point is reached while it is held. Workers are tagged
//! with a generation number at spawn and must present it when reporting, so
//! a report from a superseded worker is discarded instead of clobbering a
//! newer transition.

use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use super::slot::{PumpHandle, WorkerHandle};
use super::state::{EventSink, LinkEvent, LinkState, PeerAddr, PeerInfo, ServiceId};
use super::{acceptor, dialer, pump};
use crate::transport::{Connection, Transport};

/// Manages the single duplex link to a remote peer.
///
/// Construct with [`LinkManager::new`], then drive with [`start`], [`connect`],
/// [`write`] and [`stop`]. Notifications arrive on the [`EventSink`] supplied
/// at construction.
///
/// [`start`]: LinkManager::start
/// [`connect`]: LinkManager::connect
/// [`write`]: LinkManager::write
/// [`stop`]: LinkManager::stop
pub struct LinkManager<T: Transport> {
    transport: Arc<T>,
    service: ServiceId,
    events: EventSink,
    self_ref: Weak<Self>,
    inner: Mutex<Inner>,
}

/// Mutable state behind the single mutual-exclusion domain: the lifecycle
/// state, one slot per worker role, and the generation counter.
struct Inner {
    state: LinkState,
    acceptor: Option<WorkerHandle>,
    dialer: Option<WorkerHandle>,
    pump: Option<PumpHandle>,
    next_generation: u64,
}

impl Inner {
    fn alloc_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn acceptor_matches(&self, generation: u64) -> bool {
        self.acceptor.as_ref().map(WorkerHandle::generation) == Some(generation)
    }

    fn dialer_matches(&self, generation: u64) -> bool {
        self.dialer.as_ref().map(WorkerHandle::generation) == Some(generation)
    }

    fn pump_matches(&self, generation: u64) -> bool {
        self.pump.as_ref().map(PumpHandle::generation) == Some(generation)
    }
}

impl<T: Transport> LinkManager<T> {
    /// Create a new manager in the idle state. Nothing runs until
    /// [`start`](LinkManager::start) or [`connect`](LinkManager::connect)
    /// is called.
    pub fn new(transport: Arc<T>, service: ServiceId, events: EventSink) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            transport,
            service,
            events,
            self_ref: self_ref.clone(),
            inner: Mutex::new(Inner {
                state: LinkState::Idle,
                acceptor: None,
                dialer: None,
                pump: None,
                next_generation: 0,
            }),
        })
    }

    /// Current lifecycle state snapshot.
    pub fn state(&self) -> LinkState {
        self.inner.lock().unwrap().state
    }

    /// Identity of the connected peer, if any.
    pub fn peer(&self) -> Option<PeerInfo> {
        let inner = self.inner.lock().unwrap();
        inner.pump.as_ref().map(|pump| pump.peer().clone())
    }

    /// Begin (or resume) listening for an inbound connection.
    ///
    /// Cancels any live dialer and pump, then spawns an acceptor unless one
    /// is already running. Idempotent while listening.
    pub fn start(&self) {
        let mut inner = self.inner.lock().unwrap();
        debug!("start");
        if let Some(dialer) = inner.dialer.take() {
            dialer.cancel();
        }
        if let Some(pump) = inner.pump.take() {
            pump.cancel();
        }
        self.resume_listening(&mut inner);
    }

    /// Initiate one outbound connection attempt to `peer`.
    ///
    /// A previous attempt still in flight is superseded: its dialer is
    /// cancelled and its eventual report discarded.
    pub fn connect(&self, peer: PeerAddr) {
        let mut inner = self.inner.lock().unwrap();
        debug!(peer = %peer, "connect");

        // The dialer slot is only ever occupied while connecting, so this
        // branch cancels the previous dial attempt.
        if inner.state == LinkState::Connecting {
            if let Some(dialer) = inner.dialer.take() {
                dialer.cancel();
            }
        }
        if let Some(pump) = inner.pump.take() {
            pump.cancel();
        }

        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };
        let generation = inner.alloc_generation();
        let (cancel_tx, cancel_rx) = broadcast::channel(1);
        let task = tokio::spawn(dialer::run(
            manager,
            Arc::clone(&self.transport),
            peer,
            self.service.clone(),
            generation,
            cancel_rx,
        ));
        inner.dialer = Some(WorkerHandle::new(generation, cancel_tx, task));
        self.set_state(&mut inner, LinkState::Connecting);
    }

    /// Queue `bytes` for transmission to the connected peer.
    ///
    /// A no-op unless the link is connected. Never blocks beyond handing the
    /// chunk to the pump's outbound queue.
    pub fn write(&self, bytes: Bytes) {
        let outbound = {
            let inner = self.inner.lock().unwrap();
            if inner.state != LinkState::Connected {
                debug!(state = %inner.state, "write ignored, link not connected");
                return;
            }
            match inner.pump.as_ref() {
                Some(pump) => pump.outbound().clone(),
                None => return,
            }
        };
        if outbound.send(bytes).is_err() {
            debug!("write dropped, pump already gone");
        }
    }

    /// Cancel every worker and return to the idle state.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        debug!("stop");
        if let Some(dialer) = inner.dialer.take() {
            dialer.cancel();
        }
        if let Some(pump) = inner.pump.take() {
            pump.cancel();
        }
        if let Some(acceptor) = inner.acceptor.take() {
            acceptor.cancel();
        }
        self.set_state(&mut inner, LinkState::Idle);
    }

    /// Worker path: the acceptor handed over an inbound connection.
    ///
    /// The single path by which a connection becomes active, shared with
    /// [`dialed`](LinkManager::dialed). A connection reported by a superseded
    /// acceptor, or arriving while the link is idle or already connected, is
    /// dropped (closing it) instead of activated.
    pub fn accepted(&self, conn: T::Conn, peer: PeerInfo, generation: u64) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.acceptor_matches(generation) {
            debug!(generation, "dropping connection from superseded acceptor");
            return;
        }
        match inner.state {
            LinkState::Listening | LinkState::Connecting => {}
            state => {
                debug!(%state, "dropping inbound connection, link not accepting");
                return;
            }
        }
        self.activate(&mut inner, conn, peer);
    }

    /// Worker path: the dialer established an outbound connection.
    pub fn dialed(&self, conn: T::Conn, peer: PeerInfo, generation: u64) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.dialer_matches(generation) {
            debug!(generation, "dropping connection from superseded dialer");
            return;
        }
        self.activate(&mut inner, conn, peer);
    }

    /// Worker path: the dial attempt failed. Surfaces a transient fault and
    /// returns to listening.
    pub fn dial_failed(&self, generation: u64) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.dialer_matches(generation) {
            debug!(generation, "ignoring dial failure from superseded dialer");
            return;
        }
        inner.dialer = None;
        self.emit(LinkEvent::Fault("unable to connect".to_string()));
        self.resume_listening(&mut inner);
    }

    /// Worker path: the established connection's read failed. Surfaces a
    /// transient fault and returns to listening.
    pub fn connection_lost(&self, generation: u64) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.pump_matches(generation) {
            debug!(generation, "ignoring lost connection from superseded pump");
            return;
        }
        // The reader is already exiting; the cancel reaches the write task.
        if let Some(pump) = inner.pump.take() {
            pump.cancel();
        }
        self.emit(LinkEvent::Fault("connection lost".to_string()));
        self.resume_listening(&mut inner);
    }

    /// Worker path: the acceptor terminated. Clears its slot so a later
    /// `start` can spawn a fresh one; reports from superseded or already
    /// retired acceptors are no-ops.
    pub(crate) fn listener_exited(&self, generation: u64) {
        let mut inner = self.inner.lock().unwrap();
        if inner.acceptor_matches(generation) {
            debug!(generation, "acceptor slot cleared");
            inner.acceptor = None;
        }
    }

    pub(crate) fn emit(&self, event: LinkEvent) {
        let _ = self.events.send(event);
    }

    /// Enter the listening state, spawning an acceptor unless one is live.
    fn resume_listening(&self, inner: &mut Inner) {
        self.set_state(inner, LinkState::Listening);
        if inner.acceptor.is_some() {
            return;
        }
        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };
        let generation = inner.alloc_generation();
        let (cancel_tx, cancel_rx) = broadcast::channel(1);
        let task = tokio::spawn(acceptor::run(
            manager,
            Arc::clone(&self.transport),
            self.service.clone(),
            generation,
            cancel_rx,
        ));
        inner.acceptor = Some(WorkerHandle::new(generation, cancel_tx, task));
    }

    /// Activate `conn` as the one live connection: retire every worker still
    /// running, spawn the pump, and announce the peer.
    fn activate(&self, inner: &mut Inner, conn: T::Conn, peer: PeerInfo) {
        if let Some(dialer) = inner.dialer.take() {
            dialer.cancel();
        }
        if let Some(acceptor) = inner.acceptor.take() {
            acceptor.cancel();
        }
        if let Some(pump) = inner.pump.take() {
            pump.cancel();
        }

        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };
        let generation = inner.alloc_generation();
        let (cancel_tx, _) = broadcast::channel(1);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (rx_half, tx_half) = conn.split();

        let read_task = tokio::spawn(pump::run_reader(
            Arc::clone(&manager),
            rx_half,
            generation,
            cancel_tx.subscribe(),
        ));
        let write_task = tokio::spawn(pump::run_writer(
            manager,
            tx_half,
            outbound_rx,
            generation,
            cancel_tx.subscribe(),
        ));

        inner.pump = Some(PumpHandle::new(
            generation,
            cancel_tx,
            read_task,
            write_task,
            outbound_tx,
            peer.clone(),
        ));
        self.emit(LinkEvent::PeerIdentified(peer));
        self.set_state(inner, LinkState::Connected);
    }

    fn set_state(&self, inner: &mut Inner, state: LinkState) {
        debug!(from = %inner.state, to = %state, "state change");
        inner.state = state;
        self.emit(LinkEvent::StateChanged(state));
    }
}
