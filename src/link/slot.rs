//! Worker slot handles
//!
//! Each live worker is recorded by a handle pairing its generation tag with
//! a cancellation sender and the spawned task. Cancellation is cooperative:
//! the manager fires the broadcast and moves on without waiting; the worker
//! observes it at its next suspension point and drops its resource on the
//! way out.

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

use super::state::PeerInfo;

/// Handle to a running acceptor or dialer worker.
pub(crate) struct WorkerHandle {
    generation: u64,
    cancel: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn new(generation: u64, cancel: broadcast::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            generation,
            cancel,
            task,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Request cooperative cancellation. The send fails only when the worker
    /// has already exited, which is fine.
    pub(crate) fn cancel(&self) {
        debug!(
            generation = self.generation,
            finished = self.task.is_finished(),
            "cancelling worker"
        );
        let _ = self.cancel.send(());
    }
}

/// Handle to the running pump: one logical transport worker realized as a
/// read task and a write task sharing one cancel domain.
pub(crate) struct PumpHandle {
    generation: u64,
    cancel: broadcast::Sender<()>,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
    outbound: mpsc::UnboundedSender<Bytes>,
    peer: PeerInfo,
}

impl PumpHandle {
    pub(crate) fn new(
        generation: u64,
        cancel: broadcast::Sender<()>,
        read_task: JoinHandle<()>,
        write_task: JoinHandle<()>,
        outbound: mpsc::UnboundedSender<Bytes>,
        peer: PeerInfo,
    ) -> Self {
        Self {
            generation,
            cancel,
            read_task,
            write_task,
            outbound,
            peer,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn outbound(&self) -> &mpsc::UnboundedSender<Bytes> {
        &self.outbound
    }

    pub(crate) fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    pub(crate) fn cancel(&self) {
        debug!(
            generation = self.generation,
            read_finished = self.read_task.is_finished(),
            write_finished = self.write_task.is_finished(),
            "cancelling pump"
        );
        let _ = self.cancel.send(());
    }
}
