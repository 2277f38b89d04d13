//! Pump worker
//!
//! Relays bytes over the one established connection: a read loop forwards
//! every inbound chunk (empty chunks included) to the event sink, and a
//! write loop drains the outbound queue. A read failure, end-of-stream
//! included, is fatal and triggers recovery; a write failure is logged only,
//! the subsequent read failure tears the session down if the connection is
//! truly dead.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::manager::LinkManager;
use super::state::{LinkEvent, LinkState};
use crate::transport::{Connection, RecvStream, SendStream, Transport};

pub(crate) async fn run_reader<T: Transport>(
    manager: Arc<LinkManager<T>>,
    mut rx: <T::Conn as Connection>::Rx,
    generation: u64,
    mut cancel: broadcast::Receiver<()>,
) {
    debug!(generation, "pump reader starting");

    // Re-checked before every blocking read, not merely on entry.
    while manager.state() == LinkState::Connected {
        let chunk = tokio::select! {
            _ = cancel.recv() => {
                debug!(generation, "pump reader cancelled");
                return;
            }
            chunk = rx.recv() => chunk,
        };
        match chunk {
            Ok(bytes) => manager.emit(LinkEvent::Received(bytes)),
            Err(e) => {
                warn!(generation, error = %e, "read failed");
                manager.connection_lost(generation);
                return;
            }
        }
    }

    debug!(generation, "pump reader exiting");
}

pub(crate) async fn run_writer<T: Transport>(
    manager: Arc<LinkManager<T>>,
    mut tx: <T::Conn as Connection>::Tx,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    generation: u64,
    mut cancel: broadcast::Receiver<()>,
) {
    debug!(generation, "pump writer starting");

    loop {
        let bytes = tokio::select! {
            _ = cancel.recv() => {
                debug!(generation, "pump writer cancelled");
                break;
            }
            queued = outbound.recv() => match queued {
                Some(bytes) => bytes,
                None => break,
            },
        };
        match tx.send(&bytes).await {
            Ok(()) => manager.emit(LinkEvent::Sent(bytes)),
            Err(e) => warn!(generation, error = %e, "write failed"),
        }
    }

    debug!(generation, "pump writer exiting");
}
