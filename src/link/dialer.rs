//! Dialer worker
//!
//! One worker handles exactly one outbound attempt: clear discovery mode,
//! dial, report the outcome, exit. Cancellation drops the in-flight dial,
//! which closes any partially opened handle.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::manager::LinkManager;
use super::state::{PeerAddr, ServiceId};
use crate::transport::Transport;

pub(crate) async fn run<T: Transport>(
    manager: Arc<LinkManager<T>>,
    transport: Arc<T>,
    peer: PeerAddr,
    service: ServiceId,
    generation: u64,
    mut cancel: broadcast::Receiver<()>,
) {
    debug!(generation, peer = %peer, "dialer starting");

    // An active discovery scan slows the connection attempt down.
    transport.cancel_discovery().await;

    let dialed = tokio::select! {
        _ = cancel.recv() => {
            debug!(generation, peer = %peer, "dialer cancelled");
            return;
        }
        dialed = transport.dial(&peer, &service) => dialed,
    };

    match dialed {
        Ok((conn, info)) => {
            debug!(generation, peer = %info, "outbound connection established");
            manager.dialed(conn, info, generation);
        }
        Err(e) => {
            warn!(generation, peer = %peer, error = %e, "dial failed");
            manager.dial_failed(generation);
        }
    }
}
