//! Acceptor worker
//!
//! Binds the listening endpoint and loops on accept, handing each inbound
//! connection to the manager until cancelled, until the link is connected,
//! or until the accept call fails. An accept failure is fatal for this
//! worker instance; the manager spawns a fresh one on the next `start`.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::manager::LinkManager;
use super::state::{LinkState, ServiceId};
use crate::transport::{Listener, Transport};

pub(crate) async fn run<T: Transport>(
    manager: Arc<LinkManager<T>>,
    transport: Arc<T>,
    service: ServiceId,
    generation: u64,
    mut cancel: broadcast::Receiver<()>,
) {
    debug!(generation, %service, "acceptor starting");

    let mut listener = match transport.listen(&service).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(generation, error = %e, "listen failed");
            manager.listener_exited(generation);
            return;
        }
    };

    // A listener is unneeded while connected.
    while manager.state() != LinkState::Connected {
        let accepted = tokio::select! {
            _ = cancel.recv() => {
                debug!(generation, "acceptor cancelled");
                break;
            }
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((conn, peer)) => {
                debug!(generation, peer = %peer, "inbound connection accepted");
                manager.accepted(conn, peer, generation);
            }
            Err(e) => {
                warn!(generation, error = %e, "accept failed");
                break;
            }
        }
    }

    // Dropping the listener releases the binding.
    manager.listener_exited(generation);
    debug!(generation, "acceptor exiting");
}
