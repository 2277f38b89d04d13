//! Transport seam
//!
//! The narrow contract the link core needs from a connection-oriented
//! transport: bind-and-accept on a well-known service identifier, dial a
//! peer address, and duplex byte streams with blocking-style read and
//! write. Any transport satisfying these traits plugs in; the crate ships
//! [`TcpTransport`] and the in-process [`MemTransport`].

use std::io;

use async_trait::async_trait;
use bytes::Bytes;

use crate::link::{PeerAddr, PeerInfo, ServiceId};

pub mod mem;
pub mod tcp;

pub use mem::{MemHub, MemTransport};
pub use tcp::TcpTransport;

/// Provider of listening endpoints and outbound connections.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Conn: Connection;
    type Listener: Listener<Conn = Self::Conn>;

    /// Bind a listening endpoint under `service`.
    async fn listen(&self, service: &ServiceId) -> io::Result<Self::Listener>;

    /// Establish one outbound connection to `peer`.
    async fn dial(&self, peer: &PeerAddr, service: &ServiceId)
        -> io::Result<(Self::Conn, PeerInfo)>;

    /// Leave any in-progress discovery or advertisement mode. Invoked before
    /// dialing; a no-op for transports without one.
    async fn cancel_discovery(&self);
}

/// A bound endpoint producing inbound connections.
#[async_trait]
pub trait Listener: Send + 'static {
    type Conn: Connection;

    async fn accept(&mut self) -> io::Result<(Self::Conn, PeerInfo)>;
}

/// A duplex ordered byte stream, split into its two halves for independent
/// reading and writing. Dropping both halves closes the connection.
pub trait Connection: Send + 'static {
    type Rx: RecvStream;
    type Tx: SendStream;

    fn split(self) -> (Self::Rx, Self::Tx);
}

/// Receiving half of a connection.
#[async_trait]
pub trait RecvStream: Send + 'static {
    /// Next inbound chunk. `Ok` chunks may be empty; end-of-stream surfaces
    /// as an error.
    async fn recv(&mut self) -> io::Result<Bytes>;
}

/// Sending half of a connection.
#[async_trait]
pub trait SendStream: Send + 'static {
    /// Write all of `bytes` to the peer.
    async fn send(&mut self, bytes: &[u8]) -> io::Result<()>;
}
