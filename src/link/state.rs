//! Link state and notification types

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Lifecycle state of the link. Exactly one value at any instant, owned
/// exclusively by the [`LinkManager`](crate::link::LinkManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Nothing running
    Idle,
    /// Listening for an inbound connection
    Listening,
    /// An outbound dial attempt is in flight
    Connecting,
    /// A connection to a remote peer is established
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Idle => "idle",
            LinkState::Listening => "listening",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Opaque, stable identifier sufficient to dial a specific remote node.
///
/// The transport decides how to interpret it (a socket address for TCP,
/// a node name for the in-process transport).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddr(String);

impl PeerAddr {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddr {
    fn from(addr: &str) -> Self {
        Self(addr.to_string())
    }
}

impl From<String> for PeerAddr {
    fn from(addr: String) -> Self {
        Self(addr)
    }
}

/// Well-known service identifier under which the link listens and dials.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(Uuid);

impl ServiceId {
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self(Uuid::from_u128(0xfa87c0d0_afac_11de_8a39_0800200c9a66))
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of the remote peer, captured when a connection is accepted or
/// dialed and dropped with the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub addr: PeerAddr,
    pub name: Option<String>,
}

impl PeerInfo {
    pub fn new(addr: PeerAddr, name: Option<String>) -> Self {
        Self { addr, name }
    }

    /// Human-readable label, falling back to the address when the peer has
    /// no advertised name.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.addr.as_str())
    }
}

impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Asynchronous notification delivered to the consumer.
///
/// Events produced by one worker arrive in the order produced; ordering
/// across workers is not guaranteed.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The lifecycle state changed (emitted on every set, including
    /// same-value sets)
    StateChanged(LinkState),
    /// A connection was activated and the remote identity captured
    PeerIdentified(PeerInfo),
    /// Bytes arrived from the peer; empty chunks are valid
    Received(Bytes),
    /// Bytes were successfully written to the peer
    Sent(Bytes),
    /// A recoverable failure (dial failed, connection lost)
    Fault(String),
}

/// Fire-and-forget sink for [`LinkEvent`]s. A consumer that has gone away
/// is tolerated silently.
pub type EventSink = mpsc::UnboundedSender<LinkEvent>;
