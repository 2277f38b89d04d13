//! Peerlink Library
//!
//! Maintains exactly one logical duplex byte-stream link between the local
//! node and a single remote peer, while staying ready to accept an inbound
//! connection or initiate an outbound one. Consumers drive the
//! [`LinkManager`] and receive [`LinkEvent`] notifications on a channel.

pub mod config;
pub mod link;
pub mod transport;

pub use config::Config;
pub use link::{LinkEvent, LinkManager, LinkState, PeerAddr, PeerInfo, ServiceId};

/// Common error type for the crate
pub type Result<T> = anyhow::Result<T>;
