//! Transport abstraction for threadpost.
//!
//! The outbox only needs three things from the network layer: whether the
//! node is online at all, whether a live connection to a given peer exists,
//! and a way to push an envelope over it. Any failure here is soft: it picks
//! the relay path instead of failing the message.

mod mock;

pub use mock::MockTransport;

use async_trait::async_trait;
use thiserror::Error;
use threadpost_types::{Envelope, PeerId};

/// Reasons the direct path was not taken.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The node itself is offline.
    #[error("node is offline")]
    Offline,

    /// No live connection to the peer.
    #[error("peer unreachable: {0}")]
    Unreachable(PeerId),

    /// The connection check itself failed.
    #[error("connection check failed: {0}")]
    CheckFailed(String),

    /// The send was attempted and failed.
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Direct peer-to-peer delivery.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the node's network service is up.
    fn is_online(&self) -> bool;

    /// Check for a live connection to `peer`.
    async fn is_connected(&self, peer: &PeerId) -> Result<bool, TransportError>;

    /// Send an envelope directly to `peer`.
    async fn send_direct(&self, peer: &PeerId, envelope: &Envelope) -> Result<(), TransportError>;
}
