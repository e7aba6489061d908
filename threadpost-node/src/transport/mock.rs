//! Mock transport for testing.
//!
//! Tracks which peers are connected and captures sent envelopes for
//! verification.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use threadpost_types::{Envelope, PeerId};

/// Mock transport for testing.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    online: bool,
    connected: HashSet<PeerId>,
    sent: Vec<(PeerId, Envelope)>,
    fail_next_send: Option<String>,
    fail_next_check: Option<String>,
}

impl MockTransport {
    /// Create an online transport with no connections.
    pub fn new() -> Self {
        let transport = Self::default();
        transport.set_online(true);
        transport
    }

    /// Create an offline transport.
    pub fn offline() -> Self {
        Self::default()
    }

    /// Bring the node online or take it offline.
    pub fn set_online(&self, online: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.online = online;
    }

    /// Mark a peer as connected.
    pub fn connect(&self, peer: PeerId) {
        let mut inner = self.inner.lock().unwrap();
        inner.connected.insert(peer);
    }

    /// Drop the connection to a peer.
    pub fn disconnect(&self, peer: &PeerId) {
        let mut inner = self.inner.lock().unwrap();
        inner.connected.remove(peer);
    }

    /// Get all envelopes that were sent, in order.
    pub fn sent(&self) -> Vec<(PeerId, Envelope)> {
        let inner = self.inner.lock().unwrap();
        inner.sent.clone()
    }

    /// Get the envelopes sent to one peer.
    pub fn sent_to(&self, peer: &PeerId) -> Vec<Envelope> {
        let inner = self.inner.lock().unwrap();
        inner
            .sent
            .iter()
            .filter(|(p, _)| p == peer)
            .map(|(_, env)| env.clone())
            .collect()
    }

    /// Cause the next send_direct() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_send = Some(error.to_string());
    }

    /// Cause the next is_connected() to fail with the given error.
    pub fn fail_next_check(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_check = Some(error.to_string());
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn is_online(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.online
    }

    async fn is_connected(&self, peer: &PeerId) -> Result<bool, TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(error) = inner.fail_next_check.take() {
            return Err(TransportError::CheckFailed(error));
        }

        Ok(inner.connected.contains(peer))
    }

    async fn send_direct(&self, peer: &PeerId, envelope: &Envelope) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.online {
            return Err(TransportError::Offline);
        }
        if !inner.connected.contains(peer) {
            return Err(TransportError::Unreachable(*peer));
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.sent.push((*peer, envelope.clone()));
        Ok(())
    }
}
