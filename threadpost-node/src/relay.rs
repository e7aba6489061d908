//! Relay ("cafe") hand-off for offline peers.
//!
//! When a peer cannot be reached directly, its envelopes are handed to a
//! relay outbox addressed to the inboxes the peer registered. The relay
//! stores them until the peer comes back and collects them as
//! `OFFLINE_RELAY` messages.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use threadpost_types::{Envelope, PeerId};

/// Relay hand-off errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The relay outbox refused the envelope.
    #[error("relay rejected envelope: {0}")]
    Rejected(String),

    /// No inbox address was given.
    #[error("no inboxes for {0}")]
    NoInboxes(PeerId),
}

/// Outbound queue toward relay inboxes.
#[async_trait]
pub trait RelayOutbox: Send + Sync {
    /// Queue `envelope` for `peer` at each of `inboxes`.
    async fn add_for_inbox(
        &self,
        peer: &PeerId,
        envelope: &Envelope,
        inboxes: &[String],
    ) -> Result<(), RelayError>;
}

/// One recorded hand-off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    /// Destination peer.
    pub peer: PeerId,
    /// Envelope handed over.
    pub envelope: Envelope,
    /// Inboxes it was addressed to.
    pub inboxes: Vec<String>,
}

/// Mock relay outbox for testing.
///
/// Records hand-offs and can be told to reject them or to take a while.
#[derive(Debug, Default)]
pub struct MockRelayOutbox {
    inner: Arc<Mutex<MockRelayInner>>,
}

#[derive(Debug, Default)]
struct MockRelayInner {
    handoffs: Vec<Handoff>,
    reject: Option<String>,
    delay: Option<Duration>,
}

impl MockRelayOutbox {
    /// Create an accepting relay outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded hand-offs.
    pub fn handoffs(&self) -> Vec<Handoff> {
        let inner = self.inner.lock().unwrap();
        inner.handoffs.clone()
    }

    /// Get the hand-offs for one peer.
    pub fn handoffs_for(&self, peer: &PeerId) -> Vec<Handoff> {
        let inner = self.inner.lock().unwrap();
        inner
            .handoffs
            .iter()
            .filter(|h| h.peer == *peer)
            .cloned()
            .collect()
    }

    /// Reject every hand-off with `reason` until cleared with `None`.
    pub fn reject(&self, reason: Option<&str>) {
        let mut inner = self.inner.lock().unwrap();
        inner.reject = reason.map(str::to_string);
    }

    /// Delay every hand-off.
    pub fn set_delay(&self, delay: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.delay = Some(delay);
    }
}

impl Clone for MockRelayOutbox {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl RelayOutbox for MockRelayOutbox {
    async fn add_for_inbox(
        &self,
        peer: &PeerId,
        envelope: &Envelope,
        inboxes: &[String],
    ) -> Result<(), RelayError> {
        if inboxes.is_empty() {
            return Err(RelayError::NoInboxes(*peer));
        }

        let delay = self.inner.lock().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().unwrap();
        if let Some(reason) = &inner.reject {
            return Err(RelayError::Rejected(reason.clone()));
        }
        inner.handoffs.push(Handoff {
            peer: *peer,
            envelope: envelope.clone(),
            inboxes: inboxes.to_vec(),
        });
        Ok(())
    }
}
