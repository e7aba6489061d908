//! Reliable outbox.
//!
//! Outbound envelopes are written to a durable queue first and delivered
//! later by [`Outbox::flush`]. A flush walks the queue a page at a time.
//! Each page is split by destination and every destination gets its own
//! worker, which tries a direct send and falls back to the peer's relay
//! inboxes. After all workers of a page finish, the delivered messages are
//! deleted and the next page is loaded.
//!
//! A message that could not be delivered stays queued untouched and is
//! retried by the next flush, so delivery is at-least-once and survives
//! restarts. Only one flush runs at a time per outbox.

use std::sync::Arc;

use threadpost_core::{partition_by_peer, FlushReport, PageCursor};
use threadpost_types::{Envelope, MessageId, PeerId};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::StorageError;
use crate::relay::{RelayError, RelayOutbox};
use crate::storage::{OutboxMessage, OutboxStore, PeerStore};
use crate::transport::{Transport, TransportError};

/// How a message left the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sent over a live connection.
    Direct,
    /// Handed to a relay outbox.
    Relayed,
}

/// Why a message stayed queued.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Unreachable and no relay inbox is known.
    #[error("no route to {0}")]
    NoRoute(PeerId),

    /// The relay outbox refused the hand-off.
    #[error("relay hand-off failed: {0}")]
    Relay(#[from] RelayError),

    /// Contact lookup failed.
    #[error("contact lookup failed: {0}")]
    Storage(#[from] StorageError),
}

/// Delivery handles shared by the workers of a flush.
#[derive(Clone)]
struct Courier {
    transport: Arc<dyn Transport>,
    relay: Arc<dyn RelayOutbox>,
    peers: Arc<dyn PeerStore>,
}

impl Courier {
    /// Deliver one destination's messages in queue order.
    async fn deliver_group(
        self,
        peer: PeerId,
        messages: Vec<OutboxMessage>,
    ) -> Vec<(MessageId, Result<Delivery, DeliveryError>)> {
        let mut outcomes = Vec::with_capacity(messages.len());
        for message in messages {
            let outcome = self.handle(&peer, &message.envelope).await;
            if let Err(e) = &outcome {
                warn!(peer = %peer, id = %message.id, error = %e, "message left queued");
            }
            outcomes.push((message.id, outcome));
        }
        outcomes
    }

    async fn handle(&self, peer: &PeerId, envelope: &Envelope) -> Result<Delivery, DeliveryError> {
        match self.send_direct(peer, envelope).await {
            Ok(()) => return Ok(Delivery::Direct),
            Err(e) => debug!(peer = %peer, reason = %e, "direct delivery unavailable"),
        }

        let contact = self.peers.get_contact(peer).await?;
        match contact {
            Some(contact) if !contact.inboxes.is_empty() => {
                self.relay
                    .add_for_inbox(peer, envelope, &contact.inboxes)
                    .await?;
                debug!(peer = %peer, inboxes = contact.inboxes.len(), "handed message to relay");
                Ok(Delivery::Relayed)
            }
            _ => Err(DeliveryError::NoRoute(*peer)),
        }
    }

    async fn send_direct(&self, peer: &PeerId, envelope: &Envelope) -> Result<(), TransportError> {
        if !self.transport.is_online() {
            return Err(TransportError::Offline);
        }
        if !self.transport.is_connected(peer).await? {
            return Err(TransportError::Unreachable(*peer));
        }
        self.transport.send_direct(peer, envelope).await
    }
}

/// Durable queue of outbound protocol messages.
pub struct Outbox {
    store: Arc<dyn OutboxStore>,
    courier: Courier,
    page_size: usize,
    flush_lock: Mutex<()>,
}

impl Outbox {
    /// Create an outbox over `store`, delivering through `transport` or,
    /// failing that, `relay`.
    pub fn new(
        store: Arc<dyn OutboxStore>,
        peers: Arc<dyn PeerStore>,
        transport: Arc<dyn Transport>,
        relay: Arc<dyn RelayOutbox>,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            courier: Courier {
                transport,
                relay,
                peers,
            },
            page_size,
            flush_lock: Mutex::new(()),
        }
    }

    /// Queue `envelope` for `peer`. Returns once the message is durable.
    pub async fn add(&self, peer: PeerId, envelope: Envelope) -> Result<MessageId, StorageError> {
        let message = OutboxMessage::new(peer, envelope);
        self.store.add_message(&message).await?;
        debug!(peer = %peer, id = %message.id, "queued outbound message");
        Ok(message.id)
    }

    /// Number of messages waiting for delivery.
    pub async fn pending(&self) -> Result<u64, StorageError> {
        self.store.count_messages().await
    }

    /// Deliver everything currently queued.
    ///
    /// Never fails: undeliverable messages stay queued for the next flush.
    /// A concurrent call waits for the running flush to finish.
    pub async fn flush(&self) -> FlushReport {
        let _guard = self.flush_lock.lock().await;
        let mut report = FlushReport::default();
        let mut cursor = PageCursor::new(self.page_size);

        loop {
            let page = match self
                .store
                .list_messages(cursor.after(), cursor.page_size())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    error!(error = %e, "failed to load outbox page");
                    break;
                }
            };
            if !cursor.advance(page.iter().map(|m| m.id)) {
                break;
            }
            report.pages += 1;
            report.attempted += page.len();

            let delivered = self.deliver_page(page, &mut report).await;

            for id in delivered {
                match self.store.delete_message(&id).await {
                    Ok(_) => report.deleted += 1,
                    Err(e) => error!(id = %id, error = %e, "failed to delete delivered message"),
                }
            }
        }

        report.pending = match self.store.count_messages().await {
            Ok(queued) => queued as usize,
            Err(e) => {
                error!(error = %e, "failed to count queued messages");
                report.attempted - report.deleted
            }
        };
        if report.attempted > 0 {
            info!(
                pages = report.pages,
                direct = report.direct,
                relayed = report.relayed,
                pending = report.pending,
                "outbox flushed"
            );
        }
        report
    }

    /// Run one worker per destination and wait for all of them.
    async fn deliver_page(
        &self,
        page: Vec<OutboxMessage>,
        report: &mut FlushReport,
    ) -> Vec<MessageId> {
        let mut workers = JoinSet::new();
        for (peer, group) in partition_by_peer(page, |m| m.peer) {
            workers.spawn(self.courier.clone().deliver_group(peer, group));
        }

        let mut delivered = Vec::new();
        while let Some(joined) = workers.join_next().await {
            let outcomes = match joined {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    error!(error = %e, "delivery worker failed");
                    continue;
                }
            };
            for (id, outcome) in outcomes {
                match outcome {
                    Ok(Delivery::Direct) => report.direct += 1,
                    Ok(Delivery::Relayed) => report.relayed += 1,
                    Err(_) => continue,
                }
                delivered.push(id);
            }
        }
        delivered
    }
}
