//! Storage layer for threadpost-node.
//!
//! Durable state the node reads and writes: the outbox queue, thread
//! membership and contacts, and offline-delivery pointers.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::StorageError;
use async_trait::async_trait;
use std::time::{SystemTime, UNIX_EPOCH};
use threadpost_types::{Envelope, MessageId, PeerId, ThreadId};

pub(crate) fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A queued outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxMessage {
    /// Time-ordered queue key.
    pub id: MessageId,
    /// Destination peer.
    pub peer: PeerId,
    /// Signed envelope to deliver.
    pub envelope: Envelope,
    /// Unix timestamp when the message was queued.
    pub enqueued_at: i64,
}

impl OutboxMessage {
    /// Queue `envelope` for `peer` with a fresh id.
    pub fn new(peer: PeerId, envelope: Envelope) -> Self {
        Self {
            id: MessageId::new(),
            peer,
            envelope,
            enqueued_at: current_timestamp(),
        }
    }
}

/// Membership of a peer in a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Unique row id.
    pub row: String,
    /// The member.
    pub peer_id: PeerId,
    /// Thread the peer belongs to.
    pub thread_id: ThreadId,
    /// The member's public key.
    pub public_key: Vec<u8>,
}

impl Peer {
    /// Record `public_key`'s owner as a member of `thread_id`.
    pub fn new(thread_id: ThreadId, public_key: Vec<u8>) -> Self {
        Self {
            row: uuid::Uuid::new_v4().to_string(),
            peer_id: PeerId::from_public_key(&public_key),
            thread_id,
            public_key,
        }
    }
}

/// Routing data for a peer, used for relay fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    /// The peer.
    pub peer_id: PeerId,
    /// Relay inbox addresses that accept messages for this peer.
    pub inboxes: Vec<String>,
}

/// A marker that a message for `peer_id` sits at a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pointer {
    /// Peer the pointer is keyed by.
    pub peer_id: PeerId,
    /// Relay address holding the message.
    pub address: String,
    /// The only peer allowed to retract the pointer.
    pub cancel_id: Option<PeerId>,
    /// Unix timestamp when the pointer was recorded.
    pub created_at: i64,
}

/// Durable outbox queue.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Persist a new message.
    async fn add_message(&self, message: &OutboxMessage) -> Result<(), StorageError>;

    /// Get up to `limit` messages with id greater than `after`, ordered by id.
    ///
    /// `None` starts from the smallest id. Rows that no longer decode are
    /// moved out of the queue rather than returned, so they never stall it.
    async fn list_messages(
        &self,
        after: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, StorageError>;

    /// Delete a message. Returns whether it existed.
    async fn delete_message(&self, id: &MessageId) -> Result<bool, StorageError>;

    /// Number of queued messages.
    async fn count_messages(&self) -> Result<u64, StorageError>;
}

/// Thread membership and contact routing.
#[async_trait]
pub trait PeerStore: Send + Sync {
    /// Record a thread member.
    async fn add_peer(&self, peer: &Peer) -> Result<(), StorageError>;

    /// Get the members of a thread.
    async fn thread_peers(&self, thread_id: &ThreadId) -> Result<Vec<Peer>, StorageError>;

    /// Get routing data for a peer, if any is known.
    async fn get_contact(&self, peer_id: &PeerId) -> Result<Option<Contact>, StorageError>;

    /// Replace the relay inboxes known for a peer.
    async fn set_inboxes(&self, peer_id: &PeerId, inboxes: &[String]) -> Result<(), StorageError>;
}

/// Offline-delivery pointers.
#[async_trait]
pub trait PointerStore: Send + Sync {
    /// Record (or replace) the pointer for a peer.
    async fn add_pointer(&self, pointer: &Pointer) -> Result<(), StorageError>;

    /// Get the pointer keyed by a peer.
    async fn get_pointer(&self, peer_id: &PeerId) -> Result<Option<Pointer>, StorageError>;

    /// Delete the pointer keyed by a peer. Returns whether it existed.
    async fn delete_pointer(&self, peer_id: &PeerId) -> Result<bool, StorageError>;
}
