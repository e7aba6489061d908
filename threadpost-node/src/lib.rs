//! # threadpost-node
//!
//! The running side of a threadpost peer.
//!
//! Inbound wire bytes go through the [`Dispatcher`], which authenticates the
//! envelope, routes the message to its handler and applies thread blocks via
//! the [`Processor`]. Outbound messages go through the [`Outbox`], a durable
//! queue flushed over direct connections when a peer is reachable and through
//! relay inboxes when it is not.
//!
//! Everything the node does not own (transport, relay inboxes, thread state,
//! block storage) is injected as a trait object, so the [`Node`] can be wired
//! against real services or the in-process implementations used in tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blocks;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod node;
pub mod outbox;
pub mod processor;
pub mod relay;
pub mod scheduler;
pub mod storage;
pub mod threads;
pub mod transport;

pub use blocks::{BlockStore, MemoryBlockStore};
pub use config::{Config, ConfigError, OutboxConfig, StorageConfig};
pub use dispatcher::{handler_for, DispatchResult, Dispatcher, Handler, Inbound};
pub use error::{NodeError, ProtocolError, Result, StorageError};
pub use node::{Collaborators, Node};
pub use outbox::{Delivery, DeliveryError, Outbox};
pub use processor::Processor;
pub use relay::{Handoff, MockRelayOutbox, RelayError, RelayOutbox};
pub use scheduler::spawn_flush_task;
pub use storage::{
    Contact, OutboxMessage, OutboxStore, Peer, PeerStore, Pointer, PointerStore, SqliteStore,
};
pub use threads::{MemoryThreads, Thread, ThreadError, ThreadRegistry};
pub use transport::{MockTransport, Transport, TransportError};
