//! Node wiring.
//!
//! Opens the node database and connects the dispatcher and outbox to it and
//! to the injected collaborators.

use std::sync::Arc;

use threadpost_types::{Envelope, Keypair, Message, MessageId, PeerId};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::blocks::BlockStore;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::outbox::Outbox;
use crate::processor::Processor;
use crate::relay::RelayOutbox;
use crate::scheduler;
use crate::storage::SqliteStore;
use crate::threads::ThreadRegistry;
use crate::transport::Transport;

/// Services the node uses but does not own.
#[derive(Clone)]
pub struct Collaborators {
    /// Direct peer connections.
    pub transport: Arc<dyn Transport>,
    /// Relay hand-off for unreachable peers.
    pub relay: Arc<dyn RelayOutbox>,
    /// Thread state.
    pub threads: Arc<dyn ThreadRegistry>,
    /// Local block storage.
    pub blocks: Arc<dyn BlockStore>,
}

/// A running threadpost peer.
pub struct Node {
    identity: Arc<Keypair>,
    config: Config,
    store: Arc<SqliteStore>,
    dispatcher: Dispatcher,
    outbox: Arc<Outbox>,
    trigger: Arc<Notify>,
}

impl Node {
    /// Open the node's database and wire its services.
    pub async fn open(config: Config, identity: Keypair, collaborators: Collaborators) -> Result<Self> {
        let store = if config.storage.is_in_memory() {
            SqliteStore::in_memory().await?
        } else {
            SqliteStore::new(&config.storage.database).await?
        };
        let store = Arc::new(store);
        let identity = Arc::new(identity);

        let processor = Processor::new(
            Arc::clone(&identity),
            collaborators.threads,
            store.clone(),
        );
        let dispatcher = Dispatcher::new(
            Arc::clone(&identity),
            processor,
            collaborators.blocks,
            store.clone(),
        );
        let outbox = Arc::new(Outbox::new(
            store.clone(),
            store.clone(),
            collaborators.transport,
            collaborators.relay,
            config.outbox.page_size,
        ));

        tracing::info!(peer = %identity.peer_id(), "node opened");
        Ok(Self {
            identity,
            config,
            store,
            dispatcher,
            outbox,
            trigger: Arc::new(Notify::new()),
        })
    }

    /// This node's peer id.
    pub fn peer_id(&self) -> PeerId {
        self.identity.peer_id()
    }

    /// This node's identity key.
    pub fn identity(&self) -> &Keypair {
        &self.identity
    }

    /// The inbound message dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The outbound message queue.
    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    /// The node database (peers, contacts, pointers, queue).
    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    /// Sign `message` with this node's identity and queue it for `peer`.
    pub async fn send(&self, peer: PeerId, message: Message) -> Result<MessageId> {
        let envelope = Envelope::seal(&self.identity, message)?;
        Ok(self.outbox.add(peer, envelope).await?)
    }

    /// Handle raw inbound envelope bytes, returning the reply to send back.
    pub async fn receive(&self, raw: &[u8]) -> Result<Option<Message>> {
        Ok(self.dispatcher.handle_envelope(raw).await?)
    }

    /// Start the background flush task.
    pub fn spawn_flush_task(&self) -> JoinHandle<()> {
        scheduler::spawn_flush_task(
            Arc::clone(&self.outbox),
            self.config.outbox.clone(),
            Arc::clone(&self.trigger),
        )
    }

    /// Wake the flush task, e.g. after coming online or a peer connecting.
    pub fn connectivity_changed(&self) {
        self.trigger.notify_one();
    }
}
