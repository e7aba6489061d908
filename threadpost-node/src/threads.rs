//! Thread registry.
//!
//! A thread is created exactly once, when its invite is admitted, and is
//! keyed by the id derived from its verification key. The registry also
//! records each thread's applied blocks in arrival order.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use threadpost_types::{verify, Cid, Keypair, ThreadId, WireError};

/// Thread registry errors.
#[derive(Debug, Error)]
pub enum ThreadError {
    /// A thread with this id is already tracked.
    #[error("thread already exists: {0}")]
    AlreadyExists(ThreadId),

    /// No thread with this id is tracked.
    #[error("thread not found: {0}")]
    NotFound(ThreadId),

    /// The block is already part of the thread.
    #[error("block {block} already applied to thread {thread}")]
    DuplicateBlock {
        /// Thread the block was applied to.
        thread: ThreadId,
        /// The repeated block.
        block: Cid,
    },
}

/// A locally tracked thread.
#[derive(Debug)]
pub struct Thread {
    /// Derived from the thread key.
    pub id: ThreadId,
    /// Display name.
    pub name: String,
    key: Keypair,
}

impl Thread {
    /// Create a thread record for `key`.
    pub fn new(name: impl Into<String>, key: Keypair) -> Self {
        Self {
            id: ThreadId::from_public_key(&key.public_key()),
            name: name.into(),
            key,
        }
    }

    /// Public key that verifies the thread's blocks.
    pub fn verification_key(&self) -> [u8; 32] {
        self.key.public_key()
    }

    /// The thread's signing key, for issuing blocks.
    pub fn key(&self) -> &Keypair {
        &self.key
    }

    /// Verify a block signature against the thread key.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), WireError> {
        verify(&self.verification_key(), data, signature)
    }
}

/// Thread state the dispatcher applies blocks to.
#[async_trait]
pub trait ThreadRegistry: Send + Sync {
    /// Find a tracked thread.
    async fn lookup(&self, id: &ThreadId) -> Option<Arc<Thread>>;

    /// Start tracking a thread.
    ///
    /// Check-and-insert is atomic: of two racing calls for the same key,
    /// exactly one succeeds and the other gets [`ThreadError::AlreadyExists`].
    async fn create(&self, name: &str, key: Keypair) -> Result<Arc<Thread>, ThreadError>;

    /// Stop tracking a thread and drop its chain.
    async fn remove(&self, id: &ThreadId) -> Result<(), ThreadError>;

    /// Append a block to a thread's chain.
    async fn handle_block(&self, id: &ThreadId, block: Cid) -> Result<(), ThreadError>;
}

struct ThreadEntry {
    thread: Arc<Thread>,
    chain: Vec<Cid>,
}

/// In-memory thread registry.
#[derive(Default)]
pub struct MemoryThreads {
    threads: DashMap<ThreadId, ThreadEntry>,
}

impl MemoryThreads {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked threads.
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Whether no threads are tracked.
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Blocks applied to a thread, oldest first.
    pub fn chain(&self, id: &ThreadId) -> Vec<Cid> {
        self.threads
            .get(id)
            .map(|entry| entry.chain.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ThreadRegistry for MemoryThreads {
    async fn lookup(&self, id: &ThreadId) -> Option<Arc<Thread>> {
        self.threads.get(id).map(|entry| Arc::clone(&entry.thread))
    }

    async fn create(&self, name: &str, key: Keypair) -> Result<Arc<Thread>, ThreadError> {
        let thread = Arc::new(Thread::new(name, key));
        match self.threads.entry(thread.id) {
            Entry::Occupied(_) => Err(ThreadError::AlreadyExists(thread.id)),
            Entry::Vacant(slot) => {
                slot.insert(ThreadEntry {
                    thread: Arc::clone(&thread),
                    chain: Vec::new(),
                });
                tracing::debug!(thread = %thread.id, name, "thread created");
                Ok(thread)
            }
        }
    }

    async fn remove(&self, id: &ThreadId) -> Result<(), ThreadError> {
        self.threads
            .remove(id)
            .map(|_| ())
            .ok_or(ThreadError::NotFound(*id))
    }

    async fn handle_block(&self, id: &ThreadId, block: Cid) -> Result<(), ThreadError> {
        let mut entry = self.threads.get_mut(id).ok_or(ThreadError::NotFound(*id))?;
        if entry.chain.contains(&block) {
            return Err(ThreadError::DuplicateBlock { thread: *id, block });
        }
        entry.chain.push(block);
        Ok(())
    }
}
