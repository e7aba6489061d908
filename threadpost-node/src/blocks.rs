//! Content-addressed block storage.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use threadpost_types::Cid;

use crate::error::StorageError;

/// Local block store.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Whether a block is present locally.
    async fn has(&self, cid: &Cid) -> Result<bool, StorageError>;

    /// Store a block.
    async fn put(&self, cid: Cid, data: Vec<u8>) -> Result<(), StorageError>;
}

/// In-memory block store.
///
/// Writes can be switched off to exercise store-failure paths.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: DashMap<Cid, Vec<u8>>,
    fail_writes: AtomicBool,
}

impl MemoryBlockStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a stored block.
    pub fn get(&self, cid: &Cid) -> Option<Vec<u8>> {
        self.blocks.get(cid).map(|data| data.clone())
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Make every subsequent `put` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn has(&self, cid: &Cid) -> Result<bool, StorageError> {
        Ok(self.blocks.contains_key(cid))
    }

    async fn put(&self, cid: Cid, data: Vec<u8>) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("block store is read-only".into()));
        }
        self.blocks.insert(cid, data);
        Ok(())
    }
}
