//! Identity and ordering types for threadpost.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::WireError;

fn derive_id(domain: &[u8], public_key: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(public_key);
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    bytes
}

fn decode_id(text: &str) -> Option<[u8; 32]> {
    let bytes = URL_SAFE_NO_PAD.decode(text).ok()?;
    bytes.try_into().ok()
}

/// Identifier of a peer in the network.
///
/// Derived from the peer's Ed25519 public key, displayed as URL-safe base64.
/// The only trusted source of "who sent this" is a key that verified a
/// signature, never a sender field on the wire.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// Derive the peer id owned by a public key.
    pub fn from_public_key(public_key: &[u8]) -> Self {
        Self(derive_id(b"threadpost-peer-id-v1", public_key))
    }

    /// Create a random PeerId (for testing).
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Create a PeerId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Get the raw bytes of this PeerId.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", &self.to_string()[..8])
    }
}

impl FromStr for PeerId {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_id(s)
            .map(Self)
            .ok_or_else(|| WireError::InvalidPeerId(s.to_string()))
    }
}

/// Identifier of a thread.
///
/// Derived from the thread's verification key, so a thread id can only be
/// claimed by someone who can produce that key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThreadId([u8; 32]);

impl ThreadId {
    /// Derive the thread id for a thread verification key.
    pub fn from_public_key(public_key: &[u8]) -> Self {
        Self(derive_id(b"threadpost-thread-id-v1", public_key))
    }

    /// Create a random ThreadId (for testing).
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Create a ThreadId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Get the raw bytes of this ThreadId.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({})", &self.to_string()[..8])
    }
}

/// Content identifier of a block: the BLAKE3 digest of its raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cid([u8; 32]);

impl Cid {
    /// Compute the content identifier for raw block bytes.
    pub fn for_data(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Check that `data` is the content this identifier addresses.
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::for_data(data) == *self
    }

    /// Get the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", &self.to_string()[..12])
    }
}

impl FromStr for Cid {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| WireError::InvalidCid(s.to_string()))?;
        Ok(Self(bytes))
    }
}

/// Identifier of a queued outbound message.
///
/// UUID v7: ordering by id is ordering by creation time, which is what the
/// outbox pages over.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(uuid::Uuid);

impl MessageId {
    /// Create a new time-ordered MessageId.
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// Create a MessageId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        uuid::Uuid::from_slice(bytes).ok().map(Self)
    }

    /// Get the raw bytes of this MessageId.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}
