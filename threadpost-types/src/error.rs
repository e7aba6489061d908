//! Error types for the wire layer.

use thiserror::Error;

/// Errors that can occur while encoding, decoding or authenticating wire data.
#[derive(Debug, Error)]
pub enum WireError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Outer envelope is structurally invalid
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Signature did not verify (or could not be checked)
    #[error("bad signature")]
    BadSignature,

    /// Key bytes do not form a valid key
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Sealed box could not be opened
    #[error("decryption failed")]
    DecryptFailed,

    /// Sealing failed
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Text or bytes do not decode to a peer id
    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),

    /// Text does not decode to a content identifier
    #[error("invalid cid: {0}")]
    InvalidCid(String),

    /// Invalid message type discriminator
    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),
}
