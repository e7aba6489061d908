//! Error types for threadpost-node.

use std::path::PathBuf;

use threadpost_core::AdmissionError;
use threadpost_types::{Cid, MessageType, WireError};

use crate::threads::ThreadError;

/// Main error type for node operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Wire format error.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be decoded.
    #[error("corrupt row in {table}: {reason}")]
    Corrupt {
        /// Table the row came from.
        table: &'static str,
        /// What failed to decode.
        reason: String,
    },

    /// The backing store refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Errors from handling a single inbound message.
///
/// None of these are fatal to the node; each is scoped to the message that
/// produced it.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Envelope, signature, decryption or identifier failure.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// A known message type arrived without a payload.
    #[error("{0} message has no payload")]
    EmptyPayload(MessageType),

    /// The payload kind does not agree with the message type.
    #[error("payload mismatch: expected {expected}, got {actual}")]
    PayloadMismatch {
        /// Type named by the message tag.
        expected: MessageType,
        /// Type of the payload actually carried.
        actual: MessageType,
    },

    /// The sender may not cancel this pointer.
    #[error("peer is not authorized to delete pointer")]
    Unauthorized,

    /// No pointer is recorded for the sender.
    #[error("pointer not found")]
    PointerNotFound,

    /// Thread block refused before verification.
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// An invite's thread id is not the id of the key it carries.
    #[error("thread id does not match invite key")]
    ThreadIdMismatch,

    /// An invite's issuer key is not a valid public key.
    #[error("invalid issuer key: {0}")]
    InvalidIssuerKey(String),

    /// Block bytes do not hash to the claimed content identifier.
    #[error("block content does not match {0}")]
    BlockMismatch(Cid),

    /// A relayed message carried another relay.
    #[error("nested offline relay")]
    NestedRelay,

    /// The block store rejected a write.
    #[error("block store write failed: {0}")]
    StoreWriteFailed(#[source] StorageError),

    /// Peer or pointer storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Thread registry failure.
    #[error("thread error: {0}")]
    Thread(#[from] ThreadError),
}

impl ProtocolError {
    /// Stable numeric code carried in Error replies.
    pub fn code(&self) -> u32 {
        match self {
            ProtocolError::Wire(wire) => match wire {
                WireError::MalformedEnvelope(_)
                | WireError::Deserialization(_)
                | WireError::InvalidMessageType(_) => 1,
                WireError::BadSignature => 2,
                WireError::DecryptFailed => 5,
                WireError::InvalidPeerId(_) | WireError::InvalidCid(_) => 17,
                WireError::InvalidKey(_) | WireError::Crypto(_) | WireError::Serialization(_) => {
                    99
                }
            },
            ProtocolError::EmptyPayload(_) => 3,
            ProtocolError::Unauthorized => 4,
            ProtocolError::Admission(AdmissionError::ThreadAlreadyExists) => 6,
            ProtocolError::Admission(AdmissionError::InvalidInviteTarget) => 7,
            ProtocolError::Admission(AdmissionError::ThreadNotFound) => 8,
            ProtocolError::Admission(AdmissionError::Unsupported(_)) => 9,
            ProtocolError::StoreWriteFailed(_) => 10,
            ProtocolError::PayloadMismatch { .. } => 11,
            ProtocolError::BlockMismatch(_) => 12,
            ProtocolError::NestedRelay => 13,
            ProtocolError::ThreadIdMismatch => 14,
            ProtocolError::InvalidIssuerKey(_) => 15,
            ProtocolError::PointerNotFound => 16,
            ProtocolError::Storage(_) => 18,
            ProtocolError::Thread(_) => 19,
        }
    }
}

/// Result type alias for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;
    use threadpost_types::ThreadBlockType;

    #[test]
    fn codes_are_distinct_for_taxonomy() {
        let errors = [
            ProtocolError::Wire(WireError::MalformedEnvelope("x".into())),
            ProtocolError::Wire(WireError::BadSignature),
            ProtocolError::EmptyPayload(MessageType::Ping),
            ProtocolError::Unauthorized,
            ProtocolError::Wire(WireError::DecryptFailed),
            ProtocolError::Admission(AdmissionError::ThreadAlreadyExists),
            ProtocolError::Admission(AdmissionError::InvalidInviteTarget),
            ProtocolError::Admission(AdmissionError::ThreadNotFound),
            ProtocolError::Admission(AdmissionError::Unsupported(ThreadBlockType::Like)),
            ProtocolError::StoreWriteFailed(StorageError::Unavailable("down".into())),
        ];
        let mut codes: Vec<u32> = errors.iter().map(ProtocolError::code).collect();
        assert_eq!(codes, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        codes.dedup();
        assert_eq!(codes.len(), 10);
    }

    #[test]
    fn error_messages_are_readable() {
        let err = ProtocolError::PayloadMismatch {
            expected: MessageType::Store,
            actual: MessageType::Block,
        };
        assert_eq!(err.to_string(), "payload mismatch: expected STORE, got BLOCK");

        let err = ProtocolError::Admission(AdmissionError::ThreadNotFound);
        assert_eq!(err.to_string(), "thread not found");
    }

    #[test]
    fn storage_error_converts_to_node_error() {
        let err: NodeError = StorageError::Unavailable("gone".into()).into();
        assert!(matches!(err, NodeError::Storage(_)));
    }
}
