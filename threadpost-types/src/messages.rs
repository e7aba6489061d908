//! Protocol messages for threadpost.
//!
//! A [`Message`] is a type tag plus an optional payload. The tag travels as a
//! raw byte so that messages from newer peers still decode; whether the tag is
//! known, and whether it agrees with the payload, is for the receiver to
//! decide.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{keys, Cid, Envelope, Keypair, PeerId, ThreadId, WireError};

/// Message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Liveness check, echoed back unchanged
    Ping = 0,
    /// Signed thread block
    ThreadBlock = 1,
    /// Retract an offline-delivery pointer
    OfflineAck = 2,
    /// Envelope left at a relay while the recipient was offline
    OfflineRelay = 3,
    /// Raw content-addressed block
    Block = 4,
    /// "Which of these do you need?" negotiation
    Store = 5,
    /// Protocol-level error notice
    Error = 6,
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(MessageType::Ping),
            1 => Ok(MessageType::ThreadBlock),
            2 => Ok(MessageType::OfflineAck),
            3 => Ok(MessageType::OfflineRelay),
            4 => Ok(MessageType::Block),
            5 => Ok(MessageType::Store),
            6 => Ok(MessageType::Error),
            _ => Err(WireError::InvalidMessageType(value)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Ping => "PING",
            MessageType::ThreadBlock => "THREAD_BLOCK",
            MessageType::OfflineAck => "OFFLINE_ACK",
            MessageType::OfflineRelay => "OFFLINE_RELAY",
            MessageType::Block => "BLOCK",
            MessageType::Store => "STORE",
            MessageType::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Raw message type tag (see [`MessageType`])
    pub msg_type: u8,
    /// Typed payload; absent payloads are rejected by the receiver
    pub payload: Option<Payload>,
}

impl Message {
    /// Create a message whose tag agrees with its payload.
    pub fn new(payload: Payload) -> Self {
        Self {
            msg_type: payload.kind() as u8,
            payload: Some(payload),
        }
    }

    /// Create a message from a raw tag and payload, without checking agreement.
    pub fn from_parts(msg_type: u8, payload: Option<Payload>) -> Self {
        Self { msg_type, payload }
    }

    /// Create an Error notice.
    pub fn error(code: u32, message: impl Into<String>) -> Self {
        Self::new(Payload::Error(ErrorNotice {
            code,
            message: message.into(),
        }))
    }

    /// Seal an envelope for `recipient_public_key` and wrap it for relay
    /// delivery.
    pub fn relay(recipient_public_key: &[u8], envelope: &Envelope) -> Result<Self, WireError> {
        let ciphertext = keys::seal(recipient_public_key, &envelope.to_bytes()?)?;
        Ok(Self::new(Payload::OfflineRelay(OfflineRelay { ciphertext })))
    }

    /// Get the message type as an enum.
    pub fn message_type(&self) -> Result<MessageType, WireError> {
        MessageType::try_from(self.msg_type)
    }

    /// Serialize to MessagePack bytes.
    ///
    /// This is the canonical form covered by envelope signatures.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
    }
}

/// All payload kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Ping body
    Ping(Ping),
    /// Signed thread block
    ThreadBlock(SignedThreadBlock),
    /// Pointer retraction
    OfflineAck(OfflineAck),
    /// Sealed envelope from a relay
    OfflineRelay(OfflineRelay),
    /// Raw block
    Block(BlockPayload),
    /// Content identifier list (Store negotiation)
    CidList(CidList),
    /// Error notice
    Error(ErrorNotice),
}

impl Payload {
    /// The message type this payload belongs to.
    pub fn kind(&self) -> MessageType {
        match self {
            Payload::Ping(_) => MessageType::Ping,
            Payload::ThreadBlock(_) => MessageType::ThreadBlock,
            Payload::OfflineAck(_) => MessageType::OfflineAck,
            Payload::OfflineRelay(_) => MessageType::OfflineRelay,
            Payload::Block(_) => MessageType::Block,
            Payload::CidList(_) => MessageType::Store,
            Payload::Error(_) => MessageType::Error,
        }
    }
}

/// Ping body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Caller-chosen value, echoed back
    pub nonce: u64,
}

/// Retracts the offline-delivery pointer the sender is authorized to cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineAck {
    /// Text form of a peer id, as bytes
    pub peer_id: Vec<u8>,
}

impl OfflineAck {
    /// Acknowledge on behalf of `peer_id`.
    pub fn for_peer(peer_id: &PeerId) -> Self {
        Self {
            peer_id: peer_id.to_string().into_bytes(),
        }
    }
}

/// An envelope sealed to the recipient's identity key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineRelay {
    /// Sealed MessagePack envelope
    pub ciphertext: Vec<u8>,
}

impl fmt::Debug for OfflineRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineRelay")
            .field("ciphertext", &format!("[{} bytes]", self.ciphertext.len()))
            .finish()
    }
}

/// A raw content-addressed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPayload {
    /// Text form of the block's content identifier
    pub cid: String,
    /// Block bytes
    pub raw_data: Vec<u8>,
}

impl BlockPayload {
    /// Wrap raw bytes with their content identifier.
    pub fn for_data(raw_data: Vec<u8>) -> Self {
        Self {
            cid: Cid::for_data(&raw_data).to_string(),
            raw_data,
        }
    }
}

/// A list of content identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidList {
    /// Text form identifiers; malformed entries are skipped by receivers
    pub cids: Vec<String>,
}

/// Error notice sent by a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    /// Numeric error code
    pub code: u32,
    /// Human-readable description
    pub message: String,
}

/// Kind of thread block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreadBlockType {
    /// Invitation carrying the thread key
    Invite,
    /// Content block
    Photo,
    /// Comment on a block
    Comment,
    /// Like of a block
    Like,
}

impl fmt::Display for ThreadBlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreadBlockType::Invite => "INVITE",
            ThreadBlockType::Photo => "PHOTO",
            ThreadBlockType::Comment => "COMMENT",
            ThreadBlockType::Like => "LIKE",
        };
        f.write_str(name)
    }
}

/// The signed content of a thread block.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadBlock {
    /// Block kind
    pub block_type: ThreadBlockType,
    /// Target; for invites, the text form of the invitee's peer id
    pub target: String,
    /// For invites, the thread secret sealed to the invitee
    pub target_key: Vec<u8>,
    /// Parent blocks in the thread chain
    pub parents: Vec<Cid>,
}

impl ThreadBlock {
    /// Build an invite that hands `thread_key` to the invitee.
    pub fn invite(
        invitee: &PeerId,
        invitee_public_key: &[u8],
        thread_key: &Keypair,
        parents: Vec<Cid>,
    ) -> Result<Self, WireError> {
        let target_key = keys::seal(invitee_public_key, thread_key.secret_bytes().as_slice())?;
        Ok(Self {
            block_type: ThreadBlockType::Invite,
            target: invitee.to_string(),
            target_key,
            parents,
        })
    }

    /// Build a content block.
    pub fn content(block_type: ThreadBlockType, target: impl Into<String>, parents: Vec<Cid>) -> Self {
        Self {
            block_type,
            target: target.into(),
            target_key: Vec::new(),
            parents,
        }
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
    }
}

impl fmt::Debug for ThreadBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadBlock")
            .field("block_type", &self.block_type)
            .field("target", &self.target)
            .field("target_key", &"[REDACTED]")
            .field("parents", &self.parents)
            .finish()
    }
}

/// A thread block with its signature and thread routing data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedThreadBlock {
    /// Block id (content identifier of `data`)
    pub id: Cid,
    /// Thread this block belongs to
    pub thread_id: ThreadId,
    /// Thread display name
    pub thread_name: String,
    /// Public key of the peer that issued the block
    pub issuer_public_key: Vec<u8>,
    /// MessagePack-encoded [`ThreadBlock`]
    pub data: Vec<u8>,
    /// Signature over `data` by the thread key
    pub signature: Vec<u8>,
}

impl SignedThreadBlock {
    /// Serialize and sign `block` with the thread key.
    pub fn sign(
        thread_key: &Keypair,
        issuer: &Keypair,
        thread_name: impl Into<String>,
        block: &ThreadBlock,
    ) -> Result<Self, WireError> {
        let data = block.to_bytes()?;
        Ok(Self {
            id: Cid::for_data(&data),
            thread_id: ThreadId::from_public_key(&thread_key.public_key()),
            thread_name: thread_name.into(),
            issuer_public_key: issuer.public_key().to_vec(),
            signature: thread_key.sign(&data).to_vec(),
            data,
        })
    }

    /// Decode the inner block.
    pub fn block(&self) -> Result<ThreadBlock, WireError> {
        ThreadBlock::from_bytes(&self.data)
    }
}
