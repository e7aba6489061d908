//! # threadpost-types
//!
//! Wire format types for the threadpost peer protocol.
//!
//! This crate provides the foundational types used across all threadpost crates:
//! - [`PeerId`], [`ThreadId`], [`Cid`], [`MessageId`] - Identity and ordering types
//! - [`Keypair`], [`seal`], [`verify`] - Signing keys and sealed boxes
//! - [`Envelope`] - Signed wrapper around every protocol message
//! - [`Message`] - Protocol messages (Ping, ThreadBlock, Store, etc.)
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod keys;
mod messages;

pub use envelope::Envelope;
pub use error::WireError;
pub use ids::{Cid, MessageId, PeerId, ThreadId};
pub use keys::{seal, validate_public_key, verify, Keypair, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
pub use messages::{
    BlockPayload, CidList, ErrorNotice, Message, MessageType, OfflineAck, OfflineRelay, Payload,
    Ping, SignedThreadBlock, ThreadBlock, ThreadBlockType,
};
