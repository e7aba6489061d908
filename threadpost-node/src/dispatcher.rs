//! Protocol dispatcher.
//!
//! Maps each message type to a handler and runs it against the authenticated
//! sender. The dispatcher owns no state of its own; handlers mutate the
//! thread, pointer and block stores they were given.
//!
//! # Handler table
//!
//! | Type          | Handler effect                                      | Reply        |
//! |---------------|-----------------------------------------------------|--------------|
//! | PING          | none                                                | same message |
//! | THREAD_BLOCK  | [`Processor::apply`]                                | none         |
//! | OFFLINE_ACK   | delete the sender's pointer if it may cancel it     | none         |
//! | OFFLINE_RELAY | open, authenticate and dispatch the inner envelope  | none         |
//! | BLOCK         | store the block                                     | none         |
//! | STORE         | none                                                | missing cids |
//! | ERROR         | log the notice                                      | none         |
//!
//! Unknown types have no handler and are accepted silently.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use threadpost_types::{
    Cid, CidList, Envelope, Keypair, Message, MessageType, Payload, PeerId, WireError,
};
use tracing::{debug, warn};

use crate::blocks::BlockStore;
use crate::error::ProtocolError;
use crate::processor::Processor;
use crate::storage::PointerStore;

/// Outcome of dispatching one message: an optional reply.
pub type DispatchResult = Result<Option<Message>, ProtocolError>;

/// A message handler.
pub type Handler =
    for<'a> fn(&'a Dispatcher, &'a Inbound, Message) -> BoxFuture<'a, DispatchResult>;

/// Who a message came from and how it arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inbound {
    /// Derived from the key that verified the envelope.
    pub sender: PeerId,
    /// Whether the message was unwrapped from an offline relay.
    pub relayed: bool,
}

impl Inbound {
    /// A message received over a direct connection.
    pub fn direct(sender: PeerId) -> Self {
        Self {
            sender,
            relayed: false,
        }
    }

    /// A message unwrapped from an offline relay.
    pub fn relayed(sender: PeerId) -> Self {
        Self {
            sender,
            relayed: true,
        }
    }
}

/// Look up the handler for a raw message type.
///
/// Returns `None` for types this node does not know.
pub fn handler_for(msg_type: u8) -> Option<Handler> {
    let kind = MessageType::try_from(msg_type).ok()?;
    let handler: Handler = match kind {
        MessageType::Ping => ping,
        MessageType::ThreadBlock => thread_block,
        MessageType::OfflineAck => offline_ack,
        MessageType::OfflineRelay => offline_relay,
        MessageType::Block => block,
        MessageType::Store => store,
        MessageType::Error => error,
    };
    Some(handler)
}

fn ping<'a>(d: &'a Dispatcher, i: &'a Inbound, m: Message) -> BoxFuture<'a, DispatchResult> {
    Box::pin(d.handle_ping(i, m))
}

fn thread_block<'a>(d: &'a Dispatcher, i: &'a Inbound, m: Message) -> BoxFuture<'a, DispatchResult> {
    Box::pin(d.handle_thread_block(i, m))
}

fn offline_ack<'a>(d: &'a Dispatcher, i: &'a Inbound, m: Message) -> BoxFuture<'a, DispatchResult> {
    Box::pin(d.handle_offline_ack(i, m))
}

fn offline_relay<'a>(d: &'a Dispatcher, i: &'a Inbound, m: Message) -> BoxFuture<'a, DispatchResult> {
    Box::pin(d.handle_offline_relay(i, m))
}

fn block<'a>(d: &'a Dispatcher, i: &'a Inbound, m: Message) -> BoxFuture<'a, DispatchResult> {
    Box::pin(d.handle_block(i, m))
}

fn store<'a>(d: &'a Dispatcher, i: &'a Inbound, m: Message) -> BoxFuture<'a, DispatchResult> {
    Box::pin(d.handle_store(i, m))
}

fn error<'a>(d: &'a Dispatcher, i: &'a Inbound, m: Message) -> BoxFuture<'a, DispatchResult> {
    Box::pin(d.handle_error(i, m))
}

/// Whether a failed message of this type is answered with an ERROR reply
/// instead of being returned to the caller.
fn replies_on_error(kind: MessageType) -> bool {
    matches!(kind, MessageType::Store | MessageType::OfflineRelay)
}

fn unexpected(expected: MessageType, payload: Option<Payload>) -> ProtocolError {
    match payload {
        None => ProtocolError::EmptyPayload(expected),
        Some(p) => ProtocolError::PayloadMismatch {
            expected,
            actual: p.kind(),
        },
    }
}

/// Routes inbound messages to their handlers.
pub struct Dispatcher {
    identity: Arc<Keypair>,
    processor: Processor,
    blocks: Arc<dyn BlockStore>,
    pointers: Arc<dyn PointerStore>,
}

impl Dispatcher {
    /// Create a dispatcher for the peer owning `identity`.
    pub fn new(
        identity: Arc<Keypair>,
        processor: Processor,
        blocks: Arc<dyn BlockStore>,
        pointers: Arc<dyn PointerStore>,
    ) -> Self {
        Self {
            identity,
            processor,
            blocks,
            pointers,
        }
    }

    /// Authenticate raw envelope bytes and dispatch the message inside.
    ///
    /// Failures of STORE and OFFLINE_RELAY messages are answered with an
    /// ERROR reply instead of being returned.
    pub async fn handle_envelope(&self, raw: &[u8]) -> DispatchResult {
        let (sender, message) = Envelope::open(raw)?;
        let kind = message.message_type().ok();
        let inbound = Inbound::direct(sender);

        match self.dispatch(&inbound, message).await {
            Ok(reply) => Ok(reply),
            Err(e) if kind.is_some_and(replies_on_error) => {
                warn!(peer = %sender, error = %e, "answering failed request with error reply");
                Ok(Some(Message::error(e.code(), e.to_string())))
            }
            Err(e) => Err(e),
        }
    }

    /// Dispatch an authenticated message.
    pub fn dispatch<'a>(&'a self, inbound: &'a Inbound, message: Message) -> BoxFuture<'a, DispatchResult> {
        Box::pin(async move {
            let Some(handler) = handler_for(message.msg_type) else {
                debug!(peer = %inbound.sender, msg_type = message.msg_type, "no handler for message type");
                return Ok(None);
            };
            if message.payload.is_none() {
                return Err(ProtocolError::EmptyPayload(message.message_type()?));
            }
            handler(self, inbound, message).await
        })
    }

    async fn handle_ping(&self, inbound: &Inbound, message: Message) -> DispatchResult {
        debug!(peer = %inbound.sender, "received PING");
        Ok(Some(message))
    }

    async fn handle_thread_block(&self, inbound: &Inbound, message: Message) -> DispatchResult {
        let signed = match message.payload {
            Some(Payload::ThreadBlock(signed)) => signed,
            other => return Err(unexpected(MessageType::ThreadBlock, other)),
        };
        debug!(peer = %inbound.sender, thread = %signed.thread_id, "received THREAD_BLOCK");
        self.processor.apply(&signed).await?;
        Ok(None)
    }

    async fn handle_offline_ack(&self, inbound: &Inbound, message: Message) -> DispatchResult {
        let ack = match message.payload {
            Some(Payload::OfflineAck(ack)) => ack,
            other => return Err(unexpected(MessageType::OfflineAck, other)),
        };
        let text = String::from_utf8(ack.peer_id)
            .map_err(|e| WireError::InvalidPeerId(format!("not utf-8: {}", e)))?;
        text.parse::<PeerId>()?;

        let pointer = self
            .pointers
            .get_pointer(&inbound.sender)
            .await?
            .ok_or(ProtocolError::PointerNotFound)?;
        if pointer.cancel_id != Some(inbound.sender) {
            warn!(peer = %inbound.sender, "peer is not authorized to delete pointer");
            return Err(ProtocolError::Unauthorized);
        }
        self.pointers.delete_pointer(&inbound.sender).await?;

        debug!(peer = %inbound.sender, "received OFFLINE_ACK, pointer deleted");
        Ok(None)
    }

    async fn handle_offline_relay(&self, inbound: &Inbound, message: Message) -> DispatchResult {
        let relay = match message.payload {
            Some(Payload::OfflineRelay(relay)) => relay,
            other => return Err(unexpected(MessageType::OfflineRelay, other)),
        };
        if inbound.relayed {
            return Err(ProtocolError::NestedRelay);
        }

        let plaintext = self.identity.open(&relay.ciphertext)?;
        let envelope = Envelope::from_bytes(&plaintext)?;
        let sender = envelope.verify()?;

        let inner = Inbound::relayed(sender);
        let reply = self.dispatch(&inner, envelope.message).await?;
        if reply.is_some() {
            debug!(peer = %sender, "discarding reply to relayed message");
        }

        debug!(peer = %inbound.sender, origin = %sender, "received OFFLINE_RELAY");
        Ok(None)
    }

    async fn handle_block(&self, inbound: &Inbound, message: Message) -> DispatchResult {
        let block = match message.payload {
            Some(Payload::Block(block)) => block,
            other => return Err(unexpected(MessageType::Block, other)),
        };
        let cid: Cid = block.cid.parse()?;
        if !cid.matches(&block.raw_data) {
            return Err(ProtocolError::BlockMismatch(cid));
        }

        self.blocks
            .put(cid, block.raw_data)
            .await
            .map_err(ProtocolError::StoreWriteFailed)?;
        debug!(peer = %inbound.sender, cid = %cid, "received BLOCK");
        Ok(None)
    }

    async fn handle_store(&self, inbound: &Inbound, message: Message) -> DispatchResult {
        let list = match message.payload {
            Some(Payload::CidList(list)) => list,
            other => return Err(unexpected(MessageType::Store, other)),
        };

        let mut need = Vec::new();
        for text in list.cids {
            let cid = match text.parse::<Cid>() {
                Ok(cid) => cid,
                Err(_) => {
                    debug!(peer = %inbound.sender, cid = %text, "skipping malformed cid");
                    continue;
                }
            };
            // A failed lookup counts as missing.
            if !self.blocks.has(&cid).await.unwrap_or(false) {
                need.push(cid.to_string());
            }
        }

        debug!(peer = %inbound.sender, need = need.len(), "received STORE");
        Ok(Some(Message::new(Payload::CidList(CidList { cids: need }))))
    }

    async fn handle_error(&self, inbound: &Inbound, message: Message) -> DispatchResult {
        let notice = match message.payload {
            Some(Payload::Error(notice)) => notice,
            other => return Err(unexpected(MessageType::Error, other)),
        };
        warn!(
            peer = %inbound.sender,
            code = notice.code,
            message = %notice.message,
            "peer reported error"
        );
        Ok(None)
    }
}
