//! Thread block processor.
//!
//! Applies signed thread blocks to local thread state. An INVITE is the only
//! way a thread comes into existence from network input, so it gets the
//! strictest checks: it must be addressed to this peer, carry a thread key
//! sealed to this peer's identity, be signed by that key, and name the
//! thread that key derives. Content blocks only need the thread's own key.

use std::sync::Arc;

use threadpost_core::{gate, AdmissionError, Gate};
use threadpost_types::{
    validate_public_key, verify, Keypair, SignedThreadBlock, ThreadBlock, ThreadId, WireError,
};
use tracing::{debug, error, info, warn};

use crate::error::ProtocolError;
use crate::storage::{Peer, PeerStore};
use crate::threads::{Thread, ThreadError, ThreadRegistry};

/// Validates and applies signed thread blocks.
pub struct Processor {
    identity: Arc<Keypair>,
    threads: Arc<dyn ThreadRegistry>,
    peers: Arc<dyn PeerStore>,
}

impl Processor {
    /// Create a processor for the peer owning `identity`.
    pub fn new(
        identity: Arc<Keypair>,
        threads: Arc<dyn ThreadRegistry>,
        peers: Arc<dyn PeerStore>,
    ) -> Self {
        Self {
            identity,
            threads,
            peers,
        }
    }

    /// Validate `signed` and append it to its thread.
    ///
    /// A failure leaves every thread as it was before the call.
    pub async fn apply(&self, signed: &SignedThreadBlock) -> Result<(), ProtocolError> {
        let block = signed.block()?;
        let existing = self.threads.lookup(&signed.thread_id).await;

        let thread = match gate(
            block.block_type,
            existing.is_some(),
            &block.target,
            &self.identity.peer_id(),
        )? {
            Gate::AdmitInvite => self.admit_invite(signed, &block).await?,
            Gate::VerifyWithThreadKey => {
                let thread = existing.ok_or(AdmissionError::ThreadNotFound)?;
                thread.verify(&signed.data, &signed.signature)?;
                thread
            }
        };

        if !signed.id.matches(&signed.data) {
            return Err(ProtocolError::BlockMismatch(signed.id));
        }

        self.threads.handle_block(&thread.id, signed.id).await?;
        debug!(
            thread = %thread.id,
            block = %signed.id,
            kind = %block.block_type,
            "applied thread block"
        );
        Ok(())
    }

    async fn admit_invite(
        &self,
        signed: &SignedThreadBlock,
        block: &ThreadBlock,
    ) -> Result<Arc<Thread>, ProtocolError> {
        let secret = self.identity.open(&block.target_key)?;
        let key = Keypair::from_secret_bytes(&secret).map_err(|_| WireError::DecryptFailed)?;

        // Proves the inviter holds the thread secret, not just its id.
        verify(&key.public_key(), &signed.data, &signed.signature)?;

        if ThreadId::from_public_key(&key.public_key()) != signed.thread_id {
            return Err(ProtocolError::ThreadIdMismatch);
        }
        validate_public_key(&signed.issuer_public_key)
            .map_err(|e| ProtocolError::InvalidIssuerKey(e.to_string()))?;

        let thread = match self.threads.create(&signed.thread_name, key).await {
            Ok(thread) => thread,
            Err(ThreadError::AlreadyExists(_)) => {
                return Err(AdmissionError::ThreadAlreadyExists.into())
            }
            Err(e) => return Err(e.into()),
        };

        let inviter = Peer::new(thread.id, signed.issuer_public_key.clone());
        if let Err(e) = self.peers.add_peer(&inviter).await {
            warn!(thread = %thread.id, error = %e, "failed to record inviter, rolling back thread");
            if let Err(rollback) = self.threads.remove(&thread.id).await {
                error!(thread = %thread.id, error = %rollback, "thread rollback failed");
            }
            return Err(e.into());
        }

        info!(
            thread = %thread.id,
            name = %thread.name,
            inviter = %inviter.peer_id,
            "joined thread"
        );
        Ok(thread)
    }
}
