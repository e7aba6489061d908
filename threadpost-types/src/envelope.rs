//! Envelope - the signed wire wrapper for every protocol message.
//!
//! The sender id is never read from the wire. It is derived from the public
//! key that verified the signature, so "who sent this" cannot be forged by
//! anyone who does not hold that key.

use serde::{Deserialize, Serialize};

use crate::{keys, Keypair, Message, PeerId, WireError};

/// A message plus the sender's public key and a detached signature over the
/// message's canonical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender's Ed25519 public key
    pub sender_public_key: Vec<u8>,
    /// The wrapped message
    pub message: Message,
    /// Signature over `message.to_bytes()`
    pub signature: Vec<u8>,
}

impl Envelope {
    /// Sign `message` with the sender's identity.
    pub fn seal(sender: &Keypair, message: Message) -> Result<Self, WireError> {
        let bytes = message.to_bytes()?;
        Ok(Self {
            sender_public_key: sender.public_key().to_vec(),
            signature: sender.sign(&bytes).to_vec(),
            message,
        })
    }

    /// Decode, authenticate and unwrap raw envelope bytes.
    pub fn open(raw: &[u8]) -> Result<(PeerId, Message), WireError> {
        let envelope = Self::from_bytes(raw)?;
        let sender = envelope.verify()?;
        Ok((sender, envelope.message))
    }

    /// Check the signature and derive the sender id.
    pub fn verify(&self) -> Result<PeerId, WireError> {
        let bytes = self.message.to_bytes()?;
        keys::verify(&self.sender_public_key, &bytes, &self.signature)?;
        Ok(PeerId::from_public_key(&self.sender_public_key))
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(|e| WireError::MalformedEnvelope(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockPayload, Payload, Ping};

    fn block_message() -> Message {
        Message::new(Payload::Block(BlockPayload::for_data(b"some block".to_vec())))
    }

    #[test]
    fn open_returns_sender_derived_from_key() {
        let sender = Keypair::generate();
        let envelope = Envelope::seal(&sender, block_message()).unwrap();

        let (sender_id, message) = Envelope::open(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(sender_id, sender.peer_id());
        assert_eq!(message, block_message());
    }

    #[test]
    fn open_rejects_garbage() {
        assert!(matches!(
            Envelope::open(b"definitely not msgpack"),
            Err(WireError::MalformedEnvelope(_))
        ));
        assert!(matches!(Envelope::open(&[]), Err(WireError::MalformedEnvelope(_))));
    }

    #[test]
    fn flipping_any_payload_byte_fails() {
        let sender = Keypair::generate();
        let envelope = Envelope::seal(&sender, block_message()).unwrap();
        let Some(Payload::Block(block)) = envelope.message.payload.clone() else {
            panic!("expected block payload");
        };

        for i in 0..block.raw_data.len() {
            let mut tampered = envelope.clone();
            let mut raw = block.raw_data.clone();
            raw[i] ^= 0x01;
            tampered.message.payload = Some(Payload::Block(BlockPayload {
                cid: block.cid.clone(),
                raw_data: raw,
            }));
            let bytes = tampered.to_bytes().unwrap();
            assert!(matches!(Envelope::open(&bytes), Err(WireError::BadSignature)));
        }
    }

    #[test]
    fn flipping_any_signature_byte_fails() {
        let sender = Keypair::generate();
        let envelope = Envelope::seal(&sender, block_message()).unwrap();

        for i in 0..envelope.signature.len() {
            let mut tampered = envelope.clone();
            tampered.signature[i] ^= 0x80;
            assert!(tampered.verify().is_err());
        }
    }

    #[test]
    fn flipping_raw_bytes_never_authenticates_other_content() {
        let sender = Keypair::generate();
        let envelope = Envelope::seal(&sender, block_message()).unwrap();
        let bytes = envelope.to_bytes().unwrap();

        for i in 0..bytes.len() {
            let mut tampered = bytes.clone();
            tampered[i] ^= 0x01;
            if let Ok((sender_id, message)) = Envelope::open(&tampered) {
                // Only a change that decodes to the identical signed content
                // may pass, and it must still be attributed to the signer.
                assert_eq!(sender_id, sender.peer_id());
                assert_eq!(message, envelope.message);
            }
        }
    }

    #[test]
    fn swapped_public_key_fails() {
        let sender = Keypair::generate();
        let impostor = Keypair::generate();
        let mut envelope = Envelope::seal(
            &sender,
            Message::new(Payload::Ping(Ping { nonce: 5 })),
        )
        .unwrap();
        envelope.sender_public_key = impostor.public_key().to_vec();
        assert!(matches!(envelope.verify(), Err(WireError::BadSignature)));
    }

    #[test]
    fn invalid_public_key_is_bad_signature() {
        let sender = Keypair::generate();
        let mut envelope = Envelope::seal(&sender, block_message()).unwrap();
        envelope.sender_public_key = vec![1, 2, 3];
        assert!(matches!(envelope.verify(), Err(WireError::BadSignature)));
    }
}
