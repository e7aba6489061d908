//! Signing keys and sealed boxes.
//!
//! Every identity (peer or thread) is an Ed25519 keypair. Sealed boxes are
//! addressed to an Ed25519 public key by mapping it to X25519:
//!
//! ```text
//! sealed = ephemeral_public (32) || nonce (24) || XChaCha20-Poly1305(ciphertext)
//! key    = HKDF-SHA256(ikm = X25519(ephemeral, recipient),
//!                      info = "threadpost-seal-v1" || ephemeral_public || recipient)
//! ```

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::{PeerId, WireError};

/// Size of an Ed25519 public key.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 signature.
pub const SIGNATURE_SIZE: usize = 64;

const SEAL_INFO: &[u8] = b"threadpost-seal-v1";
const NONCE_SIZE: usize = 24;
const TAG_SIZE: usize = 16;

/// An Ed25519 keypair: a peer identity or a thread key.
///
/// Secret material is zeroized on drop.
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore a keypair from its 32-byte secret.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let secret: Zeroizing<[u8; 32]> = Zeroizing::new(bytes.try_into().map_err(|_| {
            WireError::InvalidKey(format!("expected 32 secret bytes, got {}", bytes.len()))
        })?);
        Ok(Self {
            signing: SigningKey::from_bytes(&secret),
        })
    }

    /// The 32-byte secret, for sealing to another peer.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing.to_bytes())
    }

    /// The public key bytes.
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.signing.verifying_key().to_bytes()
    }

    /// The peer id owned by this keypair.
    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(&self.public_key())
    }

    /// Sign `data`.
    pub fn sign(&self, data: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing.sign(data).to_bytes()
    }

    /// Open a box sealed to this keypair's public key.
    ///
    /// Every failure (truncation, wrong recipient, tampering) is
    /// [`WireError::DecryptFailed`].
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, WireError> {
        if sealed.len() < PUBLIC_KEY_SIZE + NONCE_SIZE + TAG_SIZE {
            return Err(WireError::DecryptFailed);
        }
        let (ephemeral, rest) = sealed.split_at(PUBLIC_KEY_SIZE);
        let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

        let ephemeral: [u8; 32] = ephemeral.try_into().map_err(|_| WireError::DecryptFailed)?;
        let secret = StaticSecret::from(self.signing.to_scalar_bytes());
        let shared = secret.diffie_hellman(&X25519PublicKey::from(ephemeral));
        let recipient = self.signing.verifying_key().to_montgomery().to_bytes();

        let key = derive_seal_key(shared.as_bytes(), &ephemeral, &recipient)?;
        XChaCha20Poly1305::new(Key::from_slice(key.as_slice()))
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| WireError::DecryptFailed)
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("peer_id", &self.peer_id())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

fn parse_public_key(public_key: &[u8]) -> Result<VerifyingKey, WireError> {
    let bytes: [u8; PUBLIC_KEY_SIZE] = public_key.try_into().map_err(|_| {
        WireError::InvalidKey(format!("expected 32 key bytes, got {}", public_key.len()))
    })?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| WireError::InvalidKey(e.to_string()))
}

fn derive_seal_key(
    shared: &[u8; 32],
    ephemeral: &[u8; 32],
    recipient: &[u8; 32],
) -> Result<Zeroizing<[u8; 32]>, WireError> {
    let mut info = Vec::with_capacity(SEAL_INFO.len() + 64);
    info.extend_from_slice(SEAL_INFO);
    info.extend_from_slice(ephemeral);
    info.extend_from_slice(recipient);

    let mut key = Zeroizing::new([0u8; 32]);
    Hkdf::<Sha256>::new(None, shared)
        .expand(&info, key.as_mut_slice())
        .map_err(|e| WireError::Crypto(e.to_string()))?;
    Ok(key)
}

/// Check that a public key parses as Ed25519.
pub fn validate_public_key(public_key: &[u8]) -> Result<(), WireError> {
    parse_public_key(public_key).map(|_| ())
}

/// Verify an Ed25519 signature over `data`.
///
/// A key or signature that cannot be parsed counts as a failed verification.
pub fn verify(public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<(), WireError> {
    let key = parse_public_key(public_key).map_err(|_| WireError::BadSignature)?;
    let signature = Signature::from_slice(signature).map_err(|_| WireError::BadSignature)?;
    key.verify(data, &signature)
        .map_err(|_| WireError::BadSignature)
}

/// Seal `plaintext` so only the holder of `recipient_public_key` can open it.
pub fn seal(recipient_public_key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, WireError> {
    let recipient = parse_public_key(recipient_public_key)?
        .to_montgomery()
        .to_bytes();

    let ephemeral_secret = StaticSecret::random_from_rng(OsRng);
    let ephemeral = X25519PublicKey::from(&ephemeral_secret).to_bytes();
    let shared = ephemeral_secret.diffie_hellman(&X25519PublicKey::from(recipient));

    let key = derive_seal_key(shared.as_bytes(), &ephemeral, &recipient)?;
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = XChaCha20Poly1305::new(Key::from_slice(key.as_slice()))
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|e| WireError::Crypto(e.to_string()))?;

    let mut sealed = Vec::with_capacity(PUBLIC_KEY_SIZE + NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&ephemeral);
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}
