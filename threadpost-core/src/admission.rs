//! Thread block admission.
//!
//! Before a signed thread block touches any state, the processor asks this
//! module which verification path applies:
//!
//! | Block type        | Thread known | Outcome                                  |
//! |-------------------|--------------|------------------------------------------|
//! | INVITE            | no           | `AdmitInvite` if the target is us        |
//! | INVITE            | yes          | `ThreadAlreadyExists`                    |
//! | PHOTO             | yes          | `VerifyWithThreadKey`                    |
//! | PHOTO             | no           | `ThreadNotFound`                         |
//! | COMMENT, LIKE     | any          | `Unsupported`                            |

use thiserror::Error;
use threadpost_types::{PeerId, ThreadBlockType};

/// The verification path a block must take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Decrypt the invite's thread key, verify with it, then create the thread.
    AdmitInvite,
    /// Verify with the existing thread's key.
    VerifyWithThreadKey,
}

/// Reasons a block is refused before verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// An INVITE arrived for a thread that is already tracked.
    #[error("thread already exists")]
    ThreadAlreadyExists,

    /// An INVITE addressed to a different peer.
    #[error("invite target is not this peer")]
    InvalidInviteTarget,

    /// A content block for a thread that is not tracked.
    #[error("thread not found")]
    ThreadNotFound,

    /// A block type with no handling yet.
    #[error("unsupported block type: {0}")]
    Unsupported(ThreadBlockType),
}

/// Decide how a block of `block_type` is admitted.
///
/// `target` is the block's target field; for an invite it must be the text
/// form of `self_id`.
pub fn gate(
    block_type: ThreadBlockType,
    thread_known: bool,
    target: &str,
    self_id: &PeerId,
) -> Result<Gate, AdmissionError> {
    match block_type {
        ThreadBlockType::Invite => {
            if thread_known {
                return Err(AdmissionError::ThreadAlreadyExists);
            }
            if target != self_id.to_string() {
                return Err(AdmissionError::InvalidInviteTarget);
            }
            Ok(Gate::AdmitInvite)
        }
        ThreadBlockType::Photo => {
            if !thread_known {
                return Err(AdmissionError::ThreadNotFound);
            }
            Ok(Gate::VerifyWithThreadKey)
        }
        other => Err(AdmissionError::Unsupported(other)),
    }
}
