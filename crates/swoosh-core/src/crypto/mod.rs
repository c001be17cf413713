//! Key agreement and the per-session frame cipher.
//!
//! - **`keys`** – X25519 keypairs and the [`keys::SessionKey`] taken from the
//!   Diffie-Hellman shared secret.
//! - **`cipher`** – AES-256-GCM sealing/opening of
//!   [`crate::protocol::frame::EncryptedFrame`]s with internally drawn nonces.
//!
//! The session key is the raw 32-byte X25519 output.  There is no further
//! key-derivation step.

pub mod cipher;
pub mod keys;

use thiserror::Error;

/// Errors raised by key agreement and frame encryption.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The peer's public key is a low-order point; the shared secret would be
    /// all zeros and known to anyone.
    #[error("key agreement produced a non-contributory shared secret")]
    NonContributory,

    /// The plaintext does not fit in one bounded frame.
    #[error("plaintext of {len} bytes exceeds the {max}-byte frame limit")]
    PlaintextTooLarge { len: usize, max: usize },

    /// The AEAD tag did not verify: the frame was altered, truncated, or sealed
    /// under a different key.
    #[error("frame authentication failed")]
    Authentication,

    /// The AEAD backend refused to encrypt.
    #[error("frame encryption failed")]
    Encryption,
}
