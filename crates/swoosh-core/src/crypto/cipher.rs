//! AES-256-GCM frame cipher bound to one session key.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::{rngs::OsRng, RngCore};

use super::{keys::SessionKey, CryptoError};
use crate::protocol::frame::{EncryptedFrame, MAX_PLAINTEXT_LEN, NONCE_LEN};

/// Seals and opens [`EncryptedFrame`]s under a single [`SessionKey`].
///
/// Every call to [`seal`](Self::seal) draws a new 96-bit nonce from the OS
/// RNG.  Callers cannot supply a nonce, so a `(key, nonce)` pair cannot be
/// reused through this API.
pub struct SessionCipher {
    aead: Aes256Gcm,
}

impl SessionCipher {
    /// Binds a cipher to `key`, consuming it so the key cannot be handed to a
    /// second session.
    pub fn new(key: SessionKey) -> Self {
        let aead = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        Self { aead }
    }

    /// Encrypts `plaintext` into a fresh frame.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::PlaintextTooLarge`] when the sealed frame would
    /// exceed the 1024-byte bound.
    pub fn seal(&self, plaintext: &[u8]) -> Result<EncryptedFrame, CryptoError> {
        if plaintext.len() > MAX_PLAINTEXT_LEN {
            return Err(CryptoError::PlaintextTooLarge {
                len: plaintext.len(),
                max: MAX_PLAINTEXT_LEN,
            });
        }

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let sealed = self
            .aead
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Encryption)?;
        Ok(EncryptedFrame::from_sealed(nonce, sealed))
    }

    /// Authenticates and decrypts `frame`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Authentication`] if the tag does not verify.
    /// Altered plaintext is never returned.
    pub fn open(&self, frame: &EncryptedFrame) -> Result<Vec<u8>, CryptoError> {
        self.aead
            .decrypt(Nonce::from_slice(frame.nonce()), frame.sealed())
            .map_err(|_| CryptoError::Authentication)
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionCipher { .. }")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
