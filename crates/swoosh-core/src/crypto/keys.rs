//! X25519 keypairs and the session key they agree on.
//!
//! [`EphemeralKeypair`] is generated fresh for every TCP session and consumed
//! by [`EphemeralKeypair::agree`], so a secret can never be reused for a
//! second session.  [`StaticKeypair`] lives for the whole process and is only
//! used by the legacy per-address UDP channel.

use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::CryptoError;
use crate::protocol::frame::HANDSHAKE_KEY_LEN;

/// Length of the symmetric session key.
pub const SESSION_KEY_LEN: usize = 32;

/// A 32-byte symmetric key shared by the two ends of one channel.
///
/// Wiped from memory on drop.  `Debug` never prints the key bytes.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    fn from_shared_secret(shared: &SharedSecret) -> Result<Self, CryptoError> {
        if !shared.was_contributory() {
            return Err(CryptoError::NonContributory);
        }
        let mut key = [0u8; SESSION_KEY_LEN];
        key.copy_from_slice(&shared.as_bytes()[..SESSION_KEY_LEN]);
        Ok(Self(key))
    }

    /// Raw key bytes.  Never log or persist these.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

/// A single-use keypair for one session handshake.
pub struct EphemeralKeypair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeypair {
    /// Draws a fresh keypair from the OS random number generator.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The public half as sent on the wire.
    pub fn public_bytes(&self) -> [u8; HANDSHAKE_KEY_LEN] {
        self.public.to_bytes()
    }

    /// Completes the Diffie-Hellman exchange, consuming the secret.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::NonContributory`] if the peer sent a low-order
    /// point.
    pub fn agree(self, peer_public: &[u8; HANDSHAKE_KEY_LEN]) -> Result<SessionKey, CryptoError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer_public));
        SessionKey::from_shared_secret(&shared)
    }
}

impl std::fmt::Debug for EphemeralKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeypair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// A process-lifetime keypair for the legacy UDP channel.
pub struct StaticKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl StaticKeypair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; HANDSHAKE_KEY_LEN] {
        self.public.to_bytes()
    }

    /// Derives the key shared with one peer address.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::NonContributory`] for low-order peer points.
    pub fn agree(&self, peer_public: &[u8; HANDSHAKE_KEY_LEN]) -> Result<SessionKey, CryptoError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer_public));
        SessionKey::from_shared_secret(&shared)
    }
}

impl std::fmt::Debug for StaticKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticKeypair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
