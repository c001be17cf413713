//! Encrypted application frame.
//!
//! Wire format:
//! ```text
//! [nonce:12][ciphertext:N][tag:16]
//! ```
//!
//! The whole frame is bounded by [`MAX_FRAME_LEN`] (1024 bytes), so a single
//! frame carries at most [`MAX_PLAINTEXT_LEN`] bytes of plaintext.  Larger
//! payloads need a segmentation layer above this one.
//!
//! On a TCP session every frame is preceded by a 2-byte big-endian length so
//! the reader can recover frame boundaries from the byte stream.  The legacy
//! UDP channel relies on datagram boundaries and sends the bare frame.
//!
//! An `EncryptedFrame` can be *parsed* from received bytes by anyone, but it
//! can only be *built* for sending by [`crate::SessionCipher::seal`], which
//! draws the nonce itself.  There is no API that accepts a caller nonce.

use super::ProtocolError;

/// Length of the AES-GCM nonce prefix.
pub const NONCE_LEN: usize = 12;

/// Length of the AES-GCM authentication tag.
pub const TAG_LEN: usize = 16;

/// Upper bound on one encrypted frame, nonce and tag included.
pub const MAX_FRAME_LEN: usize = 1024;

/// Smallest valid frame: nonce plus tag around an empty plaintext.
pub const MIN_FRAME_LEN: usize = NONCE_LEN + TAG_LEN;

/// Largest plaintext that fits in one frame.
pub const MAX_PLAINTEXT_LEN: usize = MAX_FRAME_LEN - MIN_FRAME_LEN;

/// Size of the stream length prefix used on TCP sessions.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Length of a raw X25519 public key exchanged during the handshake.
pub const HANDSHAKE_KEY_LEN: usize = 32;

/// One sealed application message.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedFrame {
    nonce: [u8; NONCE_LEN],
    /// Ciphertext with the tag appended.
    sealed: Vec<u8>,
}

impl EncryptedFrame {
    pub(crate) fn from_sealed(nonce: [u8; NONCE_LEN], sealed: Vec<u8>) -> Self {
        Self { nonce, sealed }
    }

    /// Splits received bytes into nonce and ciphertext-with-tag.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InsufficientData`] for frames shorter than
    /// [`MIN_FRAME_LEN`] and [`ProtocolError::Oversized`] for frames longer
    /// than [`MAX_FRAME_LEN`].
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        check_frame_len(bytes.len())?;
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[..NONCE_LEN]);
        Ok(Self {
            nonce,
            sealed: bytes[NONCE_LEN..].to_vec(),
        })
    }

    /// The nonce this frame was sealed with.
    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    /// Ciphertext followed by the authentication tag.
    pub fn sealed(&self) -> &[u8] {
        &self.sealed
    }

    /// Total encoded length.
    pub fn len(&self) -> usize {
        NONCE_LEN + self.sealed.len()
    }

    /// Always `false`: a frame holds at least a nonce and a tag.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Encodes as `nonce ‖ ciphertext ‖ tag`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.len());
        buf.extend_from_slice(&self.nonce);
        buf.extend_from_slice(&self.sealed);
        buf
    }

    /// Encodes with the 2-byte big-endian length prefix used on TCP sessions.
    pub fn to_prefixed_bytes(&self) -> Vec<u8> {
        let len = self.len() as u16;
        let mut buf = Vec::with_capacity(LENGTH_PREFIX_LEN + self.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&self.nonce);
        buf.extend_from_slice(&self.sealed);
        buf
    }
}

impl std::fmt::Debug for EncryptedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFrame")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// Decodes a TCP length prefix and validates the announced frame size.
///
/// # Errors
///
/// Returns the same errors as [`EncryptedFrame::parse`] for a length outside
/// `MIN_FRAME_LEN..=MAX_FRAME_LEN`.
pub fn decode_length_prefix(prefix: [u8; LENGTH_PREFIX_LEN]) -> Result<usize, ProtocolError> {
    let len = u16::from_be_bytes(prefix) as usize;
    check_frame_len(len)?;
    Ok(len)
}

fn check_frame_len(len: usize) -> Result<(), ProtocolError> {
    if len < MIN_FRAME_LEN {
        return Err(ProtocolError::InsufficientData {
            needed: MIN_FRAME_LEN,
            available: len,
        });
    }
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::Oversized {
            max: MAX_FRAME_LEN,
            actual: len,
        });
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
