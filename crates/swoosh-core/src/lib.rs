//! # swoosh-core
//!
//! Shared library for Swoosh LAN peering: the discovery and frame wire
//! formats, ephemeral key agreement, the per-session frame cipher, and the
//! in-memory tables that track discovered peers and live sessions.
//!
//! It has zero dependencies on OS APIs or network sockets.  Everything that
//! touches an interface, a socket or a thread lives in `swoosh-node`.
//!
//! # Architecture overview
//!
//! - **`protocol`** – How bytes travel over the network: the 16-byte identity
//!   payload, the link-layer discovery probe, and the encrypted frame
//!   (`nonce[12] ‖ ciphertext ‖ tag`).
//!
//! - **`crypto`** – X25519 ephemeral keypairs, the 32-byte session key taken
//!   from the shared secret, and [`SessionCipher`], the only place an
//!   [`EncryptedFrame`] is ever produced.
//!
//! - **`domain`** – The [`PeerRegistry`] of discovered addresses and the
//!   [`SessionTable`] keyed by `(peer address, session id)`.

pub mod crypto;
pub mod domain;
pub mod protocol;

pub use crypto::{
    cipher::SessionCipher,
    keys::{EphemeralKeypair, SessionKey, StaticKeypair},
    CryptoError,
};
pub use domain::{
    peer::{DiscoveryState, PeerRecord, PeerRegistry, SharedPeerRegistry},
    session::{Session, SessionId, SessionInfo, SessionState, SessionTable, SessionTableError},
};
pub use protocol::{
    discovery::{decode_name, encode_name, parse_probe, DiscoveryProbe},
    frame::EncryptedFrame,
    ProtocolError,
};
