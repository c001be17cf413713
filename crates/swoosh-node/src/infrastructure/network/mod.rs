//! Network infrastructure for the node.
//!
//! # Sub-modules
//!
//! - **`announcer`** – Periodically injects the link-layer discovery probe.
//!
//! - **`responder`** – Runs on a dedicated capture thread.  Answers each new
//!   prober with our 16-byte name over UDP and records it in the registry.
//!
//! - **`listener`** – Async UDP socket on the discovery port that records the
//!   names other nodes send back.
//!
//! - **`session_manager`** – TCP accept/connect plus the X25519 handshake that
//!   turns a connection into an active session.
//!
//! - **`transport`** – Length-prefixed encrypted frames over an established
//!   session; owns the per-session reader task.
//!
//! - **`legacy`** – The older per-address UDP channel.  Used instead of
//!   sessions when the node runs in legacy mode.

use std::net::SocketAddr;

use thiserror::Error;

pub mod announcer;
pub mod legacy;
pub mod listener;
pub mod responder;
pub mod session_manager;
pub mod transport;

/// Error type for discovery setup.
///
/// Failures during discovery *operation* (a bad frame, a failed send) are
/// logged and never surface here.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// The capture worker thread could not be started.
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[source] std::io::Error),
}
