//! Link-layer capture and injection for the discovery probe.
//!
//! Raw frame capture is a blocking primitive: the OS hands frames to one
//! reader that waits on a socket.  The responder therefore drives a
//! [`FrameCapture`] from a dedicated worker thread, while the announcer only
//! needs the cheap, non-blocking [`FrameSender`] side.
//!
//! # Testability
//!
//! Both halves are traits.  Production code opens them on a real interface
//! through [`datalink::open_channel`]; tests use [`mock`] to inject frames and
//! record what was sent.

use std::net::Ipv4Addr;

use swoosh_core::protocol::discovery::MacAddr;
use thiserror::Error;

pub mod datalink;
pub mod mock;

/// The interface this node runs on: its name, first IPv4 address and MAC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInterface {
    pub name: String,
    pub ipv4: Ipv4Addr,
    pub mac: MacAddr,
}

/// Error type for capture and interface operations.
///
/// Everything except [`CaptureError::Recv`] and [`CaptureError::Send`] means
/// the environment cannot support discovery at all.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("network interface {0:?} not found")]
    InterfaceNotFound(String),
    #[error("network interface {0:?} has no IPv4 address")]
    NoIpv4Address(String),
    #[error("network interface {0:?} has no hardware address")]
    NoMacAddress(String),
    #[error("failed to open capture channel on {interface}: {source}")]
    OpenFailed {
        interface: String,
        #[source]
        source: std::io::Error,
    },
    #[error("interface {0:?} does not provide an Ethernet channel")]
    UnsupportedChannel(String),
    #[error("failed to send frame: {0}")]
    Send(#[source] std::io::Error),
    #[error("failed to receive frame: {0}")]
    Recv(#[source] std::io::Error),
    #[error("capture source closed")]
    Closed,
}

/// Blocking source of captured link-layer frames.
pub trait FrameCapture: Send {
    /// Blocks until the next frame arrives or the read timeout elapses.
    ///
    /// Returns `Ok(None)` on timeout so the caller can check for shutdown.
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CaptureError>;
}

/// Injects link-layer frames onto the wire.
#[cfg_attr(test, mockall::automock)]
pub trait FrameSender: Send + Sync {
    /// Sends one complete frame.  Fire-and-forget: success only means the
    /// frame was handed to the OS.
    fn send_frame(&self, frame: &[u8]) -> Result<(), CaptureError>;
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
pub(crate) fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
