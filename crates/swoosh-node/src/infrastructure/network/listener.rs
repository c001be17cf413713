//! Async listener for identity responses.
//!
//! Every node that answers our probe sends its 16-byte name to our discovery
//! port.  The listener decodes it and records `source address -> name` in the
//! shared registry.  Anything that is not a valid 16-byte ASCII name is
//! dropped with a debug log.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use swoosh_core::{decode_name, SharedPeerRegistry};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use super::DiscoveryError;

/// How often the receive loop wakes to check the `running` flag.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Receive buffer; larger than any valid payload so oversized datagrams are
/// seen whole and rejected.
const RECV_BUF_LEN: usize = 512;

/// UDP receiver for identity responses.
pub struct DiscoveryListener {
    socket: UdpSocket,
    registry: SharedPeerRegistry,
}

impl DiscoveryListener {
    /// Binds the discovery port.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::BindFailed`] if `addr` is unavailable.
    pub async fn bind(addr: SocketAddr, registry: SharedPeerRegistry) -> Result<Self, DiscoveryError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| DiscoveryError::BindFailed { addr, source })?;
        info!("discovery listener bound on UDP {addr}");
        Ok(Self { socket, registry })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receives identity responses until `running` is cleared.
    pub async fn run(self, running: Arc<AtomicBool>) {
        let mut buf = [0u8; RECV_BUF_LEN];
        while running.load(Ordering::Relaxed) {
            let (len, src) =
                match tokio::time::timeout(POLL_INTERVAL, self.socket.recv_from(&mut buf)).await {
                    Err(_elapsed) => continue,
                    Ok(Ok(pair)) => pair,
                    Ok(Err(e)) => {
                        warn!("discovery recv error: {e}");
                        continue;
                    }
                };
            self.handle_datagram(&buf[..len], src);
        }
        info!("discovery listener stopped");
    }

    fn handle_datagram(&self, payload: &[u8], src: SocketAddr) {
        match decode_name(payload) {
            Ok(name) => {
                if self.registry.record_response(src.ip(), name.clone()) {
                    info!(peer = %src.ip(), %name, "discovered peer");
                } else {
                    debug!(peer = %src.ip(), %name, "refreshed peer");
                }
            }
            Err(e) => debug!("ignoring discovery datagram from {src}: {e}"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
