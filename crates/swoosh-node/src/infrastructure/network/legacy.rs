//! Legacy per-address UDP channel.
//!
//! The older transport keys encryption by peer address instead of by
//! session.  Each node has one long-lived [`StaticKeypair`]:
//!
//! - `connect(peer)` sends our 32-byte public key to the peer.
//! - A 32-byte datagram from an address with no established key is that
//!   peer's public key.  We derive the shared key, store it for the address,
//!   and, if we did not start the exchange, reply with our own public key.
//! - Every other datagram from an established address is one encrypted frame
//!   (`nonce ‖ ciphertext ‖ tag`, no length prefix).
//!
//! Frames that fail to parse or authenticate are dropped and logged; the key
//! stays in place.  Datagrams from unknown addresses that are not a public
//! key are ignored.
//!
//! Keys are never replaced.  A peer that restarts with a new static keypair
//! and resends its public key from the same address gets that datagram
//! treated as a frame, which fails authentication and is dropped.  Re-keying
//! needs a restart on this side too.
//!
//! This mode is exclusive with TCP sessions: a node runs one or the other.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use swoosh_core::protocol::frame::HANDSHAKE_KEY_LEN;
use swoosh_core::{CryptoError, EncryptedFrame, SessionCipher, StaticKeypair};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Default UDP port of the legacy channel.
pub const DEFAULT_LEGACY_PORT: u16 = 9997;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const ESTABLISH_POLL_INTERVAL: Duration = Duration::from_millis(20);
const RECV_BUF_LEN: usize = 2048;
const INBOUND_QUEUE_LEN: usize = 128;

/// Error type for the legacy channel.
#[derive(Debug, Error)]
pub enum LegacyChannelError {
    #[error("failed to bind legacy channel on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("no key established with {0}")]
    NoKey(SocketAddr),
    #[error("failed to seal frame: {0}")]
    Crypto(#[from] CryptoError),
    #[error("legacy channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A decrypted datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyMessage {
    pub from: SocketAddr,
    pub payload: Vec<u8>,
}

enum PeerKey {
    /// We sent our public key and wait for theirs.
    Pending,
    Established(SessionCipher),
}

/// The UDP socket plus the per-address key table.
pub struct LegacyChannel {
    socket: UdpSocket,
    keypair: StaticKeypair,
    peers: Mutex<HashMap<SocketAddr, PeerKey>>,
    inbound: mpsc::Sender<LegacyMessage>,
}

impl LegacyChannel {
    /// Binds `addr` with a freshly generated static keypair.
    pub async fn bind(
        addr: SocketAddr,
    ) -> Result<(Arc<Self>, mpsc::Receiver<LegacyMessage>), LegacyChannelError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| LegacyChannelError::BindFailed { addr, source })?;
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE_LEN);
        info!("legacy channel bound on UDP {addr}");
        let channel = Self {
            socket,
            keypair: StaticKeypair::generate(),
            peers: Mutex::new(HashMap::new()),
            inbound: tx,
        };
        Ok((Arc::new(channel), rx))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Starts a key exchange with `peer`.  No-op if a key already exists.
    pub async fn connect(&self, peer: SocketAddr) -> Result<(), LegacyChannelError> {
        {
            let mut peers = self.peers.lock().await;
            if matches!(peers.get(&peer), Some(PeerKey::Established(_))) {
                return Ok(());
            }
            peers.insert(peer, PeerKey::Pending);
        }
        self.socket
            .send_to(&self.keypair.public_bytes(), peer)
            .await?;
        debug!("sent legacy public key to {peer}");
        Ok(())
    }

    pub async fn is_established(&self, peer: SocketAddr) -> bool {
        matches!(
            self.peers.lock().await.get(&peer),
            Some(PeerKey::Established(_))
        )
    }

    /// Polls until the exchange with `peer` completes or `timeout` elapses.
    pub async fn wait_established(&self, peer: SocketAddr, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_established(peer).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(ESTABLISH_POLL_INTERVAL).await;
        }
    }

    /// Encrypts `plaintext` for `peer` and sends it as one datagram.
    ///
    /// # Errors
    ///
    /// [`LegacyChannelError::NoKey`] if the exchange with `peer` has not
    /// completed.
    pub async fn send(&self, peer: SocketAddr, plaintext: &[u8]) -> Result<(), LegacyChannelError> {
        let bytes = {
            let peers = self.peers.lock().await;
            match peers.get(&peer) {
                Some(PeerKey::Established(cipher)) => cipher.seal(plaintext)?.to_bytes(),
                _ => return Err(LegacyChannelError::NoKey(peer)),
            }
        };
        self.socket.send_to(&bytes, peer).await?;
        Ok(())
    }

    /// Receives datagrams until `running` clears.
    pub async fn run(self: Arc<Self>, running: Arc<AtomicBool>) {
        let mut buf = vec![0u8; RECV_BUF_LEN];
        while running.load(Ordering::Relaxed) {
            let (len, src) =
                match tokio::time::timeout(POLL_INTERVAL, self.socket.recv_from(&mut buf)).await {
                    Err(_elapsed) => continue,
                    Ok(Ok(pair)) => pair,
                    Ok(Err(e)) => {
                        warn!("legacy channel recv error: {e}");
                        continue;
                    }
                };
            self.handle_datagram(src, &buf[..len]).await;
        }
        info!("legacy channel stopped");
    }

    async fn handle_datagram(&self, src: SocketAddr, payload: &[u8]) {
        let mut peers = self.peers.lock().await;

        if let Some(PeerKey::Established(cipher)) = peers.get(&src) {
            let opened = EncryptedFrame::parse(payload)
                .map_err(|e| e.to_string())
                .and_then(|frame| cipher.open(&frame).map_err(|e| e.to_string()));
            drop(peers);
            match opened {
                Ok(plaintext) => {
                    let message = LegacyMessage {
                        from: src,
                        payload: plaintext,
                    };
                    if self.inbound.send(message).await.is_err() {
                        debug!("no consumer for legacy message from {src}");
                    }
                }
                Err(e) => warn!("dropping legacy datagram from {src}: {e}"),
            }
            return;
        }

        let Ok(peer_public) = <[u8; HANDSHAKE_KEY_LEN]>::try_from(payload) else {
            debug!("ignoring {}-byte datagram from {src} before key exchange", payload.len());
            return;
        };
        let initiated = matches!(peers.get(&src), Some(PeerKey::Pending));
        let key = match self.keypair.agree(&peer_public) {
            Ok(key) => key,
            Err(e) => {
                warn!("rejecting legacy public key from {src}: {e}");
                return;
            }
        };
        peers.insert(src, PeerKey::Established(SessionCipher::new(key)));
        drop(peers);
        info!("legacy key established with {src}");

        if !initiated {
            if let Err(e) = self.socket.send_to(&self.keypair.public_bytes(), src).await {
                warn!("failed to reply with legacy public key to {src}: {e}");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct Running {
        flag: Arc<AtomicBool>,
    }

    impl Drop for Running {
        fn drop(&mut self) {
            self.flag.store(false, Ordering::Relaxed);
        }
    }

    async fn start() -> (Arc<LegacyChannel>, mpsc::Receiver<LegacyMessage>, SocketAddr, Running) {
        let (channel, rx) = LegacyChannel::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = channel.local_addr().unwrap();
        let flag = Arc::new(AtomicBool::new(true));
        tokio::spawn(Arc::clone(&channel).run(flag.clone()));
        (channel, rx, addr, Running { flag })
    }

    async fn wait_established(channel: &LegacyChannel, peer: SocketAddr) -> bool {
        channel.wait_established(peer, Duration::from_secs(2)).await
    }

    #[tokio::test]
    async fn test_connect_establishes_keys_on_both_sides() {
        // Arrange
        let (a, _a_rx, a_addr, _ga) = start().await;
        let (b, _b_rx, b_addr, _gb) = start().await;

        // Act
        a.connect(b_addr).await.unwrap();

        // Assert
        assert!(wait_established(&b, a_addr).await, "responder must derive a key");
        assert!(wait_established(&a, b_addr).await, "initiator must derive a key");
    }

    #[tokio::test]
    async fn test_hello_is_delivered_after_exchange() {
        // Arrange
        let (a, _a_rx, a_addr, _ga) = start().await;
        let (b, mut b_rx, b_addr, _gb) = start().await;
        a.connect(b_addr).await.unwrap();
        assert!(wait_established(&a, b_addr).await);

        // Act
        a.send(b_addr, b"hello").await.unwrap();

        // Assert
        let msg = tokio::time::timeout(Duration::from_secs(2), b_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg, LegacyMessage { from: a_addr, payload: b"hello".to_vec() });
    }

    #[tokio::test]
    async fn test_send_without_key_fails() {
        let (a, _rx, _addr, _g) = start().await;
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();

        let result = a.send(peer, b"hi").await;

        assert!(matches!(result, Err(LegacyChannelError::NoKey(p)) if p == peer));
    }

    #[tokio::test]
    async fn test_tampered_datagram_is_dropped_and_key_kept() {
        // Arrange: a raw socket plays the peer and completes the exchange.
        let (a, mut a_rx, a_addr, _g) = start().await;
        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let raw_addr = raw.local_addr().unwrap();
        let raw_keys = StaticKeypair::generate();
        raw.send_to(&raw_keys.public_bytes(), a_addr).await.unwrap();
        let mut buf = [0u8; 64];
        let (n, _) = raw.recv_from(&mut buf).await.unwrap();
        let a_public: [u8; 32] = buf[..n].try_into().unwrap();
        let cipher = SessionCipher::new(raw_keys.agree(&a_public).unwrap());

        // Act
        let mut bad = cipher.seal(b"evil").unwrap().to_bytes();
        bad[14] ^= 0xFF;
        raw.send_to(&bad, a_addr).await.unwrap();
        raw.send_to(&cipher.seal(b"good").unwrap().to_bytes(), a_addr).await.unwrap();

        // Assert: only the authentic datagram arrives.
        let msg = tokio::time::timeout(Duration::from_secs(2), a_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload, b"good");
        assert_eq!(msg.from, raw_addr);
        assert!(a.is_established(raw_addr).await);
    }

    #[tokio::test]
    async fn test_new_public_key_from_established_peer_does_not_rekey() {
        // Arrange: establish a key with a raw peer.
        let (a, mut a_rx, a_addr, _g) = start().await;
        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let raw_keys = StaticKeypair::generate();
        raw.send_to(&raw_keys.public_bytes(), a_addr).await.unwrap();
        let mut buf = [0u8; 64];
        let (n, _) = raw.recv_from(&mut buf).await.unwrap();
        let a_public: [u8; 32] = buf[..n].try_into().unwrap();
        let cipher = SessionCipher::new(raw_keys.agree(&a_public).unwrap());

        // Act: the peer "restarts" and announces a fresh key.
        let restarted = StaticKeypair::generate();
        raw.send_to(&restarted.public_bytes(), a_addr).await.unwrap();
        raw.send_to(&cipher.seal(b"old key").unwrap().to_bytes(), a_addr).await.unwrap();

        // Assert: the original key still opens traffic; no reply was sent.
        let msg = tokio::time::timeout(Duration::from_secs(2), a_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload, b"old key");
        let silent = tokio::time::timeout(Duration::from_millis(100), raw.recv_from(&mut buf)).await;
        assert!(silent.is_err(), "no key reply for an established address");
        assert!(a.is_established(raw.local_addr().unwrap()).await);
    }

    #[tokio::test]
    async fn test_unknown_sender_non_key_datagram_is_ignored() {
        let (a, _rx, a_addr, _g) = start().await;
        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let raw_addr = raw.local_addr().unwrap();

        raw.send_to(b"not a key", a_addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!a.is_established(raw_addr).await);
    }
}
