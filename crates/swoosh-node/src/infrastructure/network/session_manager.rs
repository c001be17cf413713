//! TCP session establishment: accept/connect plus the X25519 handshake.
//!
//! # Handshake
//!
//! Both sides act identically:
//!
//! 1. Generate a fresh ephemeral X25519 keypair.
//! 2. Write the 32-byte public key.
//! 3. Read exactly 32 bytes: the peer's public key.
//! 4. Compute the shared secret.  Its 32 bytes are the session key.
//!
//! The ephemeral secret is consumed by step 4 and never stored.  A session is
//! added to the [`SessionTable`] only after step 4 succeeds, so a failed
//! handshake (short read, timeout, I/O error, weak public key) leaves no
//! entry.  The connection is dropped and the error returned to the caller.
//!
//! No step authenticates the peer.  An active man-in-the-middle can run the
//! handshake with both ends.
//!
//! # Concurrency
//!
//! Every accepted connection is handshaken on its own task, so a slow peer
//! never holds up another.  Sessions to the same peer address are fully
//! independent.

use std::net::{IpAddr, SocketAddr};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use swoosh_core::protocol::frame::HANDSHAKE_KEY_LEN;
use swoosh_core::{
    CryptoError, EphemeralKeypair, Session, SessionCipher, SessionInfo, SessionKey, SessionTable,
    SessionTableError,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::transport::SecureSession;

/// Default TCP port for session connections.
pub const DEFAULT_SESSION_PORT: u16 = 9998;

/// How often the accept loop wakes to check the `running` flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Error type for establishing a session.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// TCP connect to the peer failed.
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// The session listener could not be bound.
    #[error("failed to bind session listener on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// Writing our public key failed.
    #[error("failed to send public key: {0}")]
    SendKey(#[source] std::io::Error),
    /// Reading the peer's public key failed.
    #[error("failed to read peer public key: {0}")]
    ReadKey(#[source] std::io::Error),
    /// The peer closed the connection before sending a whole key.
    #[error("peer closed the connection after {received} of 32 public key bytes")]
    ShortKey { received: usize },
    /// The handshake did not finish in time.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),
    /// Key agreement rejected the peer's public key.
    #[error("key agreement failed: {0}")]
    KeyAgreement(#[from] CryptoError),
    /// The session could not be registered.
    #[error("session registration failed: {0}")]
    Table(#[from] SessionTableError),
}

/// Runs the symmetric handshake on `stream` and returns the session key.
///
/// # Errors
///
/// See [`HandshakeError`].  On error nothing about the attempt is retained.
pub async fn perform_handshake<S>(stream: &mut S) -> Result<SessionKey, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let keypair = EphemeralKeypair::generate();
    stream
        .write_all(&keypair.public_bytes())
        .await
        .map_err(HandshakeError::SendKey)?;
    stream.flush().await.map_err(HandshakeError::SendKey)?;

    let peer_public = read_peer_key(stream).await?;
    Ok(keypair.agree(&peer_public)?)
}

async fn read_peer_key<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<[u8; HANDSHAKE_KEY_LEN], HandshakeError> {
    let mut key = [0u8; HANDSHAKE_KEY_LEN];
    let mut filled = 0;
    while filled < HANDSHAKE_KEY_LEN {
        let n = reader
            .read(&mut key[filled..])
            .await
            .map_err(HandshakeError::ReadKey)?;
        if n == 0 {
            return Err(HandshakeError::ShortKey { received: filled });
        }
        filled += n;
    }
    Ok(key)
}

/// Settings for the session layer.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Address the listener binds.
    pub bind_address: IpAddr,
    /// TCP port for both listening and connecting.
    pub port: u16,
    /// Upper bound on a single handshake.
    pub handshake_timeout: Duration,
    /// Inbound messages buffered per session before the reader waits.
    pub inbound_queue_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_SESSION_PORT,
            handshake_timeout: Duration::from_secs(10),
            inbound_queue_len: 64,
        }
    }
}

/// Creates sessions and owns the table they are registered in.
pub struct SessionManager {
    config: SessionConfig,
    table: Arc<Mutex<SessionTable>>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            table: Arc::new(Mutex::new(SessionTable::new())),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Binds the session listener on the configured address and port.
    pub async fn bind(&self) -> Result<TcpListener, HandshakeError> {
        let addr = SocketAddr::new(self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| HandshakeError::BindFailed { addr, source })?;
        info!("session listener bound on TCP {addr}");
        Ok(listener)
    }

    /// Opens a session to `peer` on the configured session port.
    pub async fn connect(&self, peer: IpAddr) -> Result<SecureSession, HandshakeError> {
        self.connect_addr(SocketAddr::new(peer, self.config.port)).await
    }

    /// Opens a session to an explicit address.
    pub async fn connect_addr(&self, addr: SocketAddr) -> Result<SecureSession, HandshakeError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| HandshakeError::ConnectFailed { addr, source })?;
        stream.set_nodelay(true).ok();
        debug!("connected to {addr}, starting handshake");
        self.establish(stream, addr).await
    }

    /// Runs the handshake on an already connected stream and registers the
    /// resulting session.
    pub async fn establish<S>(&self, mut stream: S, peer: SocketAddr) -> Result<SecureSession, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let timeout = self.config.handshake_timeout;
        let key = tokio::time::timeout(timeout, perform_handshake(&mut stream))
            .await
            .map_err(|_| HandshakeError::Timeout(timeout))??;

        let (id, cipher) = {
            let mut table = self.table.lock().await;
            let id = table.allocate_id();
            let session = Session::active(id, peer, SessionCipher::new(key));
            let cipher = session.cipher();
            table.insert(session)?;
            (id, cipher)
        };
        info!(session = %id, %peer, "session established");

        Ok(SecureSession::spawn(
            id,
            peer,
            stream,
            cipher,
            Arc::clone(&self.table),
            self.config.inbound_queue_len,
        ))
    }

    /// Accepts connections until `running` clears, handing each established
    /// session to `accepted`.
    ///
    /// Handshake failures are logged and never stop the loop.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        accepted: mpsc::Sender<SecureSession>,
        running: Arc<AtomicBool>,
    ) {
        while running.load(Ordering::Relaxed) {
            let (stream, peer) =
                match tokio::time::timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                    Err(_elapsed) => continue,
                    Ok(Ok(pair)) => pair,
                    Ok(Err(e)) => {
                        warn!("accept error: {e}");
                        continue;
                    }
                };
            stream.set_nodelay(true).ok();
            debug!("accepted connection from {peer}");

            let manager = Arc::clone(&self);
            let accepted = accepted.clone();
            tokio::spawn(async move {
                match manager.establish(stream, peer).await {
                    Ok(session) => {
                        if accepted.send(session).await.is_err() {
                            debug!("no consumer for inbound session from {peer}");
                        }
                    }
                    Err(e) => warn!("handshake with {peer} failed: {e}"),
                }
            });
        }
        info!("session listener stopped");
    }

    /// Snapshot of every active session.
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.table.lock().await.all()
    }

    /// Active sessions with any port on `peer`.
    pub async fn sessions_for(&self, peer: IpAddr) -> Vec<SessionInfo> {
        self.table.lock().await.for_peer(peer)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use swoosh_core::SessionState;

    fn manager() -> Arc<SessionManager> {
        Arc::new(SessionManager::new(SessionConfig {
            handshake_timeout: Duration::from_secs(2),
            ..SessionConfig::default()
        }))
    }

    #[test]
    fn test_session_config_default_uses_port_9998() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.port, 9998);
        assert_eq!(cfg.bind_address, IpAddr::from([0, 0, 0, 0]));
    }

    #[tokio::test]
    async fn test_both_sides_derive_the_same_key() {
        // Arrange
        let (mut a, mut b) = tokio::io::duplex(256);

        // Act
        let (ka, kb) = tokio::join!(perform_handshake(&mut a), perform_handshake(&mut b));

        // Assert
        assert_eq!(ka.unwrap().as_bytes(), kb.unwrap().as_bytes());
    }

    #[tokio::test]
    async fn test_each_handshake_yields_a_fresh_key() {
        let (mut a1, mut b1) = tokio::io::duplex(256);
        let (mut a2, mut b2) = tokio::io::duplex(256);

        let (k1, _) = tokio::join!(perform_handshake(&mut a1), perform_handshake(&mut b1));
        let (k2, _) = tokio::join!(perform_handshake(&mut a2), perform_handshake(&mut b2));

        assert_ne!(k1.unwrap().as_bytes(), k2.unwrap().as_bytes());
    }

    #[tokio::test]
    async fn test_short_key_reports_bytes_received() {
        // Arrange: the peer sends 10 bytes then closes its write side.
        let (mut ours, mut theirs) = tokio::io::duplex(256);
        theirs.write_all(&[7u8; 10]).await.unwrap();
        theirs.shutdown().await.unwrap();

        // Act
        let result = perform_handshake(&mut ours).await;

        // Assert
        assert!(matches!(result, Err(HandshakeError::ShortKey { received: 10 })));
    }

    #[tokio::test]
    async fn test_all_zero_public_key_is_rejected() {
        let (mut ours, mut theirs) = tokio::io::duplex(256);
        theirs.write_all(&[0u8; 32]).await.unwrap();

        let result = perform_handshake(&mut ours).await;

        assert!(matches!(result, Err(HandshakeError::KeyAgreement(CryptoError::NonContributory))));
    }

    #[tokio::test]
    async fn test_failed_handshake_leaves_no_table_entry() {
        // Arrange
        let mgr = manager();
        let (ours, mut theirs) = tokio::io::duplex(256);
        theirs.write_all(&[1u8; 5]).await.unwrap();
        theirs.shutdown().await.unwrap();

        // Act
        let result = mgr.establish(ours, "10.0.0.9:9998".parse().unwrap()).await;

        // Assert
        assert!(result.is_err());
        assert!(mgr.sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let mgr = Arc::new(SessionManager::new(SessionConfig {
            handshake_timeout: Duration::from_millis(100),
            ..SessionConfig::default()
        }));
        let (ours, _theirs) = tokio::io::duplex(256);

        let result = mgr.establish(ours, "10.0.0.9:9998".parse().unwrap()).await;

        assert!(matches!(result, Err(HandshakeError::Timeout(_))));
        assert!(mgr.sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_establish_registers_active_session() {
        let mgr = manager();
        let (ours, mut theirs) = tokio::io::duplex(256);
        let peer: SocketAddr = "10.0.0.9:9998".parse().unwrap();
        let remote = tokio::spawn(async move { perform_handshake(&mut theirs).await.map(|_| theirs) });

        let session = mgr.establish(ours, peer).await.unwrap();
        let _theirs = remote.await.unwrap().unwrap();

        let infos = mgr.sessions().await;
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].id, session.id());
        assert_eq!(infos[0].peer, peer);
        assert_eq!(infos[0].state, SessionState::Active);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_with_same_peer_are_independent() {
        // Arrange
        let mgr = manager();
        let peer: SocketAddr = "10.0.0.9:9998".parse().unwrap();
        let mut sessions = Vec::new();
        let mut remotes = Vec::new();

        // Act
        for _ in 0..3 {
            let (ours, mut theirs) = tokio::io::duplex(256);
            let remote = tokio::spawn(async move { perform_handshake(&mut theirs).await.map(|_| theirs) });
            sessions.push(mgr.establish(ours, peer).await.unwrap());
            remotes.push(remote.await.unwrap().unwrap());
        }

        // Assert
        assert_eq!(mgr.sessions_for(peer.ip()).await.len(), 3);
        let closing = sessions.remove(0);
        closing.close().await;
        assert_eq!(mgr.sessions_for(peer.ip()).await.len(), 2);
        for s in &sessions {
            assert_eq!(s.state(), SessionState::Active);
        }
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let mgr = manager();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = mgr.connect_addr(addr).await;

        assert!(matches!(result, Err(HandshakeError::ConnectFailed { .. })));
    }

    #[tokio::test]
    async fn test_connect_and_serve_exchange_a_message() {
        // Arrange
        let server = manager();
        let client = manager();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let (tx, mut accepted) = mpsc::channel(4);
        let serve = tokio::spawn(Arc::clone(&server).serve(listener, tx, running.clone()));

        // Act
        let outbound = client.connect_addr(addr).await.unwrap();
        let mut inbound = accepted.recv().await.expect("accepted session");
        outbound.send(b"hello").await.unwrap();

        // Assert
        assert_eq!(inbound.recv().await.unwrap().unwrap(), b"hello");
        assert_eq!(server.sessions().await.len(), 1);
        assert_eq!(client.sessions().await.len(), 1);

        running.store(false, Ordering::Relaxed);
        serve.await.unwrap();
    }
}
