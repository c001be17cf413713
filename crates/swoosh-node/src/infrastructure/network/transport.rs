//! Encrypted frame transport over an established session.
//!
//! Wire format on the stream, after the handshake:
//! ```text
//! [len:2 BE][nonce:12][ciphertext:N][tag:16]
//! ```
//!
//! Each [`SecureSession`] owns one reader task.  The task reads a length
//! prefix, reads exactly that many bytes, authenticates and decrypts them, and
//! pushes the plaintext onto an inbound queue.  Any failure is fatal to the
//! session:
//!
//! - authentication failure ([`TransportError::Decrypt`]),
//! - an out-of-range length prefix ([`TransportError::Malformed`]),
//! - an I/O error or EOF.
//!
//! On failure the task marks the session `Closed`, removes it from the
//! [`SessionTable`], and pushes the error (if any) as the last queue item.
//! Tampered data is never delivered.
//!
//! Writes are serialised through a mutex so concurrent senders cannot
//! interleave two frames on the stream.

use std::net::SocketAddr;
use std::sync::Arc;

use swoosh_core::protocol::frame::{
    decode_length_prefix, EncryptedFrame, LENGTH_PREFIX_LEN, MAX_FRAME_LEN,
};
use swoosh_core::{CryptoError, ProtocolError, SessionCipher, SessionId, SessionState, SessionTable};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Error type for sending and receiving frames.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The session is no longer active.
    #[error("session is closed")]
    Closed,
    /// The plaintext could not be sealed (usually: too large for one frame).
    #[error("failed to seal frame: {0}")]
    Encrypt(#[source] CryptoError),
    /// A received frame failed authentication.  The session is closed.
    #[error("frame failed authentication, session closed: {0}")]
    Decrypt(#[source] CryptoError),
    /// A received length prefix or frame was out of range.  The session is closed.
    #[error("malformed frame, session closed: {0}")]
    Malformed(#[source] ProtocolError),
    /// An I/O error on the underlying connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared write side of a session.
struct Outbound {
    writer: Mutex<BoxedWriter>,
    cipher: Arc<SessionCipher>,
    state: watch::Receiver<SessionState>,
    shutdown: Arc<Notify>,
}

/// A cloneable handle that can send on a session from any task.
#[derive(Clone)]
pub struct SessionSender {
    id: SessionId,
    peer: SocketAddr,
    inner: Arc<Outbound>,
}

impl SessionSender {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Seals `plaintext` into one frame and writes it.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Closed`] if the session is not active.
    /// - [`TransportError::Encrypt`] if the plaintext does not fit a frame.
    /// - [`TransportError::Io`] if the write fails; the session is then closed.
    pub async fn send(&self, plaintext: &[u8]) -> Result<(), TransportError> {
        if *self.inner.state.borrow() != SessionState::Active {
            return Err(TransportError::Closed);
        }
        let frame = self
            .inner
            .cipher
            .seal(plaintext)
            .map_err(TransportError::Encrypt)?;
        let bytes = frame.to_prefixed_bytes();

        let mut writer = self.inner.writer.lock().await;
        let result = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            warn!(session = %self.id, peer = %self.peer, "write failed: {e}");
            self.inner.shutdown.notify_one();
            return Err(TransportError::Io(e));
        }
        Ok(())
    }
}

/// An active encrypted session with its inbound queue.
///
/// Dropping the handle closes the session.
pub struct SecureSession {
    sender: SessionSender,
    inbound: mpsc::Receiver<Result<Vec<u8>, TransportError>>,
    reader: Option<JoinHandle<()>>,
}

impl SecureSession {
    /// Splits `stream` and starts the reader task.
    ///
    /// The session must already be registered in `table` under
    /// `(peer, id)`; the reader removes it when the session ends.
    pub(crate) fn spawn<S>(
        id: SessionId,
        peer: SocketAddr,
        stream: S,
        cipher: Arc<SessionCipher>,
        table: Arc<Mutex<SessionTable>>,
        queue_len: usize,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (inbound_tx, inbound_rx) = mpsc::channel(queue_len);
        let (state_tx, state_rx) = watch::channel(SessionState::Active);
        let shutdown = Arc::new(Notify::new());

        let reader = ReaderTask {
            id,
            peer,
            cipher: Arc::clone(&cipher),
            table,
            inbound: inbound_tx,
            state: state_tx,
            shutdown: Arc::clone(&shutdown),
        };
        let handle = tokio::spawn(reader.run(read_half));

        let outbound = Outbound {
            writer: Mutex::new(Box::new(write_half)),
            cipher,
            state: state_rx,
            shutdown,
        };
        Self {
            sender: SessionSender {
                id,
                peer,
                inner: Arc::new(outbound),
            },
            inbound: inbound_rx,
            reader: Some(handle),
        }
    }

    pub fn id(&self) -> SessionId {
        self.sender.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.sender.peer
    }

    pub fn state(&self) -> SessionState {
        *self.sender.inner.state.borrow()
    }

    /// A handle for sending from other tasks.
    pub fn sender(&self) -> SessionSender {
        self.sender.clone()
    }

    /// See [`SessionSender::send`].
    pub async fn send(&self, plaintext: &[u8]) -> Result<(), TransportError> {
        self.sender.send(plaintext).await
    }

    /// Waits for the next inbound message.
    ///
    /// Returns `None` once the session has closed and every queued message
    /// has been taken.  If the session ended because of an error, that error
    /// is the last `Some` item.
    pub async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        self.inbound.recv().await
    }

    /// Closes the session and waits for its reader to finish.
    ///
    /// Any task blocked in [`recv`](Self::recv) on this session wakes up with
    /// `None`.
    pub async fn close(mut self) {
        self.sender.inner.shutdown.notify_one();
        if let Some(handle) = self.reader.take() {
            let _ = handle.await;
        }
        let mut writer = self.sender.inner.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl Drop for SecureSession {
    fn drop(&mut self) {
        self.sender.inner.shutdown.notify_one();
    }
}

impl std::fmt::Debug for SecureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("id", &self.id())
            .field("peer", &self.peer())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct ReaderTask {
    id: SessionId,
    peer: SocketAddr,
    cipher: Arc<SessionCipher>,
    table: Arc<Mutex<SessionTable>>,
    inbound: mpsc::Sender<Result<Vec<u8>, TransportError>>,
    state: watch::Sender<SessionState>,
    shutdown: Arc<Notify>,
}

impl ReaderTask {
    async fn run<R: AsyncRead + Unpin>(self, mut reader: R) {
        let failure = loop {
            tokio::select! {
                _ = self.shutdown.notified() => break None,
                next = read_frame(&mut reader) => match next {
                    Ok(Some(frame)) => match self.cipher.open(&frame) {
                        Ok(plaintext) => {
                            debug!(session = %self.id, len = plaintext.len(), "frame received");
                            // A full queue must not hold off shutdown.
                            tokio::select! {
                                _ = self.shutdown.notified() => break None,
                                pushed = self.inbound.send(Ok(plaintext)) => {
                                    if pushed.is_err() {
                                        break None;
                                    }
                                }
                            }
                        }
                        Err(e) => break Some(TransportError::Decrypt(e)),
                    },
                    Ok(None) => break None,
                    Err(e) => break Some(e),
                },
            }
        };

        self.state.send_replace(SessionState::Closed);
        self.table.lock().await.close(self.peer, self.id);

        match failure {
            Some(e) => {
                warn!(session = %self.id, peer = %self.peer, "session closed: {e}");
                let _ = self.inbound.send(Err(e)).await;
            }
            None => info!(session = %self.id, peer = %self.peer, "session closed"),
        }
    }
}

/// Reads one length-prefixed frame.
///
/// Returns `Ok(None)` on a clean end of stream before a prefix.  A stream
/// that ends anywhere inside a frame, prefix included, is an
/// [`TransportError::Io`] error.
pub(crate) async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<EncryptedFrame>, TransportError> {
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    let filled = reader.read(&mut prefix).await?;
    if filled == 0 {
        return Ok(None);
    }
    if filled < LENGTH_PREFIX_LEN {
        reader.read_exact(&mut prefix[filled..]).await?;
    }
    let len = decode_length_prefix(prefix).map_err(TransportError::Malformed)?;

    let mut buf = [0u8; MAX_FRAME_LEN];
    reader.read_exact(&mut buf[..len]).await?;
    EncryptedFrame::parse(&buf[..len])
        .map(Some)
        .map_err(TransportError::Malformed)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
