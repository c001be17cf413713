//! Session table: every live encrypted channel, keyed by `(peer, session id)`.
//!
//! # Session lifecycle
//!
//! ```text
//! Handshaking ──► Active ──► Closed
//! ```
//!
//! - `Handshaking`: keys are being exchanged.  Such a session is never stored
//!   in the table, so a failed handshake leaves nothing behind.
//! - `Active`: the key is agreed; the session is inserted and frames flow.
//! - `Closed`: I/O error, decrypt failure, disconnect, or explicit close.
//!   The entry is removed and its id may never be handed out again while a
//!   handle to it still exists.
//!
//! One peer address may hold any number of sessions at once: inbound and
//! outbound connections are independent and are not deduplicated.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;
use uuid::Uuid;

use crate::crypto::cipher::SessionCipher;

/// A process-unique 128-bit session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Draws a random identifier.  Use [`SessionTable::allocate_id`] to get
    /// one that is guaranteed not to clash with a live session.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Active,
    Closed,
}

/// Errors from [`SessionTable`] mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionTableError {
    #[error("session {id} for {peer} is already registered")]
    Duplicate { peer: SocketAddr, id: SessionId },
    #[error("only active sessions can be registered, got {0:?}")]
    NotActive(SessionState),
}

/// One authenticated, encrypted channel.
///
/// The symmetric key lives inside the [`SessionCipher`] and never leaves it.
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    state: SessionState,
    created_at: SystemTime,
    cipher: Arc<SessionCipher>,
}

impl Session {
    /// Creates an `Active` session around a freshly agreed cipher.
    pub fn active(id: SessionId, peer: SocketAddr, cipher: SessionCipher) -> Self {
        Self {
            id,
            peer,
            state: SessionState::Active,
            created_at: SystemTime::now(),
            cipher: Arc::new(cipher),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// The cipher bound to this session's key.
    pub fn cipher(&self) -> Arc<SessionCipher> {
        Arc::clone(&self.cipher)
    }

    /// A key-free snapshot for display and diagnostics.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            peer: self.peer,
            state: self.state,
            created_at: self.created_at,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Snapshot of a session without its key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub peer: SocketAddr,
    pub state: SessionState,
    pub created_at: SystemTime,
}

/// All live sessions, keyed by `(peer address, session id)`.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<(SocketAddr, SessionId), Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an identifier not used by any session currently in the table.
    pub fn allocate_id(&self) -> SessionId {
        loop {
            let id = SessionId::random();
            if !self.contains_id(id) {
                return id;
            }
        }
    }

    /// Registers an active session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionTableError::NotActive`] for sessions in any other
    /// state and [`SessionTableError::Duplicate`] if the key is taken.
    pub fn insert(&mut self, session: Session) -> Result<(), SessionTableError> {
        if session.state != SessionState::Active {
            return Err(SessionTableError::NotActive(session.state));
        }
        let key = (session.peer, session.id);
        if self.sessions.contains_key(&key) {
            return Err(SessionTableError::Duplicate {
                peer: session.peer,
                id: session.id,
            });
        }
        self.sessions.insert(key, session);
        Ok(())
    }

    pub fn get(&self, peer: SocketAddr, id: SessionId) -> Option<&Session> {
        self.sessions.get(&(peer, id))
    }

    /// Removes a session and returns it marked `Closed`.
    pub fn close(&mut self, peer: SocketAddr, id: SessionId) -> Option<Session> {
        self.sessions.remove(&(peer, id)).map(|mut session| {
            session.state = SessionState::Closed;
            session
        })
    }

    pub fn contains_id(&self, id: SessionId) -> bool {
        self.sessions.keys().any(|(_, existing)| *existing == id)
    }

    /// Sessions to or from any port on `ip`.
    pub fn for_peer(&self, ip: IpAddr) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .sessions
            .values()
            .filter(|s| s.peer.ip() == ip)
            .map(Session::info)
            .collect();
        infos.sort_by_key(|i| i.created_at);
        infos
    }

    pub fn all(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self.sessions.values().map(Session::info).collect();
        infos.sort_by_key(|i| (i.peer, i.created_at));
        infos
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
