//! Peer registry: every address seen during discovery and the name it declared.
//!
//! The registry is written from two scheduling domains: the capture worker
//! thread (when it answers a probe) and the async discovery listener (when an
//! identity response arrives).  [`SharedPeerRegistry`] wraps the plain
//! [`PeerRegistry`] in a `std::sync::Mutex` that is held only for a single
//! read-modify-write.  No I/O ever happens under the lock, so a blocking mutex
//! is safe to take from async code too.
//!
//! Entries are never removed.  A peer that leaves the network stays listed
//! with its last `last_seen` timestamp.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

/// How a peer became known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    /// We saw its probe and answered it; it has not told us its name yet.
    Announced,
    /// It sent us an identity response carrying its name.
    Responded,
}

/// One discovered peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub address: IpAddr,
    /// Declared display name; `None` until an identity response arrives.
    pub name: Option<String>,
    pub last_seen: SystemTime,
    pub state: DiscoveryState,
}

/// In-memory table of discovered peers keyed by address.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<IpAddr, PeerRecord>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the name a peer declared.  Last writer wins.
    ///
    /// Returns `true` if the address was not known before.
    pub fn record_response(&mut self, address: IpAddr, name: String, seen: SystemTime) -> bool {
        let previous = self.peers.insert(
            address,
            PeerRecord {
                address,
                name: Some(name),
                last_seen: seen,
                state: DiscoveryState::Responded,
            },
        );
        previous.is_none()
    }

    /// Records a peer whose probe we answered.
    ///
    /// Inserts an [`DiscoveryState::Announced`] entry if the address is
    /// unknown and returns `true`.  A known address is left untouched apart
    /// from its `last_seen` timestamp, and `false` is returned.
    pub fn record_probe(&mut self, address: IpAddr, seen: SystemTime) -> bool {
        match self.peers.get_mut(&address) {
            Some(existing) => {
                existing.last_seen = seen;
                false
            }
            None => {
                self.peers.insert(
                    address,
                    PeerRecord {
                        address,
                        name: None,
                        last_seen: seen,
                        state: DiscoveryState::Announced,
                    },
                );
                true
            }
        }
    }

    pub fn contains(&self, address: &IpAddr) -> bool {
        self.peers.contains_key(address)
    }

    pub fn get(&self, address: &IpAddr) -> Option<&PeerRecord> {
        self.peers.get(address)
    }

    /// Returns every record, sorted by address for stable display.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        let mut records: Vec<PeerRecord> = self.peers.values().cloned().collect();
        records.sort_by_key(|r| r.address);
        records
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// A [`PeerRegistry`] shared between the capture thread and the async runtime.
///
/// Cloning is cheap and every clone refers to the same table.
#[derive(Debug, Clone, Default)]
pub struct SharedPeerRegistry {
    inner: Arc<Mutex<PeerRegistry>>,
}

impl SharedPeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PeerRegistry> {
        // Each mutation is a single insert or field store, so a poisoned
        // guard still holds whole records.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// See [`PeerRegistry::record_response`].
    pub fn record_response(&self, address: IpAddr, name: String) -> bool {
        self.lock().record_response(address, name, SystemTime::now())
    }

    /// Atomically checks for `address` and records it as announced.
    ///
    /// Returns `true` when the address was unknown, meaning the caller should
    /// send an identity response.
    pub fn claim_probe(&self, address: IpAddr) -> bool {
        self.lock().record_probe(address, SystemTime::now())
    }

    pub fn contains(&self, address: &IpAddr) -> bool {
        self.lock().contains(address)
    }

    pub fn get(&self, address: &IpAddr) -> Option<PeerRecord> {
        self.lock().get(address).cloned()
    }

    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.lock().snapshot()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
