//! Known peers and their endpoints.

use crate::error::DiscoveryError;
use crate::node_id::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

/// Default peer book capacity
pub const DEFAULT_CAPACITY: usize = 1024;

/// Consecutive failures after which a peer is dropped
const MAX_FAILURES: u32 = 3;

/// Address of a remote node
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerHandle {
    /// Node identifier
    pub id: NodeId,
    /// Listening address
    pub addr: SocketAddr,
}

impl PeerHandle {
    /// Create a new handle
    #[must_use]
    pub const fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Peer({}@{})", self.id, self.addr)
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

#[derive(Debug, Clone)]
struct PeerEntry {
    handle: PeerHandle,
    last_seen: Instant,
    failures: u32,
}

/// Set of known peers, excluding the local node
#[derive(Debug)]
pub struct PeerBook {
    local_id: NodeId,
    capacity: usize,
    peers: HashMap<NodeId, PeerEntry>,
}

impl PeerBook {
    /// Create an empty book for `local_id`
    #[must_use]
    pub fn new(local_id: NodeId) -> Self {
        Self::with_capacity(local_id, DEFAULT_CAPACITY)
    }

    /// Create an empty book with a custom capacity
    #[must_use]
    pub fn with_capacity(local_id: NodeId, capacity: usize) -> Self {
        Self {
            local_id,
            capacity: capacity.max(1),
            peers: HashMap::new(),
        }
    }

    /// Local node id
    #[must_use]
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Insert or refresh a peer
    ///
    /// Returns `true` if the peer was new. When full, the least recently
    /// seen peer is evicted.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::SelfPeer`] for the local id.
    pub fn insert(&mut self, handle: PeerHandle) -> Result<bool, DiscoveryError> {
        if handle.id == self.local_id {
            return Err(DiscoveryError::SelfPeer);
        }

        let now = Instant::now();
        if let Some(entry) = self.peers.get_mut(&handle.id) {
            if entry.handle.addr != handle.addr {
                tracing::debug!(peer = %handle.id, old = %entry.handle.addr, new = %handle.addr, "peer address changed");
            }
            entry.handle = handle;
            entry.last_seen = now;
            entry.failures = 0;
            return Ok(false);
        }

        if self.peers.len() >= self.capacity {
            let oldest = self
                .peers
                .values()
                .min_by_key(|e| e.last_seen)
                .map(|e| e.handle.id)
                .ok_or(DiscoveryError::PeerBookFull(self.capacity))?;
            self.peers.remove(&oldest);
            tracing::debug!(evicted = %oldest, "peer book full, evicted stalest peer");
        }

        self.peers.insert(
            handle.id,
            PeerEntry {
                handle,
                last_seen: now,
                failures: 0,
            },
        );
        Ok(true)
    }

    /// Mark a peer as responsive
    pub fn mark_seen(&mut self, id: &NodeId) {
        if let Some(entry) = self.peers.get_mut(id) {
            entry.last_seen = Instant::now();
            entry.failures = 0;
        }
    }

    /// Record a failed exchange; the peer is dropped after repeated failures
    ///
    /// Returns `true` if the peer was removed.
    pub fn mark_failed(&mut self, id: &NodeId) -> bool {
        let Some(entry) = self.peers.get_mut(id) else {
            return false;
        };
        entry.failures += 1;
        if entry.failures >= MAX_FAILURES {
            self.peers.remove(id);
            tracing::debug!(peer = %id, "dropping unresponsive peer");
            return true;
        }
        false
    }

    /// Remove a peer
    pub fn remove(&mut self, id: &NodeId) -> Option<PeerHandle> {
        self.peers.remove(id).map(|e| e.handle)
    }

    /// Look up a peer
    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<PeerHandle> {
        self.peers.get(id).map(|e| e.handle)
    }

    /// The `k` peers closest to `target` by XOR distance, nearest first
    #[must_use]
    pub fn closest(&self, target: &NodeId, k: usize) -> Vec<PeerHandle> {
        let mut handles: Vec<PeerHandle> = self.peers.values().map(|e| e.handle).collect();
        handles.sort_by_key(|h| h.id.distance(target));
        handles.truncate(k);
        handles
    }

    /// All known peers
    #[must_use]
    pub fn all(&self) -> Vec<PeerHandle> {
        self.peers.values().map(|e| e.handle).collect()
    }

    /// Number of known peers
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peers are known
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
