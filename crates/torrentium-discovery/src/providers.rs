//! Provider records: which peers serve which CIDs.
//!
//! Records are soft state. Each one expires after the table's TTL unless the
//! provider announces again, which nodes do periodically for everything they
//! hold.

use crate::node_id::NodeId;
use crate::peer_book::PeerHandle;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use torrentium_files::Cid;

/// Default provider record lifetime (1 hour)
pub const DEFAULT_PROVIDER_TTL: Duration = Duration::from_secs(60 * 60);

/// Maximum providers remembered per CID
const MAX_PROVIDERS_PER_CID: usize = 64;

#[derive(Debug, Clone)]
struct ProviderRecord {
    peer: PeerHandle,
    refreshed_at: Instant,
}

/// CID → providers with expiry
#[derive(Debug)]
pub struct ProviderTable {
    ttl: Duration,
    records: HashMap<Cid, HashMap<NodeId, ProviderRecord>>,
}

impl ProviderTable {
    /// Create a table with the given record TTL
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            records: HashMap::new(),
        }
    }

    /// Record lifetime
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Add or refresh a provider record
    pub fn add(&mut self, cid: Cid, peer: PeerHandle, now: Instant) {
        let providers = self.records.entry(cid).or_default();

        if !providers.contains_key(&peer.id) && providers.len() >= MAX_PROVIDERS_PER_CID {
            let stalest = providers
                .values()
                .min_by_key(|r| r.refreshed_at)
                .map(|r| r.peer.id);
            if let Some(id) = stalest {
                providers.remove(&id);
            }
        }

        providers.insert(
            peer.id,
            ProviderRecord {
                peer,
                refreshed_at: now,
            },
        );
    }

    /// Live providers for a CID, most recently refreshed first
    #[must_use]
    pub fn providers(&self, cid: &Cid, now: Instant) -> Vec<PeerHandle> {
        let Some(providers) = self.records.get(cid) else {
            return Vec::new();
        };

        let mut live: Vec<&ProviderRecord> = providers
            .values()
            .filter(|r| !self.is_expired(r, now))
            .collect();
        live.sort_by(|a, b| b.refreshed_at.cmp(&a.refreshed_at));
        live.into_iter().map(|r| r.peer).collect()
    }

    /// Drop one provider record
    pub fn remove(&mut self, cid: &Cid, peer: &NodeId) {
        if let Some(providers) = self.records.get_mut(cid) {
            providers.remove(peer);
            if providers.is_empty() {
                self.records.remove(cid);
            }
        }
    }

    /// Drop every record for a CID
    pub fn forget(&mut self, cid: &Cid) {
        self.records.remove(cid);
    }

    /// Remove expired records; returns how many were dropped
    pub fn cleanup(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let mut removed = 0;

        self.records.retain(|_, providers| {
            let before = providers.len();
            providers.retain(|_, r| now.saturating_duration_since(r.refreshed_at) < ttl);
            removed += before - providers.len();
            !providers.is_empty()
        });

        if removed > 0 {
            tracing::debug!(removed, "expired provider records");
        }
        removed
    }

    /// Number of CIDs with at least one record
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn is_expired(&self, record: &ProviderRecord, now: Instant) -> bool {
        now.saturating_duration_since(record.refreshed_at) >= self.ttl
    }
}

impl Default for ProviderTable {
    fn default() -> Self {
        Self::new(DEFAULT_PROVIDER_TTL)
    }
}
