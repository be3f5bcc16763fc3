//! Peer transport: provider discovery and chunk fetching.
//!
//! [`PeerTransport`] is the seam the transfer coordinator talks to. The
//! network implementation, [`NetworkPeers`], keeps a peer book and a provider
//! table and reaches other nodes through the wire protocol.

use crate::config::DiscoveryConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use torrentium_discovery::{NodeId, PeerBook, PeerHandle, ProviderTable};
use torrentium_files::{Cid, Manifest};
use torrentium_transport::{PeerClient, TransportError, TransportStats};

/// Network operations a download needs
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    /// This node's own handle
    fn local_peer(&self) -> PeerHandle;

    /// Advertise that this node provides `cid` (best effort)
    async fn announce(&self, cid: Cid);

    /// Peers that provide `cid`, excluding this node; may be empty
    async fn find_providers(&self, cid: Cid) -> Result<Vec<PeerHandle>>;

    /// Manifest for `cid` from `peer` (not yet verified)
    async fn fetch_manifest(&self, peer: &PeerHandle, cid: Cid) -> Result<Manifest>;

    /// One chunk of `cid` from `peer` (not yet verified)
    async fn fetch_chunk(&self, peer: &PeerHandle, cid: Cid, index: u64) -> Result<Vec<u8>>;
}

/// [`PeerTransport`] over TCP
#[derive(Debug)]
pub struct NetworkPeers {
    local: PeerHandle,
    client: PeerClient,
    chunk_client: PeerClient,
    replication: usize,
    publish: bool,
    book: RwLock<PeerBook>,
    providers: RwLock<ProviderTable>,
}

impl NetworkPeers {
    /// Create with the given identity and discovery settings
    ///
    /// `chunk_timeout` bounds manifest and chunk requests; discovery traffic
    /// uses `config.request_timeout`.
    #[must_use]
    pub fn new(local: PeerHandle, config: &DiscoveryConfig, chunk_timeout: Duration) -> Self {
        Self {
            local,
            client: PeerClient::new(config.request_timeout),
            chunk_client: PeerClient::new(chunk_timeout),
            replication: config.replication,
            publish: config.announce,
            book: RwLock::new(PeerBook::with_capacity(local.id, config.max_peers)),
            providers: RwLock::new(ProviderTable::new(config.provider_ttl)),
        }
    }

    /// Remember a peer; the local node is ignored
    pub async fn add_peer(&self, peer: PeerHandle) {
        if peer.id == self.local.id {
            return;
        }
        if let Ok(true) = self.book.write().await.insert(peer) {
            tracing::debug!(%peer, "learned new peer");
        }
    }

    /// All known peers
    pub async fn known_peers(&self) -> Vec<PeerHandle> {
        self.book.read().await.all()
    }

    /// Up to `replication` known peers closest to `target`
    pub async fn closest_peers(&self, target: &NodeId) -> Vec<PeerHandle> {
        self.book.read().await.closest(target, self.replication)
    }

    /// Say hello to `addr` and merge the peers it knows
    ///
    /// # Errors
    ///
    /// Returns an error if the peer cannot be reached.
    pub async fn connect(&self, addr: SocketAddr) -> Result<PeerHandle> {
        let (id, peers) = self.client.hello(addr, self.local).await?;
        let remote = PeerHandle::new(id, addr);
        self.add_peer(remote).await;
        for peer in peers {
            self.add_peer(peer).await;
        }
        tracing::info!(peer = %remote, "connected to peer");
        Ok(remote)
    }

    /// Contact every bootstrap address; returns how many answered
    pub async fn bootstrap(self: &Arc<Self>, addrs: &[SocketAddr]) -> usize {
        let mut tasks = JoinSet::new();
        for &addr in addrs {
            let this = Arc::clone(self);
            tasks.spawn(async move { (addr, this.connect(addr).await) });
        }

        let mut reached = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(_))) => reached += 1,
                Ok((addr, Err(e))) => tracing::warn!(%addr, error = %e, "bootstrap peer unreachable"),
                Err(e) => tracing::warn!(error = %e, "bootstrap task failed"),
            }
        }

        tracing::info!(reached, total = addrs.len(), peers = self.book.read().await.len(), "bootstrap finished");
        reached
    }

    /// Record that `provider` serves `cid`
    pub async fn record_provider(&self, cid: Cid, provider: PeerHandle) {
        self.providers
            .write()
            .await
            .add(cid, provider, Instant::now());
    }

    /// Live provider records for `cid` (may include this node)
    pub async fn providers_of(&self, cid: &Cid) -> Vec<PeerHandle> {
        self.providers.read().await.providers(cid, Instant::now())
    }

    /// Stop advertising `cid` locally
    pub async fn forget_local(&self, cid: &Cid) {
        self.providers.write().await.remove(cid, &self.local.id);
    }

    /// Drop expired provider records
    pub async fn expire_providers(&self) -> usize {
        self.providers.write().await.cleanup(Instant::now())
    }

    /// Combined statistics for discovery and transfer traffic
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        let a = self.client.stats();
        let b = self.chunk_client.stats();
        TransportStats {
            bytes_sent: a.bytes_sent + b.bytes_sent,
            bytes_received: a.bytes_received + b.bytes_received,
            frames_sent: a.frames_sent + b.frames_sent,
            frames_received: a.frames_received + b.frames_received,
            send_errors: a.send_errors + b.send_errors,
            recv_errors: a.recv_errors + b.recv_errors,
            timeouts: a.timeouts + b.timeouts,
        }
    }

    async fn note_failure(&self, peer: &PeerHandle, err: &TransportError) {
        if err.is_unreachable() || matches!(err, TransportError::Timeout(_)) {
            self.book.write().await.mark_failed(&peer.id);
        }
    }

    async fn note_success(&self, peer: &PeerHandle) {
        self.book.write().await.mark_seen(&peer.id);
    }
}

#[async_trait]
impl PeerTransport for NetworkPeers {
    fn local_peer(&self) -> PeerHandle {
        self.local
    }

    async fn announce(&self, cid: Cid) {
        self.record_provider(cid, self.local).await;
        if !self.publish {
            tracing::trace!(cid = %cid.short(), "announcing disabled");
            return;
        }

        let targets = self.closest_peers(&NodeId::from_cid(&cid)).await;
        if targets.is_empty() {
            tracing::debug!(cid = %cid.short(), "no peers to announce to");
            return;
        }

        let mut tasks = JoinSet::new();
        for peer in targets {
            let client = self.client.clone();
            let local = self.local;
            tasks.spawn(async move { (peer, client.announce(peer.addr, cid, local).await) });
        }

        let mut acked = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((peer, Ok(()))) => {
                    acked += 1;
                    self.note_success(&peer).await;
                }
                Ok((peer, Err(e))) => {
                    tracing::debug!(%peer, cid = %cid.short(), error = %e, "announce failed");
                    self.note_failure(&peer, &e).await;
                }
                Err(e) => tracing::warn!(error = %e, "announce task failed"),
            }
        }
        tracing::debug!(cid = %cid.short(), acked, "announced");
    }

    async fn find_providers(&self, cid: Cid) -> Result<Vec<PeerHandle>> {
        let mut seen: HashSet<NodeId> = HashSet::from([self.local.id]);
        let mut found: Vec<PeerHandle> = Vec::new();

        for peer in self.providers_of(&cid).await {
            if seen.insert(peer.id) {
                found.push(peer);
            }
        }

        let targets = self.closest_peers(&NodeId::from_cid(&cid)).await;
        let mut tasks = JoinSet::new();
        for peer in targets {
            let client = self.client.clone();
            tasks.spawn(async move { (peer, client.find_providers(peer.addr, cid).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            let (peer, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "provider query task failed");
                    continue;
                }
            };

            match result {
                Ok((providers, closer)) => {
                    self.note_success(&peer).await;
                    for provider in providers {
                        let Some(provider) = dialable(provider, &peer) else {
                            tracing::debug!(%peer, %provider, "dropping provider with unspecified address");
                            continue;
                        };
                        self.record_provider(cid, provider).await;
                        if seen.insert(provider.id) {
                            found.push(provider);
                        }
                    }
                    for peer in closer {
                        self.add_peer(peer).await;
                    }
                }
                Err(e) => {
                    tracing::debug!(%peer, cid = %cid.short(), error = %e, "provider query failed");
                    self.note_failure(&peer, &e).await;
                }
            }
        }

        tracing::debug!(cid = %cid.short(), providers = found.len(), "provider lookup finished");
        Ok(found)
    }

    async fn fetch_manifest(&self, peer: &PeerHandle, cid: Cid) -> Result<Manifest> {
        match self.chunk_client.get_manifest(peer.addr, cid).await {
            Ok(manifest) => {
                self.note_success(peer).await;
                Ok(manifest)
            }
            Err(e) => {
                self.note_failure(peer, &e).await;
                Err(e.into())
            }
        }
    }

    async fn fetch_chunk(&self, peer: &PeerHandle, cid: Cid, index: u64) -> Result<Vec<u8>> {
        match self.chunk_client.get_chunk(peer.addr, cid, index).await {
            Ok(data) => Ok(data),
            Err(e) => {
                self.note_failure(peer, &e).await;
                Err(e.into())
            }
        }
    }
}

/// Provider handle as it can be dialled from here
///
/// A node lists itself under its bind address, which says nothing when that
/// is `0.0.0.0`, so the address it was reached on is used instead. Other
/// entries with an unspecified address cannot be repaired.
fn dialable(provider: PeerHandle, via: &PeerHandle) -> Option<PeerHandle> {
    if provider.id == via.id {
        Some(PeerHandle::new(provider.id, via.addr))
    } else if provider.addr.ip().is_unspecified() {
        None
    } else {
        Some(provider)
    }
}
