//! Node implementation - the engine's public face
//!
//! A [`Node`] owns the content store, the local index, the peer tables, the
//! listening server and the transfer coordinator. A UI or CLI drives it and
//! listens to its [`TransferEvent`]s.
//!
//! # Example
//!
//! ```no_run
//! use torrentium_core::{Node, NodeConfig};
//!
//! # async fn run() -> torrentium_core::Result<()> {
//! let node = Node::start(NodeConfig::with_data_dir("/tmp/torrentium")).await?;
//! let cid = node.add_file("report.pdf").await?;
//! for file in node.list_local_files().await {
//!     println!("{} {}", file.cid, file.filename);
//! }
//! node.shutdown().await;
//! # let _ = cid;
//! # Ok(())
//! # }
//! ```

use crate::config::NodeConfig;
use crate::coordinator::{SessionProgress, TransferCoordinator};
use crate::error::{NodeError, Result};
use crate::events::{EventBus, TransferEvent};
use crate::index::{FileRecord, LocalIndex};
use crate::peer::{NetworkPeers, PeerTransport};
use crate::service::NodeService;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use torrentium_discovery::{NodeId, PeerHandle};
use torrentium_files::{Cid, ContentStore};
use torrentium_transport::{Server, StatsHandle, TransportConfig, TransportStats};

/// A file known to this node, shaped for UI consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalFile {
    /// Content identifier text
    pub cid: String,
    /// Display name
    pub filename: String,
    /// Location on this machine
    pub file_path: String,
    /// Size in bytes
    pub file_size: u64,
    /// Lowercase hex BLAKE3 of the file
    pub file_hash: String,
    /// RFC 3339 UTC timestamp
    pub created_at: String,
}

impl From<FileRecord> for LocalFile {
    fn from(record: FileRecord) -> Self {
        Self {
            cid: record.cid.to_string(),
            filename: record.filename,
            file_path: record.file_path.to_string_lossy().into_owned(),
            file_size: record.file_size,
            file_hash: record.file_hash,
            created_at: record.created_at.to_rfc3339(),
        }
    }
}

struct NodeInner {
    config: NodeConfig,
    store: ContentStore,
    index: Arc<LocalIndex>,
    peers: Arc<NetworkPeers>,
    events: EventBus,
    coordinator: TransferCoordinator,
    listen_addr: SocketAddr,
    server_stats: StatsHandle,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

/// Torrentium node
///
/// Cloning is cheap; clones share the same engine.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.peers.local_peer().id)
            .field("listen_addr", &self.inner.listen_addr)
            .field("data_dir", &self.inner.config.storage.data_dir)
            .finish_non_exhaustive()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Lifecycle
// ═══════════════════════════════════════════════════════════════════════════

impl Node {
    /// Open storage, bind the listener, contact bootstrap peers and start
    /// background maintenance
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidConfig`] for a rejected configuration,
    /// [`NodeError::Corrupt`] for an unreadable index or identity, and
    /// [`NodeError::Io`] if storage cannot be opened or the address bound.
    pub async fn start(config: NodeConfig) -> Result<Self> {
        config.validate()?;

        let store_dir = config.storage.store_dir();
        let chunk_size = config.storage.chunk_size;
        let store = tokio::task::spawn_blocking(move || ContentStore::open(store_dir, chunk_size))
            .await
            .map_err(|e| NodeError::task_join(&e))??;

        let index = Arc::new(LocalIndex::open(config.storage.index_path()).await?);
        let id = load_or_create_identity(&config.storage.identity_path()).await?;

        let transport_config = TransportConfig {
            request_timeout: config.transfer.chunk_timeout,
            ..TransportConfig::default()
        };
        let server = Server::bind(config.listen_addr, transport_config).await?;
        let listen_addr = server.local_addr()?;
        let local = PeerHandle::new(id, listen_addr);

        let peers = Arc::new(NetworkPeers::new(
            local,
            &config.discovery,
            config.transfer.chunk_timeout,
        ));
        let events = EventBus::new(config.transfer.event_capacity);
        let coordinator = TransferCoordinator::new(
            store.clone(),
            Arc::clone(&index),
            Arc::clone(&peers) as Arc<dyn PeerTransport>,
            events.clone(),
            config.transfer.clone(),
        );

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        let server_stats = server.stats_handle();
        let service = Arc::new(NodeService::new(store.clone(), Arc::clone(&peers)));
        tracker.spawn(server.serve(service, shutdown.clone()));

        tracing::info!(
            id = %id,
            addr = %listen_addr,
            data_dir = %config.storage.data_dir.display(),
            files = index.len().await,
            "node started"
        );

        if !config.discovery.bootstrap_nodes.is_empty() {
            peers.bootstrap(&config.discovery.bootstrap_nodes).await;
        }

        let node = Self {
            inner: Arc::new(NodeInner {
                config,
                store,
                index,
                peers,
                events,
                coordinator,
                listen_addr,
                server_stats,
                shutdown,
                tracker,
            }),
        };

        let maintenance = node.clone();
        node.inner
            .tracker
            .spawn(async move { maintenance.maintenance_loop().await });

        Ok(node)
    }

    /// Cancel downloads, stop serving and wait for background tasks
    pub async fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        tracing::info!("node shutting down");
        self.inner.coordinator.shutdown().await;
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        tracing::info!("node stopped");
    }

    async fn maintenance_loop(&self) {
        let mut ticker = tokio::time::interval(self.inner.config.discovery.announce_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.inner.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let expired = self.inner.peers.expire_providers().await;
            let store = self.inner.store.clone();
            let cids = match tokio::task::spawn_blocking(move || store.list()).await {
                Ok(Ok(cids)) => cids,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "failed to list stored content");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "store listing task failed");
                    continue;
                }
            };

            tracing::debug!(announce = cids.len(), expired, "maintenance tick");
            for cid in cids {
                if self.inner.shutdown.is_cancelled() {
                    break;
                }
                self.inner.peers.announce(cid).await;
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Files
// ═══════════════════════════════════════════════════════════════════════════

impl Node {
    /// Chunk, hash and store a file, record it and announce it
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NotFound`] if the file is missing or unreadable
    /// and [`NodeError::Io`] if storing it fails.
    pub async fn add_file(&self, path: impl AsRef<Path>) -> Result<Cid> {
        let path = path.as_ref().to_path_buf();
        let store = self.inner.store.clone();
        let (cid, manifest, location) = tokio::task::spawn_blocking(move || {
            let (cid, manifest) = store.add(&path)?;
            let location = std::fs::canonicalize(&path).unwrap_or(path);
            Ok::<_, NodeError>((cid, manifest, location))
        })
        .await
        .map_err(|e| NodeError::task_join(&e))??;

        let filename = manifest.filename.clone();
        self.inner
            .index
            .record(FileRecord::from_manifest(&manifest, filename, location))
            .await?;
        tracing::info!(cid = %cid, filename = %manifest.filename, size = manifest.file_size, "file added");

        let peers = Arc::clone(&self.inner.peers);
        self.inner
            .tracker
            .spawn(async move { peers.announce(cid).await });
        Ok(cid)
    }

    /// Every file in the local index, oldest first
    pub async fn list_local_files(&self) -> Vec<LocalFile> {
        self.inner
            .index
            .list()
            .await
            .into_iter()
            .map(LocalFile::from)
            .collect()
    }

    /// Start downloading `cid` in the background
    ///
    /// Progress and the outcome arrive as events on [`Node::subscribe`].
    /// Asking for a CID that is already downloading joins that download.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidCid`] if `cid` does not parse, checked
    /// before anything starts.
    pub fn download_file(&self, cid: &str) -> Result<Cid> {
        let cid: Cid = cid.trim().parse()?;
        self.inner.coordinator.download(cid)?;
        Ok(cid)
    }

    /// Cancel an active download; returns `false` if none was running
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidCid`] if `cid` does not parse.
    pub fn cancel_download(&self, cid: &str) -> Result<bool> {
        let cid: Cid = cid.trim().parse()?;
        Ok(self.inner.coordinator.cancel(&cid))
    }

    /// Forget a file: drop its index entry and stored chunks and stop
    /// providing it
    ///
    /// The original file on disk is left alone. Returns `false` if the CID
    /// was unknown.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidCid`] for a malformed CID or
    /// [`NodeError::Io`] if removal fails.
    pub async fn remove_file(&self, cid: &str) -> Result<bool> {
        let cid: Cid = cid.trim().parse()?;
        // A session finishing concurrently must not re-record the entry
        self.inner.coordinator.cancel_and_wait(&cid).await;

        let indexed = self.inner.index.remove(&cid).await?.is_some();
        let store = self.inner.store.clone();
        let stored = tokio::task::spawn_blocking(move || store.remove(&cid))
            .await
            .map_err(|e| NodeError::task_join(&e))??;
        self.inner.peers.forget_local(&cid).await;

        if indexed || stored {
            tracing::info!(cid = %cid, "file removed");
        }
        Ok(indexed || stored)
    }

    /// Subscribe to transfer events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.inner.events.subscribe()
    }

    /// Active downloads and their progress
    #[must_use]
    pub fn active_downloads(&self) -> Vec<(Cid, SessionProgress)> {
        self.inner.coordinator.sessions()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Network
// ═══════════════════════════════════════════════════════════════════════════

impl Node {
    /// This node's handle as advertised to peers
    #[must_use]
    pub fn local_peer(&self) -> PeerHandle {
        self.inner.peers.local_peer()
    }

    /// Address the node listens on
    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        self.inner.listen_addr
    }

    /// Peers this node knows about
    pub async fn known_peers(&self) -> Vec<PeerHandle> {
        self.inner.peers.known_peers().await
    }

    /// Introduce this node to the peer at `addr`
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::PeerUnreachable`] or [`NodeError::Timeout`] if
    /// the peer does not answer.
    pub async fn connect(&self, addr: SocketAddr) -> Result<PeerHandle> {
        self.inner.peers.connect(addr).await
    }

    /// Outbound traffic counters
    #[must_use]
    pub fn client_stats(&self) -> TransportStats {
        self.inner.peers.stats()
    }

    /// Inbound traffic counters
    #[must_use]
    pub fn server_stats(&self) -> TransportStats {
        self.inner.server_stats.snapshot()
    }
}

/// Read the node id persisted at `path`, generating one on first start
async fn load_or_create_identity(path: &Path) -> Result<NodeId> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => text.trim().parse::<NodeId>().map_err(|e| {
            NodeError::Corrupt(format!("{}: {e}", path.display()).into())
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let id = NodeId::random();
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, format!("{}\n", id.to_hex())).await?;
            tracing::info!(id = %id, "generated node identity");
            Ok(id)
        }
        Err(e) => Err(e.into()),
    }
}
