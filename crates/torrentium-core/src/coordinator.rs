//! Transfer coordinator
//!
//! Runs one background session per CID. A session walks
//! `Resolving → Fetching → Verifying → Completed`, or ends `Failed` /
//! `Cancelled`, and publishes exactly one terminal event.
//!
//! Chunks are fetched by a pool of at most `max_concurrent_chunks` workers.
//! Each worker returns its outcome to the session task, which alone writes to
//! the staging area, updates the session and publishes progress.

use crate::config::TransferConfig;
use crate::error::{ErrorKind, NodeError, Result};
use crate::events::{EventBus, TransferEvent};
use crate::index::{FileRecord, LocalIndex};
use crate::multi_peer::ProviderRotation;
use crate::peer::PeerTransport;
use crate::transfer::{TransferSession, TransferStatus};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use torrentium_discovery::PeerHandle;
use torrentium_files::manifest::sanitize_filename;
use torrentium_files::{Cid, ContentStore, Manifest, Staging};
use tracing::Instrument;

/// Name suffixes tried before giving up on a free download path
const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// Result of [`TransferCoordinator::download`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStart {
    /// A new session was started
    Started,
    /// A session for the CID was already running; no new work was started
    Joined,
}

/// Snapshot of an active session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    /// Current state
    pub status: TransferStatus,
    /// Chunks received
    pub received: u64,
    /// Total chunks (0 while resolving)
    pub total: u64,
}

impl From<&TransferSession> for SessionProgress {
    fn from(session: &TransferSession) -> Self {
        Self {
            status: session.status(),
            received: session.received_count(),
            total: session.total_chunks(),
        }
    }
}

struct SessionHandle {
    cancel: CancellationToken,
    // Closes when the session task returns
    progress: watch::Receiver<SessionProgress>,
}

struct ChunkOutcome {
    index: u64,
    attempt: u32,
    peer: PeerHandle,
    elapsed: Duration,
    result: Result<Vec<u8>>,
}

struct Inner {
    store: ContentStore,
    index: Arc<LocalIndex>,
    peers: Arc<dyn PeerTransport>,
    events: EventBus,
    config: TransferConfig,
    sessions: DashMap<Cid, SessionHandle>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

/// Downloads content from peers into the store and the download directory
#[derive(Clone)]
pub struct TransferCoordinator {
    inner: Arc<Inner>,
}

impl fmt::Debug for TransferCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferCoordinator")
            .field("download_dir", &self.inner.config.download_dir)
            .field("active", &self.inner.sessions.len())
            .finish_non_exhaustive()
    }
}

impl TransferCoordinator {
    /// Create a coordinator
    #[must_use]
    pub fn new(
        store: ContentStore,
        index: Arc<LocalIndex>,
        peers: Arc<dyn PeerTransport>,
        events: EventBus,
        config: TransferConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                index,
                peers,
                events,
                config,
                sessions: DashMap::new(),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Start downloading `cid` in the background
    ///
    /// If a session for `cid` is already running the call joins it and
    /// starts nothing new. The outcome arrives as a `download-complete` or
    /// `download-error` event.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Cancelled`] after [`TransferCoordinator::shutdown`].
    pub fn download(&self, cid: Cid) -> Result<DownloadStart> {
        if self.inner.shutdown.is_cancelled() {
            return Err(NodeError::Cancelled);
        }

        let (cancel, progress) = match self.inner.sessions.entry(cid) {
            Entry::Occupied(_) => {
                tracing::debug!(cid = %cid.short(), "joining active download");
                return Ok(DownloadStart::Joined);
            }
            Entry::Vacant(slot) => {
                let cancel = self.inner.shutdown.child_token();
                let (tx, rx) = watch::channel(SessionProgress::from(&TransferSession::new(cid)));
                slot.insert(SessionHandle {
                    cancel: cancel.clone(),
                    progress: rx,
                });
                (cancel, tx)
            }
        };

        let inner = Arc::clone(&self.inner);
        let span = tracing::info_span!("download", cid = %cid.short());
        self.inner
            .tracker
            .spawn(async move { inner.run_session(cid, cancel, progress).await }.instrument(span));
        Ok(DownloadStart::Started)
    }

    /// Request cancellation of the session for `cid`
    ///
    /// Returns `false` if no session is active.
    pub fn cancel(&self, cid: &Cid) -> bool {
        self.signal_cancel(cid).is_some()
    }

    /// Cancel the session for `cid` and wait until its task has returned
    ///
    /// A session already past its last cancellation point completes normally;
    /// either way nothing it does happens after this returns. Returns `false`
    /// if no session was active.
    pub async fn cancel_and_wait(&self, cid: &Cid) -> bool {
        let Some(mut progress) = self.signal_cancel(cid) else {
            return false;
        };
        while progress.changed().await.is_ok() {}
        true
    }

    fn signal_cancel(&self, cid: &Cid) -> Option<watch::Receiver<SessionProgress>> {
        let handle = self.inner.sessions.get(cid)?;
        tracing::info!(cid = %cid.short(), "cancelling download");
        handle.cancel.cancel();
        Some(handle.progress.clone())
    }

    /// Whether a session for `cid` is running
    #[must_use]
    pub fn is_active(&self, cid: &Cid) -> bool {
        self.inner.sessions.contains_key(cid)
    }

    /// Snapshot of every active session
    #[must_use]
    pub fn sessions(&self) -> Vec<(Cid, SessionProgress)> {
        self.inner
            .sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().progress.borrow().clone()))
            .collect()
    }

    /// Cancel every session and wait for all background work to finish
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

impl Inner {
    async fn run_session(
        self: Arc<Self>,
        cid: Cid,
        cancel: CancellationToken,
        progress: watch::Sender<SessionProgress>,
    ) {
        let mut session = TransferSession::new(cid);
        tracing::info!("download started");

        // The overall deadline stops the session at the same points a
        // cancel does, so an expired session never exports or records
        let stop = cancel.child_token();
        let expired = CancellationToken::new();
        if let Some(limit) = self.config.download_timeout {
            let (stop, expired) = (stop.clone(), expired.clone());
            self.tracker.spawn(async move {
                tokio::select! {
                    () = stop.cancelled() => {}
                    () = tokio::time::sleep(limit) => {
                        expired.cancel();
                        stop.cancel();
                    }
                }
            });
        }

        let mut outcome = self.drive(&mut session, &stop, &progress).await;
        stop.cancel();
        if matches!(outcome, Err(NodeError::Cancelled)) && expired.is_cancelled() {
            let limit = self.config.download_timeout.unwrap_or_default();
            outcome = Err(NodeError::Timeout(
                format!("download did not finish within {limit:?}").into(),
            ));
        }

        self.sessions.remove(&cid);

        match outcome {
            Ok(filename) => {
                tracing::info!(
                    %filename,
                    bytes = session.bytes_received(),
                    elapsed_ms = session.elapsed().as_millis() as u64,
                    "download complete"
                );
                self.events
                    .publish(TransferEvent::DownloadComplete { cid, filename });
            }
            Err(err) => {
                if let Err(e) = session.fail(err.clone()) {
                    tracing::debug!(error = %e, "session already terminal");
                }
                match err.kind() {
                    ErrorKind::Cancelled => tracing::info!("download cancelled"),
                    _ => tracing::warn!(error = %err, kind = %err.kind(), "download failed"),
                }
                self.events.publish(TransferEvent::error(cid, &err));
            }
        }
    }

    async fn drive(
        &self,
        session: &mut TransferSession,
        cancel: &CancellationToken,
        progress: &watch::Sender<SessionProgress>,
    ) -> Result<String> {
        let cid = *session.cid();

        let store = self.store.clone();
        let stored = tokio::task::spawn_blocking(move || store.contains(&cid))
            .await
            .map_err(|e| NodeError::task_join(&e))?;
        if stored {
            tracing::debug!("content already stored, skipping network");
            session.begin_verifying()?;
            progress.send_replace(SessionProgress::from(&*session));
            return self.finish(session, cancel).await;
        }

        let providers = tokio::select! {
            () = cancel.cancelled() => return Err(NodeError::Cancelled),
            found = self.peers.find_providers(cid) => found?,
        };
        if providers.is_empty() {
            return Err(NodeError::NoProviders(cid));
        }
        tracing::debug!(providers = providers.len(), "providers resolved");

        let manifest = Arc::new(self.resolve_manifest(cid, &providers, cancel).await?);
        session.begin_fetching(manifest.chunk_count())?;
        progress.send_replace(SessionProgress::from(&*session));

        let store = self.store.clone();
        let import = (*manifest).clone();
        let staging = tokio::task::spawn_blocking(move || store.begin_import(import))
            .await
            .map_err(|e| NodeError::task_join(&e))??;

        let staging = self
            .fetch_chunks(session, progress, cancel, manifest, providers, staging)
            .await?;

        session.begin_verifying()?;
        progress.send_replace(SessionProgress::from(&*session));
        if cancel.is_cancelled() {
            return Err(NodeError::Cancelled);
        }

        tokio::task::spawn_blocking(move || staging.commit())
            .await
            .map_err(|e| NodeError::task_join(&e))??;

        self.finish(session, cancel).await
    }

    async fn resolve_manifest(
        &self,
        cid: Cid,
        providers: &[PeerHandle],
        cancel: &CancellationToken,
    ) -> Result<Manifest> {
        for peer in providers {
            let fetched = tokio::select! {
                () = cancel.cancelled() => return Err(NodeError::Cancelled),
                fetched = tokio::time::timeout(
                    self.config.chunk_timeout,
                    self.peers.fetch_manifest(peer, cid),
                ) => fetched,
            };

            match fetched {
                Ok(Ok(manifest)) => match manifest.verify(&cid) {
                    Ok(()) => return Ok(manifest),
                    Err(e) => tracing::warn!(%peer, error = %e, "provider sent invalid manifest"),
                },
                Ok(Err(e)) => tracing::debug!(%peer, error = %e, "manifest request failed"),
                Err(_) => tracing::debug!(%peer, "manifest request timed out"),
            }
        }
        Err(NodeError::transfer("no provider served a valid manifest"))
    }

    async fn fetch_chunks(
        &self,
        session: &mut TransferSession,
        progress: &watch::Sender<SessionProgress>,
        cancel: &CancellationToken,
        manifest: Arc<Manifest>,
        providers: Vec<PeerHandle>,
        staging: Staging,
    ) -> Result<Staging> {
        let cid = *session.cid();
        let total = session.total_chunks();
        let mut rotation = ProviderRotation::new(providers);
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_chunks));
        let mut workers: JoinSet<ChunkOutcome> = JoinSet::new();
        let mut pending: VecDeque<(u64, u32)> = session.missing_chunks().into_iter().map(|i| (i, 0)).collect();
        let mut staging = Some(staging);
        let mut failure: Option<NodeError> = None;

        loop {
            let stopping = failure.is_some() || cancel.is_cancelled();
            if !stopping {
                while let Some(&(index, attempt)) = pending.front() {
                    let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                        break;
                    };
                    pending.pop_front();
                    let peer = rotation
                        .provider_for(index, attempt)
                        .ok_or(NodeError::NoProviders(cid))?;
                    let backoff = attempt
                        .checked_sub(1)
                        .map(|n| self.config.retry.backoff_duration(n));
                    tracing::debug!(index, attempt, %peer, "requesting chunk");
                    workers.spawn(chunk_worker(
                        Arc::clone(&self.peers),
                        Arc::clone(&manifest),
                        cid,
                        index,
                        attempt,
                        peer,
                        backoff,
                        self.config.chunk_timeout,
                        cancel.clone(),
                        permit,
                    ));
                }
            }

            if workers.is_empty() {
                break;
            }

            let joined = tokio::select! {
                joined = workers.join_next() => joined,
                () = cancel.cancelled(), if !stopping => continue,
            };
            let Some(joined) = joined else { break };

            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(error = %e, "chunk worker failed");
                    failure.get_or_insert(NodeError::task_join(&e));
                    continue;
                }
            };

            let ChunkOutcome {
                index,
                attempt,
                peer,
                elapsed,
                result,
            } = outcome;

            let err = match result {
                Ok(data) if failure.is_none() && !cancel.is_cancelled() => {
                    let len = data.len();
                    let mut writer = staging
                        .take()
                        .ok_or(NodeError::transfer("staging area lost"))?;
                    let (writer, written) = tokio::task::spawn_blocking(move || {
                        let written = writer.put_chunk(index, &data);
                        (writer, written)
                    })
                    .await
                    .map_err(|e| NodeError::task_join(&e))?;
                    staging = Some(writer);

                    match written {
                        Ok(()) => {
                            rotation.record_success(&peer.id, len as u64, elapsed);
                            if session.mark_received(index, len) {
                                progress.send_replace(SessionProgress::from(&*session));
                                self.events.publish(TransferEvent::DownloadProgress {
                                    cid,
                                    received: session.received_count(),
                                    total,
                                });
                            }
                            continue;
                        }
                        Err(e) => NodeError::from(e),
                    }
                }
                // Landed after the session decided to stop
                Ok(_) => continue,
                Err(NodeError::Cancelled) => continue,
                Err(e) => e,
            };

            rotation.record_failure(&peer.id);
            let next = attempt + 1;
            if next < self.config.max_chunk_attempts {
                tracing::debug!(index, attempt, %peer, error = %err, "chunk attempt failed, retrying");
                pending.push_back((index, next));
            } else if failure.is_none() {
                tracing::warn!(index, attempts = next, error = %err, "chunk retry budget exhausted");
                failure = Some(match err.kind() {
                    ErrorKind::Integrity => NodeError::Integrity(
                        format!("chunk {index} failed verification after {next} attempts").into(),
                    ),
                    _ => NodeError::Transfer(
                        format!("chunk {index} failed after {next} attempts: {err}").into(),
                    ),
                });
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(NodeError::Cancelled);
        }
        staging.ok_or(NodeError::transfer("staging area lost"))
    }

    async fn finish(&self, session: &mut TransferSession, cancel: &CancellationToken) -> Result<String> {
        let cid = *session.cid();
        if cancel.is_cancelled() {
            return Err(NodeError::Cancelled);
        }

        let store = self.store.clone();
        let download_dir = self.config.download_dir.clone();
        let export = tokio::task::spawn_blocking(move || export_unique(&store, &cid, &download_dir))
            .await
            .map_err(|e| NodeError::task_join(&e))??;

        if cancel.is_cancelled() {
            if export.created {
                let _ = tokio::fs::remove_file(&export.path).await;
            }
            return Err(NodeError::Cancelled);
        }

        let record = FileRecord::from_manifest(&export.manifest, export.filename.clone(), export.path);
        self.index.record(record).await?;
        session.complete()?;

        let peers = Arc::clone(&self.peers);
        self.tracker.spawn(async move { peers.announce(cid).await });

        Ok(export.filename)
    }
}

#[allow(clippy::too_many_arguments)]
async fn chunk_worker(
    peers: Arc<dyn PeerTransport>,
    manifest: Arc<Manifest>,
    cid: Cid,
    index: u64,
    attempt: u32,
    peer: PeerHandle,
    backoff: Option<Duration>,
    chunk_timeout: Duration,
    cancel: CancellationToken,
    _permit: OwnedSemaphorePermit,
) -> ChunkOutcome {
    let started = Instant::now();
    let result = fetch_verified(&*peers, &manifest, cid, index, &peer, backoff, chunk_timeout, &cancel).await;
    ChunkOutcome {
        index,
        attempt,
        peer,
        elapsed: started.elapsed(),
        result,
    }
}

#[allow(clippy::too_many_arguments)]
async fn fetch_verified(
    peers: &dyn PeerTransport,
    manifest: &Manifest,
    cid: Cid,
    index: u64,
    peer: &PeerHandle,
    backoff: Option<Duration>,
    chunk_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    if let Some(delay) = backoff {
        tokio::select! {
            () = cancel.cancelled() => return Err(NodeError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
    }

    let data = tokio::time::timeout(chunk_timeout, peers.fetch_chunk(peer, cid, index))
        .await
        .map_err(|_| NodeError::Timeout(format!("chunk {index} from {peer}").into()))??;

    if !manifest.verify_chunk(index, &data) {
        return Err(NodeError::Integrity(
            format!("chunk {index} from {peer} does not match its hash").into(),
        ));
    }
    Ok(data)
}

struct Export {
    manifest: Manifest,
    filename: String,
    path: PathBuf,
    created: bool,
}

/// Write `cid` into `dir` under its manifest name, adding ` (n)` before the
/// extension when a different file already has that name
fn export_unique(store: &ContentStore, cid: &Cid, dir: &Path) -> Result<Export> {
    let manifest = store.manifest(cid)?;
    let name = sanitize_filename(&manifest.filename);
    let (stem, ext) = split_name(&name);

    for n in 0..MAX_NAME_ATTEMPTS {
        let filename = if n == 0 {
            name.clone()
        } else {
            format!("{stem} ({n}){ext}")
        };
        let path = dir.join(&filename);

        if !path.exists() {
            store.export_to(cid, &path)?;
            return Ok(Export {
                manifest,
                filename,
                path,
                created: true,
            });
        }
        if same_content(&path, &manifest)? {
            tracing::debug!(path = %path.display(), "identical file already present");
            return Ok(Export {
                manifest,
                filename,
                path,
                created: false,
            });
        }
    }

    Err(NodeError::Io(
        format!("no free file name for {name} in {}", dir.display()).into(),
    ))
}

fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    }
}

fn same_content(path: &Path, manifest: &Manifest) -> Result<bool> {
    let meta = std::fs::metadata(path)?;
    if !meta.is_file() || meta.len() != manifest.file_size {
        return Ok(false);
    }
    let mut hasher = blake3::Hasher::new();
    hasher.update_reader(File::open(path)?)?;
    Ok(*hasher.finalize().as_bytes() == manifest.file_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use async_trait::async_trait;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::sync::broadcast;
    use torrentium_discovery::NodeId;

    const CHUNK: usize = 1024;

    #[derive(Debug, Clone, Copy)]
    enum Mode {
        Serve,
        Stall,
        Corrupt,
        Slow(Duration),
    }

    struct MockPeers {
        source: ContentStore,
        providers: Vec<PeerHandle>,
        mode: Mode,
        chunk_calls: AtomicUsize,
        announced: Mutex<Vec<Cid>>,
    }

    #[async_trait]
    impl PeerTransport for MockPeers {
        fn local_peer(&self) -> PeerHandle {
            PeerHandle::new(NodeId::from_bytes([0u8; 32]), "127.0.0.1:1".parse().unwrap())
        }

        async fn announce(&self, cid: Cid) {
            self.announced.lock().unwrap().push(cid);
        }

        async fn find_providers(&self, _cid: Cid) -> Result<Vec<PeerHandle>> {
            Ok(self.providers.clone())
        }

        async fn fetch_manifest(&self, _peer: &PeerHandle, cid: Cid) -> Result<Manifest> {
            Ok(self.source.manifest(&cid)?)
        }

        async fn fetch_chunk(&self, _peer: &PeerHandle, cid: Cid, index: u64) -> Result<Vec<u8>> {
            self.chunk_calls.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                Mode::Serve => Ok(self.source.get_chunk(&cid, index)?),
                Mode::Stall => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Err(NodeError::timeout("stalled"))
                }
                Mode::Corrupt => {
                    let mut data = self.source.get_chunk(&cid, index)?;
                    data[0] ^= 0xff;
                    Ok(data)
                }
                Mode::Slow(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(self.source.get_chunk(&cid, index)?)
                }
            }
        }
    }

    struct Fixture {
        _dir: TempDir,
        download_dir: PathBuf,
        coordinator: TransferCoordinator,
        peers: Arc<MockPeers>,
        index: Arc<LocalIndex>,
        events: broadcast::Receiver<TransferEvent>,
        cid: Cid,
        content: Vec<u8>,
    }

    fn provider(byte: u8) -> PeerHandle {
        PeerHandle::new(
            NodeId::from_bytes([byte; 32]),
            SocketAddr::from(([127, 0, 0, 1], 9000 + u16::from(byte))),
        )
    }

    async fn fixture(len: usize, mode: Mode, providers: Vec<PeerHandle>) -> Fixture {
        fixture_with(len, mode, providers, |_| {}).await
    }

    async fn fixture_with(
        len: usize,
        mode: Mode,
        providers: Vec<PeerHandle>,
        tweak: impl FnOnce(&mut TransferConfig),
    ) -> Fixture {
        let dir = TempDir::new().unwrap();
        let source = ContentStore::open(dir.path().join("source"), CHUNK).unwrap();
        let content: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, &content).unwrap();
        let (cid, _) = source.add(&path).unwrap();

        let store = ContentStore::open(dir.path().join("local"), CHUNK).unwrap();
        let index = Arc::new(LocalIndex::open(dir.path().join("local/index.json")).await.unwrap());
        let peers = Arc::new(MockPeers {
            source,
            providers,
            mode,
            chunk_calls: AtomicUsize::new(0),
            announced: Mutex::new(Vec::new()),
        });
        let events = EventBus::new(256);
        let download_dir = dir.path().join("downloads");
        let mut config = TransferConfig {
            download_dir: download_dir.clone(),
            chunk_timeout: Duration::from_millis(100),
            retry: RetryConfig {
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                multiplier: 2.0,
                jitter: false,
            },
            ..TransferConfig::default()
        };
        tweak(&mut config);
        let receiver = events.subscribe();
        let coordinator = TransferCoordinator::new(
            store,
            Arc::clone(&index),
            Arc::clone(&peers) as Arc<dyn PeerTransport>,
            events,
            config,
        );

        Fixture {
            _dir: dir,
            download_dir,
            coordinator,
            peers,
            index,
            events: receiver,
            cid,
            content,
        }
    }

    /// Collect events for `cid` up to and including the terminal one
    async fn run_to_end(
        events: &mut broadcast::Receiver<TransferEvent>,
    ) -> (Vec<TransferEvent>, TransferEvent) {
        let mut progress = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
                .await
                .expect("no terminal event")
                .unwrap();
            if event.is_terminal() {
                return (progress, event);
            }
            progress.push(event);
        }
    }

    async fn assert_quiet(events: &mut broadcast::Receiver<TransferEvent>) {
        assert!(
            tokio::time::timeout(Duration::from_millis(200), events.recv())
                .await
                .is_err(),
            "unexpected event after terminal"
        );
    }

    #[tokio::test]
    async fn test_download_success() {
        let mut f = fixture(5000, Mode::Serve, vec![provider(1), provider(2)]).await;

        assert_eq!(f.coordinator.download(f.cid).unwrap(), DownloadStart::Started);
        let (progress, terminal) = run_to_end(&mut f.events).await;

        let counts: Vec<u64> = progress
            .iter()
            .map(|e| match e {
                TransferEvent::DownloadProgress { received, total, .. } => {
                    assert_eq!(*total, 5);
                    *received
                }
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(counts, vec![1, 2, 3, 4, 5]);

        assert_eq!(
            terminal,
            TransferEvent::DownloadComplete {
                cid: f.cid,
                filename: "data.bin".to_string()
            }
        );
        assert_eq!(std::fs::read(f.download_dir.join("data.bin")).unwrap(), f.content);

        let record = f.index.get(&f.cid).await.unwrap();
        assert_eq!(record.file_size, 5000);
        assert_eq!(record.file_hash, blake3::hash(&f.content).to_hex().to_string());
        assert!(!f.coordinator.is_active(&f.cid));

        f.coordinator.shutdown().await;
        assert_eq!(*f.peers.announced.lock().unwrap(), vec![f.cid]);
        assert_quiet(&mut f.events).await;
    }

    #[tokio::test]
    async fn test_no_providers() {
        let mut f = fixture(3000, Mode::Serve, Vec::new()).await;

        f.coordinator.download(f.cid).unwrap();
        let (progress, terminal) = run_to_end(&mut f.events).await;

        assert!(progress.is_empty());
        match terminal {
            TransferEvent::DownloadError { kind, .. } => assert_eq!(kind, ErrorKind::NoProviders),
            other => panic!("unexpected {other:?}"),
        }
        assert!(f.index.is_empty().await);
    }

    #[tokio::test]
    async fn test_chunk_timeouts_exhaust_budget() {
        let mut f = fixture(500, Mode::Stall, vec![provider(1)]).await;

        f.coordinator.download(f.cid).unwrap();
        let (progress, terminal) = run_to_end(&mut f.events).await;

        assert!(progress.is_empty());
        match terminal {
            TransferEvent::DownloadError { kind, .. } => assert_eq!(kind, ErrorKind::Transfer),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(f.peers.chunk_calls.load(Ordering::SeqCst), 3);
        assert!(f.index.is_empty().await);
        assert!(!f.download_dir.join("data.bin").exists());
    }

    #[tokio::test]
    async fn test_corrupt_chunks_are_integrity_failure() {
        let mut f = fixture(2000, Mode::Corrupt, vec![provider(1), provider(2)]).await;

        f.coordinator.download(f.cid).unwrap();
        let (progress, terminal) = run_to_end(&mut f.events).await;

        assert!(progress.is_empty());
        match terminal {
            TransferEvent::DownloadError { kind, .. } => assert_eq!(kind, ErrorKind::Integrity),
            other => panic!("unexpected {other:?}"),
        }
        assert!(f.index.is_empty().await);
    }

    #[tokio::test]
    async fn test_cancel_emits_single_cancelled_error() {
        let mut f = fixture(
            40 * CHUNK,
            Mode::Slow(Duration::from_millis(50)),
            vec![provider(1)],
        )
        .await;

        f.coordinator.download(f.cid).unwrap();
        assert!(f.coordinator.cancel(&f.cid));

        let (_, terminal) = run_to_end(&mut f.events).await;
        match terminal {
            TransferEvent::DownloadError { kind, .. } => assert_eq!(kind, ErrorKind::Cancelled),
            other => panic!("unexpected {other:?}"),
        }
        assert_quiet(&mut f.events).await;
        assert!(f.index.is_empty().await);
        assert!(!f.download_dir.join("data.bin").exists());
        assert!(!f.coordinator.cancel(&f.cid));
    }

    #[tokio::test]
    async fn test_download_timeout_leaves_nothing_behind() {
        let mut f = fixture_with(
            40 * CHUNK,
            Mode::Slow(Duration::from_millis(50)),
            vec![provider(1)],
            |config| config.download_timeout = Some(Duration::from_millis(200)),
        )
        .await;

        f.coordinator.download(f.cid).unwrap();
        let (progress, terminal) = run_to_end(&mut f.events).await;

        assert!(progress.len() < 40);
        match terminal {
            TransferEvent::DownloadError { kind, .. } => assert_eq!(kind, ErrorKind::Timeout),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!f.coordinator.is_active(&f.cid));

        // Nothing may land once the timeout has been reported
        f.coordinator.shutdown().await;
        assert_quiet(&mut f.events).await;
        assert!(f.index.is_empty().await);
        assert!(!f.download_dir.join("data.bin").exists());
        assert!(f.peers.announced.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_within_timeout_completes() {
        let mut f = fixture_with(3 * CHUNK, Mode::Serve, vec![provider(1)], |config| {
            config.download_timeout = Some(Duration::from_secs(10));
        })
        .await;

        f.coordinator.download(f.cid).unwrap();
        let (_, terminal) = run_to_end(&mut f.events).await;
        assert!(matches!(terminal, TransferEvent::DownloadComplete { .. }));
        assert_eq!(f.index.len().await, 1);
    }

    #[tokio::test]
    async fn test_cancel_and_wait_returns_after_terminal_event() {
        let mut f = fixture(
            40 * CHUNK,
            Mode::Slow(Duration::from_millis(50)),
            vec![provider(1)],
        )
        .await;

        f.coordinator.download(f.cid).unwrap();
        assert!(f.coordinator.cancel_and_wait(&f.cid).await);
        assert!(!f.coordinator.is_active(&f.cid));

        // The terminal event is already queued when the wait ends
        let mut last = None;
        while let Ok(event) = f.events.try_recv() {
            last = Some(event);
        }
        match last {
            Some(TransferEvent::DownloadError { kind, .. }) => assert_eq!(kind, ErrorKind::Cancelled),
            other => panic!("unexpected {other:?}"),
        }
        assert!(f.index.is_empty().await);
        assert!(!f.coordinator.cancel_and_wait(&f.cid).await);
    }

    #[tokio::test]
    async fn test_second_download_joins() {
        let mut f = fixture(
            8 * CHUNK,
            Mode::Slow(Duration::from_millis(20)),
            vec![provider(1)],
        )
        .await;

        assert_eq!(f.coordinator.download(f.cid).unwrap(), DownloadStart::Started);
        assert_eq!(f.coordinator.download(f.cid).unwrap(), DownloadStart::Joined);
        assert!(f.coordinator.is_active(&f.cid));
        assert_eq!(f.coordinator.sessions().len(), 1);

        let (progress, terminal) = run_to_end(&mut f.events).await;
        assert_eq!(progress.len(), 8);
        assert!(matches!(terminal, TransferEvent::DownloadComplete { .. }));
        assert_quiet(&mut f.events).await;
        assert_eq!(f.peers.chunk_calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_stored_content_skips_network() {
        let mut f = fixture(3000, Mode::Serve, vec![provider(1)]).await;

        f.coordinator.download(f.cid).unwrap();
        run_to_end(&mut f.events).await;
        let calls = f.peers.chunk_calls.load(Ordering::SeqCst);

        f.coordinator.download(f.cid).unwrap();
        let (progress, terminal) = run_to_end(&mut f.events).await;

        assert!(progress.is_empty());
        assert_eq!(
            terminal,
            TransferEvent::DownloadComplete {
                cid: f.cid,
                filename: "data.bin".to_string()
            }
        );
        assert_eq!(f.peers.chunk_calls.load(Ordering::SeqCst), calls);
        assert_eq!(f.index.len().await, 1);
    }

    #[tokio::test]
    async fn test_existing_different_file_not_clobbered() {
        let mut f = fixture(1500, Mode::Serve, vec![provider(1)]).await;
        std::fs::create_dir_all(&f.download_dir).unwrap();
        std::fs::write(f.download_dir.join("data.bin"), b"something else").unwrap();

        f.coordinator.download(f.cid).unwrap();
        let (_, terminal) = run_to_end(&mut f.events).await;

        assert_eq!(
            terminal,
            TransferEvent::DownloadComplete {
                cid: f.cid,
                filename: "data (1).bin".to_string()
            }
        );
        assert_eq!(
            std::fs::read(f.download_dir.join("data.bin")).unwrap(),
            b"something else"
        );
        assert_eq!(std::fs::read(f.download_dir.join("data (1).bin")).unwrap(), f.content);
    }

    #[tokio::test]
    async fn test_download_after_shutdown_rejected() {
        let f = fixture(100, Mode::Serve, vec![provider(1)]).await;
        f.coordinator.shutdown().await;
        assert!(matches!(f.coordinator.download(f.cid), Err(NodeError::Cancelled)));
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("photo.jpg"), ("photo", ".jpg"));
        assert_eq!(split_name("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_name("README"), ("README", ""));
    }
}
