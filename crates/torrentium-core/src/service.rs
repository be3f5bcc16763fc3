//! Inbound request handling: serves discovery queries, manifests and chunks
//! to other nodes.

use crate::peer::{NetworkPeers, PeerTransport};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use torrentium_discovery::{NodeId, PeerHandle};
use torrentium_files::{ContentStore, StoreError};
use torrentium_transport::{PROTOCOL_VERSION, Request, RequestHandler, Response};

/// [`RequestHandler`] backed by the local content store and peer tables
#[derive(Debug, Clone)]
pub struct NodeService {
    store: ContentStore,
    peers: Arc<NetworkPeers>,
}

impl NodeService {
    /// Serve `store` and answer discovery queries from `peers`
    #[must_use]
    pub fn new(store: ContentStore, peers: Arc<NetworkPeers>) -> Self {
        Self { store, peers }
    }

    async fn hello(&self, version: u16, from: PeerHandle, remote: SocketAddr) -> Response {
        if version != PROTOCOL_VERSION {
            tracing::warn!(%remote, version, "peer speaks unsupported protocol version");
            return Response::Error {
                message: format!("unsupported protocol version {version}, expected {PROTOCOL_VERSION}"),
            };
        }

        let from = reachable(from, remote);
        self.peers.add_peer(from).await;

        let peers = self
            .peers
            .closest_peers(&from.id)
            .await
            .into_iter()
            .filter(|p| p.id != from.id)
            .collect();
        Response::Peers {
            id: self.peers.local_peer().id,
            peers,
        }
    }

    async fn find_providers(&self, cid: torrentium_files::Cid) -> Response {
        let local = self.peers.local_peer();
        let mut providers: Vec<PeerHandle> = self
            .peers
            .providers_of(&cid)
            .await
            .into_iter()
            .filter(|p| p.id != local.id)
            .collect();

        let store = self.store.clone();
        let have_it = tokio::task::spawn_blocking(move || store.contains(&cid))
            .await
            .unwrap_or(false);
        if have_it {
            providers.insert(0, local);
        }

        let closer = self.peers.closest_peers(&NodeId::from_cid(&cid)).await;
        Response::Providers { providers, closer }
    }

    async fn blocking<F>(&self, what: &'static str, f: F) -> Response
    where
        F: FnOnce(ContentStore) -> Result<Response, StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || f(store)).await {
            Ok(Ok(response)) => response,
            Ok(Err(
                StoreError::ContentNotFound(_)
                | StoreError::ChunkNotFound { .. }
                | StoreError::FileNotFound(_),
            )) => Response::NotFound,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "failed to serve {what}");
                Response::Error {
                    message: e.to_string(),
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "{what} task failed");
                Response::Error {
                    message: "internal error".to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl RequestHandler for NodeService {
    async fn handle(&self, request: Request, remote: SocketAddr) -> Response {
        tracing::trace!(%remote, request = request.message_type(), "handling request");
        match request {
            Request::Hello { version, from } => self.hello(version, from, remote).await,
            Request::Announce { cid, provider } => {
                let provider = reachable(provider, remote);
                self.peers.record_provider(cid, provider).await;
                self.peers.add_peer(provider).await;
                tracing::debug!(cid = %cid.short(), %provider, "provider announced");
                Response::Ack
            }
            Request::FindProviders { cid } => self.find_providers(cid).await,
            Request::GetManifest { cid } => {
                self.blocking("manifest", move |store| {
                    store.manifest(&cid).map(Response::Manifest)
                })
                .await
            }
            Request::GetChunk { cid, index } => {
                self.blocking("chunk", move |store| {
                    store
                        .get_chunk(&cid, index)
                        .map(|data| Response::Chunk { index, data })
                })
                .await
            }
            Request::Ping => Response::Pong,
        }
    }
}

/// A peer listening on 0.0.0.0 is reachable at the address it dialled from
fn reachable(mut peer: PeerHandle, remote: SocketAddr) -> PeerHandle {
    if peer.addr.ip().is_unspecified() {
        peer.addr.set_ip(remote.ip());
    }
    peer
}
