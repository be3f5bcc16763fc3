//! Outbound requests.

use crate::codec::{read_frame, write_frame};
use crate::protocol::{PROTOCOL_VERSION, Request, Response};
use crate::transport::{Counters, TransportError, TransportResult, TransportStats};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use torrentium_discovery::{NodeId, PeerHandle};
use torrentium_files::{Cid, Manifest};

/// Request client
///
/// Each call opens a connection, performs one exchange and closes it. The
/// whole exchange, including connect, is bounded by the request timeout.
///
/// # Examples
///
/// ```no_run
/// use torrentium_transport::PeerClient;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = PeerClient::new(Duration::from_secs(5));
/// client.ping("127.0.0.1:7070".parse()?).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PeerClient {
    timeout: Duration,
    counters: Arc<Counters>,
}

impl PeerClient {
    /// Create a client with the given per-request timeout
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Per-request timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Statistics for every exchange made through this client (and its clones)
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }

    /// Send one request and wait for its response
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if the exchange exceeds the timeout
    /// - [`TransportError::ConnectionFailed`] if the peer cannot be reached
    /// - [`TransportError::NotFound`] / [`TransportError::Remote`] for
    ///   negative replies
    pub async fn request(&self, addr: SocketAddr, request: &Request) -> TransportResult<Response> {
        match tokio::time::timeout(self.timeout, self.exchange(addr, request)).await {
            Ok(result) => result?.into_result(),
            Err(_) => {
                self.counters.record_timeout();
                tracing::debug!(%addr, request = request.message_type(), "request timed out");
                Err(TransportError::Timeout(self.timeout))
            }
        }
    }

    async fn exchange(&self, addr: SocketAddr, request: &Request) -> TransportResult<Response> {
        let payload = request.to_bytes()?;

        let mut stream = TcpStream::connect(addr).await.map_err(|e| {
            self.counters.record_send_error();
            TransportError::ConnectionFailed(format!("{addr}: {e}"))
        })?;
        stream.set_nodelay(true)?;

        if let Err(e) = write_frame(&mut stream, &payload).await {
            self.counters.record_send_error();
            return Err(e);
        }
        self.counters.record_send(payload.len());

        let frame = match read_frame(&mut stream).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.counters.record_recv_error();
                return Err(TransportError::Closed);
            }
            Err(e) => {
                self.counters.record_recv_error();
                return Err(e);
            }
        };
        self.counters.record_recv(frame.len());

        Response::from_bytes(&frame).inspect_err(|_| self.counters.record_recv_error())
    }

    /// Introduce ourselves; returns the peer's id and the peers it knows
    ///
    /// # Errors
    ///
    /// See [`PeerClient::request`].
    pub async fn hello(
        &self,
        addr: SocketAddr,
        from: PeerHandle,
    ) -> TransportResult<(NodeId, Vec<PeerHandle>)> {
        let request = Request::Hello {
            version: PROTOCOL_VERSION,
            from,
        };
        match self.request(addr, &request).await? {
            Response::Peers { id, peers } => Ok((id, peers)),
            other => Err(unexpected("Peers", &other)),
        }
    }

    /// Tell a peer that `provider` serves `cid`
    ///
    /// # Errors
    ///
    /// See [`PeerClient::request`].
    pub async fn announce(
        &self,
        addr: SocketAddr,
        cid: Cid,
        provider: PeerHandle,
    ) -> TransportResult<()> {
        match self.request(addr, &Request::Announce { cid, provider }).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected("Ack", &other)),
        }
    }

    /// Ask a peer who provides `cid`; returns `(providers, closer peers)`
    ///
    /// # Errors
    ///
    /// See [`PeerClient::request`].
    pub async fn find_providers(
        &self,
        addr: SocketAddr,
        cid: Cid,
    ) -> TransportResult<(Vec<PeerHandle>, Vec<PeerHandle>)> {
        match self.request(addr, &Request::FindProviders { cid }).await? {
            Response::Providers { providers, closer } => Ok((providers, closer)),
            other => Err(unexpected("Providers", &other)),
        }
    }

    /// Fetch a manifest (unverified; callers check it against the CID)
    ///
    /// # Errors
    ///
    /// See [`PeerClient::request`].
    pub async fn get_manifest(&self, addr: SocketAddr, cid: Cid) -> TransportResult<Manifest> {
        match self.request(addr, &Request::GetManifest { cid }).await? {
            Response::Manifest(manifest) => Ok(manifest),
            other => Err(unexpected("Manifest", &other)),
        }
    }

    /// Fetch one chunk (unverified)
    ///
    /// # Errors
    ///
    /// See [`PeerClient::request`]. A reply for a different index is an
    /// [`TransportError::UnexpectedResponse`].
    pub async fn get_chunk(&self, addr: SocketAddr, cid: Cid, index: u64) -> TransportResult<Vec<u8>> {
        match self.request(addr, &Request::GetChunk { cid, index }).await? {
            Response::Chunk { index: got, data } if got == index => Ok(data),
            Response::Chunk { .. } => Err(TransportError::UnexpectedResponse {
                expected: "Chunk for requested index",
                actual: "Chunk for another index",
            }),
            other => Err(unexpected("Chunk", &other)),
        }
    }

    /// Liveness probe
    ///
    /// # Errors
    ///
    /// See [`PeerClient::request`].
    pub async fn ping(&self, addr: SocketAddr) -> TransportResult<()> {
        match self.request(addr, &Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(unexpected("Pong", &other)),
        }
    }
}

fn unexpected(expected: &'static str, actual: &Response) -> TransportError {
    TransportError::UnexpectedResponse {
        expected,
        actual: actual.message_type(),
    }
}
