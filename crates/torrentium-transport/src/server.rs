//! Inbound connections.

use crate::TransportConfig;
use crate::codec::{read_frame, write_frame};
use crate::protocol::{Request, Response};
use crate::transport::{Counters, StatsHandle, TransportError, TransportResult, TransportStats};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Serves decoded requests
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Produce the response for one request from `remote`
    async fn handle(&self, request: Request, remote: SocketAddr) -> Response;
}

/// TCP listener dispatching to a [`RequestHandler`]
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    config: TransportConfig,
    counters: Arc<Counters>,
}

impl Server {
    /// Bind to `addr` (port 0 picks a free port)
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::BindFailed`] if the address is unavailable.
    pub async fn bind(addr: SocketAddr, config: TransportConfig) -> TransportResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(format!("{addr}: {e}")))?;
        Ok(Self {
            listener,
            config,
            counters: Arc::new(Counters::default()),
        })
    }

    /// Bound address
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the address cannot be determined.
    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Statistics for inbound traffic
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }

    /// Handle for reading statistics after the server is moved into `serve`
    #[must_use]
    pub fn stats_handle(&self) -> StatsHandle {
        StatsHandle(Arc::clone(&self.counters))
    }

    /// Accept connections until `shutdown` fires
    ///
    /// Each connection runs in its own task and serves requests sequentially.
    /// Connections beyond `max_connections` wait for a free slot.
    pub async fn serve<H: RequestHandler>(self, handler: Arc<H>, shutdown: CancellationToken) {
        let slots = Arc::new(Semaphore::new(self.config.max_connections.max(1)));
        let local = self.listener.local_addr().ok();
        tracing::info!(addr = ?local, "listening for peers");

        loop {
            let permit = tokio::select! {
                () = shutdown.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, remote) = tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let handler = Arc::clone(&handler);
            let counters = Arc::clone(&self.counters);
            let config = self.config.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let _permit = permit;
                tokio::select! {
                    () = shutdown.cancelled() => {}
                    result = serve_connection(stream, remote, handler, counters, config) => {
                        if let Err(e) = result {
                            tracing::debug!(%remote, error = %e, "connection closed with error");
                        }
                    }
                }
            });
        }

        tracing::info!(addr = ?local, "listener stopped");
    }
}

async fn serve_connection<H: RequestHandler>(
    mut stream: TcpStream,
    remote: SocketAddr,
    handler: Arc<H>,
    counters: Arc<Counters>,
    config: TransportConfig,
) -> TransportResult<()> {
    stream.set_nodelay(true)?;

    loop {
        let frame = match tokio::time::timeout(config.idle_timeout, read_frame(&mut stream)).await {
            Err(_) => {
                tracing::trace!(%remote, "idle connection closed");
                return Ok(());
            }
            Ok(Ok(None)) => return Ok(()),
            Ok(Ok(Some(frame))) => frame,
            Ok(Err(e)) => {
                counters.record_recv_error();
                return Err(e);
            }
        };
        counters.record_recv(frame.len());

        let response = match Request::from_bytes(&frame) {
            Ok(request) => {
                tracing::trace!(%remote, request = request.message_type(), "serving request");
                handler.handle(request, remote).await
            }
            Err(e) => {
                counters.record_recv_error();
                tracing::debug!(%remote, error = %e, "malformed request");
                Response::Error {
                    message: "malformed request".to_string(),
                }
            }
        };

        let payload = response.to_bytes()?;
        if let Err(e) = write_frame(&mut stream, &payload).await {
            counters.record_send_error();
            return Err(e);
        }
        counters.record_send(payload.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::PeerClient;
    use std::time::Duration;
    use torrentium_discovery::{NodeId, PeerHandle};
    use torrentium_files::Cid;

    struct EchoHandler {
        id: NodeId,
    }

    #[async_trait]
    impl RequestHandler for EchoHandler {
        async fn handle(&self, request: Request, _remote: SocketAddr) -> Response {
            match request {
                Request::Ping => Response::Pong,
                Request::Hello { from, .. } => Response::Peers {
                    id: self.id,
                    peers: vec![from],
                },
                Request::GetChunk { index, .. } if index < 3 => Response::Chunk {
                    index,
                    data: vec![index as u8; 16],
                },
                Request::GetChunk { .. } => Response::NotFound,
                Request::Announce { .. } => Response::Ack,
                _ => Response::Error {
                    message: "unsupported".to_string(),
                },
            }
        }
    }

    struct StallHandler;

    #[async_trait]
    impl RequestHandler for StallHandler {
        async fn handle(&self, _request: Request, _remote: SocketAddr) -> Response {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Response::Pong
        }
    }

    async fn spawn<H: RequestHandler>(handler: H) -> (SocketAddr, CancellationToken) {
        let server = Server::bind("127.0.0.1:0".parse().unwrap(), TransportConfig::default())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(server.serve(Arc::new(handler), shutdown.clone()));
        (addr, shutdown)
    }

    #[tokio::test]
    async fn test_request_response_roundtrip() {
        let id = NodeId::random();
        let (addr, shutdown) = spawn(EchoHandler { id }).await;
        let client = PeerClient::new(Duration::from_secs(5));

        client.ping(addr).await.unwrap();

        let me = PeerHandle::new(NodeId::random(), "127.0.0.1:9".parse().unwrap());
        let (remote_id, peers) = client.hello(addr, me).await.unwrap();
        assert_eq!(remote_id, id);
        assert_eq!(peers, vec![me]);

        let cid = Cid::from_digest([1u8; 32]);
        assert_eq!(client.get_chunk(addr, cid, 2).await.unwrap(), vec![2u8; 16]);
        assert!(matches!(
            client.get_chunk(addr, cid, 7).await,
            Err(TransportError::NotFound)
        ));
        assert!(matches!(
            client.get_manifest(addr, cid).await,
            Err(TransportError::Remote(_))
        ));

        let stats = client.stats();
        assert_eq!(stats.frames_sent, 5);
        assert_eq!(stats.frames_received, 5);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let (addr, shutdown) = spawn(StallHandler).await;
        let client = PeerClient::new(Duration::from_millis(100));

        let err = client.ping(addr).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
        assert!(err.is_transient());
        assert_eq!(client.stats().timeouts, 1);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_connection_refused_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = PeerClient::new(Duration::from_secs(2));
        let err = client.ping(addr).await.unwrap_err();
        assert!(err.is_unreachable(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_malformed_request_gets_error_reply() {
        let (addr, shutdown) = spawn(EchoHandler { id: NodeId::random() }).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        write_frame(&mut stream, &[0xff, 0xff, 0xff, 0xff]).await.unwrap();
        let frame = read_frame(&mut stream).await.unwrap().unwrap();
        assert!(matches!(
            Response::from_bytes(&frame).unwrap(),
            Response::Error { .. }
        ));

        // Connection stays usable
        write_frame(&mut stream, &Request::Ping.to_bytes().unwrap()).await.unwrap();
        let frame = read_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(Response::from_bytes(&frame).unwrap(), Response::Pong);
        shutdown.cancel();
    }
}
