//! Transport errors and statistics.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error on an established connection
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Listener or connection closed
    #[error("Transport is closed")]
    Closed,

    /// Address binding failed
    #[error("Failed to bind to address: {0}")]
    BindFailed(String),

    /// Connection could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Exchange did not finish in time
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Frame length exceeds the limit
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared size
        size: usize,
        /// Limit
        max: usize,
    },

    /// Message could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Frame did not decode to a message
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Remote peer does not have what was asked for
    #[error("Not found on peer")]
    NotFound,

    /// Remote peer reported an error
    #[error("Remote error: {0}")]
    Remote(String),

    /// Remote answered with the wrong message type
    #[error("Unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        /// Expected message type
        expected: &'static str,
        /// Received message type
        actual: &'static str,
    },
}

impl TransportError {
    /// Whether trying again (possibly against another peer) can succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Closed | Self::ConnectionFailed(_) | Self::Timeout(_) | Self::Remote(_)
        )
    }

    /// Whether the peer could not be reached at all
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_) | Self::Io(_) | Self::Closed)
    }

    /// Whether the peer sent something that violates the protocol
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::FrameTooLarge { .. } | Self::Deserialization(_) | Self::UnexpectedResponse { .. }
        )
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Total payload bytes sent
    pub bytes_sent: u64,
    /// Total payload bytes received
    pub bytes_received: u64,
    /// Frames sent
    pub frames_sent: u64,
    /// Frames received
    pub frames_received: u64,
    /// Failed sends or connects
    pub send_errors: u64,
    /// Failed or malformed receives
    pub recv_errors: u64,
    /// Exchanges that hit the timeout
    pub timeouts: u64,
}

/// Shareable read handle on live counters
///
/// Outlives the [`crate::Server`] it came from, so statistics stay available
/// after `serve` takes ownership of the server.
#[derive(Debug, Clone)]
pub struct StatsHandle(pub(crate) Arc<Counters>);

impl StatsHandle {
    /// Current values
    #[must_use]
    pub fn snapshot(&self) -> TransportStats {
        self.0.snapshot()
    }
}

/// Live counters behind [`TransportStats`]
#[derive(Debug, Default)]
pub(crate) struct Counters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    send_errors: AtomicU64,
    recv_errors: AtomicU64,
    timeouts: AtomicU64,
}

impl Counters {
    pub(crate) fn record_send(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recv(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recv_error(&self) {
        self.recv_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> TransportStats {
        TransportStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            recv_errors: self.recv_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = Counters::default();
        assert_eq!(counters.snapshot(), TransportStats::default());

        counters.record_send(100);
        counters.record_recv(200);
        counters.record_send_error();
        counters.record_recv_error();
        counters.record_timeout();

        let stats = counters.snapshot();
        assert_eq!(stats.bytes_sent, 100);
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.bytes_received, 200);
        assert_eq!(stats.frames_received, 1);
        assert_eq!(stats.send_errors, 1);
        assert_eq!(stats.recv_errors, 1);
        assert_eq!(stats.timeouts, 1);
    }

    #[test]
    fn test_error_classification() {
        assert!(TransportError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(TransportError::ConnectionFailed("refused".into()).is_unreachable());
        assert!(!TransportError::NotFound.is_transient());
        assert!(
            TransportError::FrameTooLarge { size: 10, max: 5 }.is_protocol_violation()
        );
    }
}
