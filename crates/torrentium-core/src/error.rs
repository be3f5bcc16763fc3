//! Error types for the engine
//!
//! Every failure surfaced to a caller or carried in a `download-error` event
//! is a [`NodeError`]. Its [`ErrorKind`] is the stable, serializable category
//! a UI switches on.
//!
//! # Error Categories
//!
//! - **Transient**: may succeed on retry, possibly against another peer
//!   (timeouts, unreachable peers, transfer hiccups)
//! - **Permanent**: will not succeed without intervention (bad CID, corrupt
//!   index, integrity failure, missing content)
//!
//! # Example
//!
//! ```
//! use torrentium_core::{ErrorKind, NodeError};
//!
//! let err = NodeError::timeout("chunk request");
//! assert!(err.is_transient());
//! assert_eq!(err.kind(), ErrorKind::Timeout);
//! ```

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use torrentium_files::{Cid, CidError, StoreError};
use torrentium_transport::TransportError;

/// Stable error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// File, CID or chunk is absent
    NotFound,
    /// Local disk failure
    Io,
    /// Hash mismatch
    Integrity,
    /// Nobody provides the CID
    NoProviders,
    /// Peer could not be reached
    PeerUnreachable,
    /// Deadline exceeded
    Timeout,
    /// Transfer gave up after retries
    Transfer,
    /// Download was cancelled
    Cancelled,
    /// Malformed CID text
    InvalidCid,
    /// Rejected configuration
    InvalidConfig,
    /// Unreadable local index
    Corrupt,
    /// Peer violated the wire protocol
    Protocol,
}

impl ErrorKind {
    /// Wire name of the kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "notFound",
            ErrorKind::Io => "io",
            ErrorKind::Integrity => "integrity",
            ErrorKind::NoProviders => "noProviders",
            ErrorKind::PeerUnreachable => "peerUnreachable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Transfer => "transfer",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidCid => "invalidCid",
            ErrorKind::InvalidConfig => "invalidConfig",
            ErrorKind::Corrupt => "corrupt",
            ErrorKind::Protocol => "protocol",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in engine operations
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    /// File, CID or chunk not found
    #[error("Not found: {0}")]
    NotFound(Cow<'static, str>),

    /// Local I/O failure
    #[error("File I/O error: {0}")]
    Io(Cow<'static, str>),

    /// Content failed verification
    #[error("Integrity check failed: {0}")]
    Integrity(Cow<'static, str>),

    /// No peer provides the CID
    #[error("No providers found for {}", .0.short())]
    NoProviders(Cid),

    /// Peer could not be reached
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(Cow<'static, str>),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(Cow<'static, str>),

    /// Transfer failed
    #[error("Transfer error: {0}")]
    Transfer(Cow<'static, str>),

    /// Download cancelled by request
    #[error("Download cancelled")]
    Cancelled,

    /// Malformed CID
    #[error("Invalid CID: {0}")]
    InvalidCid(Cow<'static, str>),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// Local index could not be parsed
    #[error("Local index is corrupt: {0}")]
    Corrupt(Cow<'static, str>),

    /// Malformed message from a peer
    #[error("Protocol error: {0}")]
    Protocol(Cow<'static, str>),
}

impl NodeError {
    /// Stable category of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            NodeError::NotFound(_) => ErrorKind::NotFound,
            NodeError::Io(_) => ErrorKind::Io,
            NodeError::Integrity(_) => ErrorKind::Integrity,
            NodeError::NoProviders(_) => ErrorKind::NoProviders,
            NodeError::PeerUnreachable(_) => ErrorKind::PeerUnreachable,
            NodeError::Timeout(_) => ErrorKind::Timeout,
            NodeError::Transfer(_) => ErrorKind::Transfer,
            NodeError::Cancelled => ErrorKind::Cancelled,
            NodeError::InvalidCid(_) => ErrorKind::InvalidCid,
            NodeError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            NodeError::Corrupt(_) => ErrorKind::Corrupt,
            NodeError::Protocol(_) => ErrorKind::Protocol,
        }
    }

    /// Returns true if this error is transient and may succeed on retry
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NodeError::Timeout(_) | NodeError::PeerUnreachable(_) | NodeError::Transfer(_)
        )
    }

    /// Returns true if this error will not succeed on retry
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            NodeError::InvalidCid(_)
                | NodeError::InvalidConfig(_)
                | NodeError::Corrupt(_)
                | NodeError::Integrity(_)
                | NodeError::NotFound(_)
                | NodeError::Cancelled
        )
    }

    /// Create a transfer error with static context (zero allocation)
    #[must_use]
    pub const fn transfer(context: &'static str) -> Self {
        NodeError::Transfer(Cow::Borrowed(context))
    }

    /// Create a timeout error with static context (zero allocation)
    #[must_use]
    pub const fn timeout(context: &'static str) -> Self {
        NodeError::Timeout(Cow::Borrowed(context))
    }

    /// Create a not-found error with static context (zero allocation)
    #[must_use]
    pub const fn not_found(context: &'static str) -> Self {
        NodeError::NotFound(Cow::Borrowed(context))
    }

    /// Create an invalid configuration error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_config(context: &'static str) -> Self {
        NodeError::InvalidConfig(Cow::Borrowed(context))
    }

    pub(crate) fn task_join(err: &tokio::task::JoinError) -> Self {
        NodeError::Io(Cow::Owned(format!("background task failed: {err}")))
    }
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::Io(Cow::Owned(err.to_string()))
    }
}

impl From<CidError> for NodeError {
    fn from(err: CidError) -> Self {
        NodeError::InvalidCid(Cow::Owned(err.to_string()))
    }
}

impl From<StoreError> for NodeError {
    fn from(err: StoreError) -> Self {
        let message = Cow::Owned(err.to_string());
        match err {
            StoreError::FileNotFound(_)
            | StoreError::ContentNotFound(_)
            | StoreError::ChunkNotFound { .. } => NodeError::NotFound(message),
            StoreError::Integrity { .. } => NodeError::Integrity(message),
            StoreError::Incomplete { .. } => NodeError::Transfer(message),
            StoreError::Manifest(_) => NodeError::Corrupt(message),
            StoreError::InvalidChunkSize(_) => NodeError::InvalidConfig(message),
            StoreError::Io(_) => NodeError::Io(message),
        }
    }
}

impl From<TransportError> for NodeError {
    fn from(err: TransportError) -> Self {
        let message = Cow::Owned(err.to_string());
        match err {
            TransportError::Timeout(_) => NodeError::Timeout(message),
            TransportError::ConnectionFailed(_) | TransportError::Io(_) | TransportError::Closed => {
                NodeError::PeerUnreachable(message)
            }
            TransportError::NotFound => NodeError::NotFound(message),
            TransportError::Remote(_) => NodeError::Transfer(message),
            TransportError::BindFailed(_) => NodeError::Io(message),
            TransportError::FrameTooLarge { .. }
            | TransportError::Serialization(_)
            | TransportError::Deserialization(_)
            | TransportError::UnexpectedResponse { .. } => NodeError::Protocol(message),
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_transient_errors() {
        assert!(NodeError::timeout("test").is_transient());
        assert!(NodeError::PeerUnreachable(Cow::Borrowed("test")).is_transient());
        assert!(NodeError::transfer("test").is_transient());
    }

    #[test]
    fn test_mutual_exclusivity() {
        let errors = [
            NodeError::timeout("t"),
            NodeError::transfer("t"),
            NodeError::PeerUnreachable(Cow::Borrowed("t")),
            NodeError::not_found("t"),
            NodeError::Integrity(Cow::Borrowed("t")),
            NodeError::invalid_config("t"),
            NodeError::Cancelled,
        ];

        for err in &errors {
            assert!(
                !(err.is_transient() && err.is_permanent()),
                "{err} is both transient and permanent"
            );
        }
    }

    #[test]
    fn test_kind_serializes_camel_case() {
        let json = serde_json::to_string(&ErrorKind::NoProviders).unwrap();
        assert_eq!(json, "\"noProviders\"");
        assert_eq!(ErrorKind::PeerUnreachable.to_string(), "peerUnreachable");
    }

    #[test]
    fn test_store_error_conversion() {
        let cid = Cid::from_digest([1u8; 32]);
        let err: NodeError = StoreError::ContentNotFound(cid).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err: NodeError = StoreError::Integrity {
            cid,
            detail: "bad".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: NodeError = TransportError::Timeout(Duration::from_secs(1)).into();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        let err: NodeError = TransportError::ConnectionFailed("refused".into()).into();
        assert_eq!(err.kind(), ErrorKind::PeerUnreachable);

        let err: NodeError = TransportError::Deserialization("junk".into()).into();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_no_providers_display() {
        let err = NodeError::NoProviders(Cid::from_digest([0xab; 32]));
        assert!(err.to_string().contains("abababab"));
        assert_eq!(err.kind(), ErrorKind::NoProviders);
    }
}
