//! Discovery error types.

use thiserror::Error;

/// Discovery errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    /// Text is not a 64-character hex node id
    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    /// Attempted to add the local node to its own peer book
    #[error("refusing to add the local node as a peer")]
    SelfPeer,

    /// Peer book is at capacity and no entry could be evicted
    #[error("peer book full ({0} entries)")]
    PeerBookFull(usize),
}
