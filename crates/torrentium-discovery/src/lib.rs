//! # Torrentium Discovery
//!
//! Peer discovery layer for the Torrentium engine.
//!
//! This crate provides:
//! - 256-bit node identifiers with the XOR distance metric
//! - A peer book of known endpoints, queried by closeness to a key
//! - A provider table mapping CIDs to the peers that serve them, with TTL
//!
//! CIDs and node ids share one key space: the 32-byte digest of a CID is
//! used directly as a [`NodeId`], so "the peers closest to a CID" are the
//! ones to announce it to and ask about it.
//!
//! ## Example
//!
//! ```
//! use torrentium_discovery::{NodeId, PeerBook, PeerHandle, K};
//!
//! let local = NodeId::random();
//! let mut book = PeerBook::new(local);
//! book.insert(PeerHandle::new(NodeId::random(), "127.0.0.1:7070".parse().unwrap()))
//!     .unwrap();
//!
//! let closest = book.closest(&NodeId::random(), K);
//! assert_eq!(closest.len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod node_id;
pub mod peer_book;
pub mod providers;

pub use error::DiscoveryError;
pub use node_id::NodeId;
pub use peer_book::{PeerBook, PeerHandle};
pub use providers::{DEFAULT_PROVIDER_TTL, ProviderTable};

/// Replication factor: how many closest peers receive an announce or query
pub const K: usize = 8;
