//! # Torrentium Core
//!
//! Engine layer of Torrentium: everything between the content store and a
//! user interface.
//!
//! This crate provides:
//! - [`index::LocalIndex`]: durable record of files shared or downloaded here
//! - [`peer::PeerTransport`]: the seam between transfers and the network
//! - [`coordinator::TransferCoordinator`]: per-CID download state machines
//! - [`events`]: progress, completion and failure notifications
//! - [`node::Node`]: the facade a UI or CLI drives
//!
//! ## Example
//!
//! ```no_run
//! use torrentium_core::{Node, NodeConfig};
//!
//! # async fn example() -> torrentium_core::Result<()> {
//! let node = Node::start(NodeConfig::default()).await?;
//! let mut events = node.subscribe();
//!
//! let cid = node.add_file("holiday.jpg").await?;
//! println!("sharing {cid}");
//!
//! node.download_file("f01551e20...")?;
//! while let Ok(event) = events.recv().await {
//!     println!("{}", serde_json::to_string(&event).unwrap());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod index;
pub mod multi_peer;
pub mod node;
pub mod peer;
pub mod service;
pub mod transfer;

pub use config::{DiscoveryConfig, NodeConfig, RetryConfig, StorageConfig, TransferConfig};
pub use coordinator::{DownloadStart, SessionProgress, TransferCoordinator};
pub use error::{ErrorKind, NodeError, Result};
pub use events::{EventBus, TransferEvent};
pub use index::{FileRecord, LocalIndex};
pub use node::{LocalFile, Node};
pub use peer::{NetworkPeers, PeerTransport};
pub use transfer::{TransferSession, TransferStatus};

pub use torrentium_discovery::{NodeId, PeerHandle};
pub use torrentium_files::{Cid, Manifest};
