//! # Torrentium Files
//!
//! Content store for the Torrentium engine.
//!
//! This crate provides:
//! - File chunking with configurable chunk size
//! - BLAKE3 tree hashing and CID derivation
//! - Self-certifying manifests
//! - On-disk chunk storage with staged, all-or-nothing imports
//! - Lazy, verified reassembly
//!
//! ## Layout
//!
//! ```text
//! <root>/
//! ├── blocks/<cid>/manifest.json
//! ├── blocks/<cid>/<index>.chunk
//! └── staging/<random>/          (transient, never visible as content)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunker;
pub mod cid;
pub mod error;
pub mod hasher;
pub mod manifest;
pub mod store;
pub mod tree_hash;

pub use chunker::FileChunker;
pub use cid::{Cid, CidError};
pub use error::{Result, StoreError};
pub use manifest::Manifest;
pub use store::{ChunkStream, ContentStore, Staging};
pub use tree_hash::{FileTreeHash, IncrementalTreeHasher, compute_merkle_root};

/// Default chunk size (256 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Largest accepted chunk size (16 MiB)
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;
