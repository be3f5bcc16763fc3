//! BLAKE3 tree hashing for content addressing.
//!
//! Each file is divided into chunks and each chunk is hashed individually.
//! The chunk hashes form the leaf nodes of a binary tree, with parent nodes
//! computed by hashing the concatenation of their children under a separate
//! prefix. The root, together with the file and chunk sizes, gives the
//! digest carried by the file's [`Cid`].

use crate::cid::Cid;
use crate::hasher::{content_digest, hash_chunk, hash_node};
use blake3::Hasher;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// File tree hash structure
///
/// Contains the Merkle root (input to the CID digest), all chunk hashes for
/// verifying individual chunks, and the flat hash of the whole file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTreeHash {
    /// Merkle root hash
    pub root: [u8; 32],
    /// Chunk hashes (leaf nodes of the tree)
    pub chunks: Vec<[u8; 32]>,
    /// BLAKE3 of the complete file contents
    pub file_hash: [u8; 32],
    /// Total bytes hashed
    pub file_size: u64,
    /// Chunk size the leaves were cut at
    pub chunk_size: usize,
}

impl FileTreeHash {
    /// Get number of chunks
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Content identifier for this layout
    #[must_use]
    pub fn cid(&self) -> Cid {
        Cid::from_digest(content_digest(
            self.file_size,
            self.chunk_size as u64,
            &self.root,
        ))
    }

    /// Verify a chunk against its expected hash
    #[must_use]
    pub fn verify_chunk(&self, chunk_index: usize, chunk_data: &[u8]) -> bool {
        match self.chunks.get(chunk_index) {
            Some(expected) => crate::hasher::verify_chunk(chunk_data, expected),
            None => false,
        }
    }

    /// Get chunk hash
    #[must_use]
    pub fn get_chunk_hash(&self, chunk_index: usize) -> Option<&[u8; 32]> {
        self.chunks.get(chunk_index)
    }
}

/// Compute tree hash for a file
///
/// Reads the file once, hashing every full chunk plus the truncated tail.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn compute_tree_hash<P: AsRef<Path>>(path: P, chunk_size: usize) -> io::Result<FileTreeHash> {
    let file = File::open(path)?;
    compute_tree_hash_from_reader(file, chunk_size)
}

/// Compute tree hash from any reader
///
/// # Errors
///
/// Returns an error if reading fails.
pub fn compute_tree_hash_from_reader<R: Read>(
    mut reader: R,
    chunk_size: usize,
) -> io::Result<FileTreeHash> {
    let mut hasher = IncrementalTreeHasher::new(chunk_size);
    let mut buffer = vec![0u8; chunk_size.clamp(1, 1024 * 1024)];

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize())
}

/// Compute Merkle root from leaf hashes
///
/// Parent nodes hash the concatenation of their two children behind a node
/// prefix that leaves never carry. If there's an odd number of nodes at any
/// level, the last node is promoted to the next level. A single leaf is its
/// own root; no leaves (empty file) yields the BLAKE3 hash of the empty input.
///
/// # Example
///
/// ```
/// use torrentium_files::tree_hash::compute_merkle_root;
///
/// let leaves = vec![[1u8; 32], [2u8; 32], [3u8; 32], [4u8; 32]];
/// let root = compute_merkle_root(&leaves);
/// assert_ne!(root, leaves[0]);
/// ```
#[must_use]
pub fn compute_merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return *blake3::hash(&[]).as_bytes();
    }

    let mut current_level = leaves.to_vec();

    while current_level.len() > 1 {
        let mut next_level = Vec::with_capacity(current_level.len().div_ceil(2));

        for pair in current_level.chunks(2) {
            let hash = if let [left, right] = pair {
                hash_node(left, right)
            } else {
                pair[0]
            };

            next_level.push(hash);
        }

        current_level = next_level;
    }

    current_level[0]
}

/// Incremental tree hasher for streaming data
///
/// Hashes data as it's read without buffering more than one chunk.
///
/// # Example
///
/// ```
/// use torrentium_files::tree_hash::IncrementalTreeHasher;
///
/// let mut hasher = IncrementalTreeHasher::new(256 * 1024);
/// hasher.update(&[0xAA; 1024]);
/// hasher.update(&[0xBB; 1024]);
///
/// let tree = hasher.finalize();
/// assert_eq!(tree.chunk_count(), 1);
/// ```
pub struct IncrementalTreeHasher {
    chunk_hashes: Vec<[u8; 32]>,
    current_buffer: Vec<u8>,
    chunk_size: usize,
    file_hasher: Hasher,
    file_size: u64,
}

impl IncrementalTreeHasher {
    /// Create a new incremental hasher
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_hashes: Vec::new(),
            current_buffer: Vec::with_capacity(chunk_size.min(1024 * 1024)),
            chunk_size,
            file_hasher: Hasher::new(),
            file_size: 0,
        }
    }

    /// Update with new data
    pub fn update(&mut self, mut data: &[u8]) {
        self.file_hasher.update(data);
        self.file_size += data.len() as u64;

        while !data.is_empty() {
            let room = self.chunk_size - self.current_buffer.len();
            let take = room.min(data.len());
            self.current_buffer.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.current_buffer.len() == self.chunk_size {
                self.chunk_hashes.push(hash_chunk(&self.current_buffer));
                self.current_buffer.clear();
            }
        }
    }

    /// Get number of complete chunks processed
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunk_hashes.len()
    }

    /// Get buffered byte count (not yet hashed)
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.current_buffer.len()
    }

    /// Finalize and get tree hash
    #[must_use]
    pub fn finalize(mut self) -> FileTreeHash {
        if !self.current_buffer.is_empty() {
            self.chunk_hashes.push(hash_chunk(&self.current_buffer));
        }

        FileTreeHash {
            root: compute_merkle_root(&self.chunk_hashes),
            chunks: self.chunk_hashes,
            file_hash: *self.file_hasher.finalize().as_bytes(),
            file_size: self.file_size,
            chunk_size: self.chunk_size,
        }
    }
}

/// Compute tree hash from in-memory data
#[must_use]
pub fn compute_tree_hash_from_data(data: &[u8], chunk_size: usize) -> FileTreeHash {
    let chunk_size = chunk_size.max(1);
    let chunk_hashes: Vec<[u8; 32]> = data.chunks(chunk_size).map(hash_chunk).collect();

    FileTreeHash {
        root: compute_merkle_root(&chunk_hashes),
        chunks: chunk_hashes,
        file_hash: *blake3::hash(data).as_bytes(),
        file_size: data.len() as u64,
        chunk_size,
    }
}
