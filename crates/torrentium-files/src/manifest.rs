//! Self-certifying content manifests.
//!
//! A manifest tells a downloader how a CID is laid out: file name, size,
//! chunk size and every chunk hash. The Merkle root of the chunk hashes,
//! bound to the declared sizes, must equal the CID digest, so a manifest
//! received from an untrusted peer can be checked before any chunk is
//! requested.

use crate::chunker::FileChunker;
use crate::cid::Cid;
use crate::error::{Result, StoreError};
use crate::hasher::content_digest;
use crate::tree_hash::{FileTreeHash, compute_merkle_root};
use crate::MAX_CHUNK_SIZE;
use serde::{Deserialize, Serialize};

/// Content manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Original file name (no directory components)
    pub filename: String,
    /// File size in bytes
    pub file_size: u64,
    /// Chunk size in bytes
    pub chunk_size: usize,
    /// BLAKE3 of the whole file
    #[serde(with = "hex_digest")]
    pub file_hash: [u8; 32],
    /// Per-chunk BLAKE3 hashes in index order
    #[serde(with = "hex_digests")]
    pub chunk_hashes: Vec<[u8; 32]>,
}

impl Manifest {
    /// Build a manifest from a computed tree hash
    #[must_use]
    pub fn from_tree(filename: impl Into<String>, tree: &FileTreeHash) -> Self {
        Self {
            filename: sanitize_filename(&filename.into()),
            file_size: tree.file_size,
            chunk_size: tree.chunk_size,
            file_hash: tree.file_hash,
            chunk_hashes: tree.chunks.clone(),
        }
    }

    /// CID derived from the declared layout and chunk hashes
    #[must_use]
    pub fn cid(&self) -> Cid {
        let root = compute_merkle_root(&self.chunk_hashes);
        Cid::from_digest(content_digest(self.file_size, self.chunk_size as u64, &root))
    }

    /// Number of chunks
    #[must_use]
    pub fn chunk_count(&self) -> u64 {
        self.chunk_hashes.len() as u64
    }

    /// Expected byte length of a chunk
    #[must_use]
    pub fn chunk_len(&self, index: u64) -> Option<usize> {
        FileChunker::with_chunk_size(self.chunk_size).chunk_len(self.file_size, index)
    }

    /// Expected hash of a chunk
    #[must_use]
    pub fn chunk_hash(&self, index: u64) -> Option<&[u8; 32]> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.chunk_hashes.get(i))
    }

    /// Lowercase hex of the whole-file hash
    #[must_use]
    pub fn file_hash_hex(&self) -> String {
        hex::encode(self.file_hash)
    }

    /// Check that this manifest describes `cid` and is internally consistent
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Integrity`] if the root does not match or the
    /// chunk layout disagrees with the declared size.
    pub fn verify(&self, cid: &Cid) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(StoreError::InvalidChunkSize(self.chunk_size));
        }

        let expected_chunks = self.file_size.div_ceil(self.chunk_size as u64);
        if expected_chunks != self.chunk_count() {
            return Err(StoreError::integrity(
                *cid,
                format!(
                    "manifest declares {} bytes in {} chunks of {}",
                    self.file_size,
                    self.chunk_count(),
                    self.chunk_size
                ),
            ));
        }

        if self.cid() != *cid {
            return Err(StoreError::integrity(*cid, "manifest root does not match CID"));
        }

        Ok(())
    }

    /// Verify chunk bytes against this manifest
    #[must_use]
    pub fn verify_chunk(&self, index: u64, data: &[u8]) -> bool {
        match (self.chunk_hash(index), self.chunk_len(index)) {
            (Some(hash), Some(len)) => {
                data.len() == len && crate::hasher::verify_chunk(data, hash)
            }
            _ => false,
        }
    }

    /// Encode as JSON
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Manifest`] if encoding fails.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| StoreError::Manifest(e.to_string()))
    }

    /// Decode from JSON
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Manifest`] if the bytes are not a manifest.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Manifest(e.to_string()))
    }
}

/// Strip directory components and reserved names from a peer-supplied name
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();

    let filtered: String = base
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect();
    let cleaned = filtered
        .trim_start_matches(|c: char| c == '.' || c.is_whitespace())
        .trim_end();

    if cleaned.is_empty() {
        "download".to_string()
    } else {
        cleaned.to_string()
    }
}

mod hex_digest {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(digest: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.serialize_str(&hex::encode(digest))
        } else {
            serde::Serialize::serialize(digest, s)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        if d.is_human_readable() {
            let s = String::deserialize(d)?;
            let mut out = [0u8; 32];
            hex::decode_to_slice(s, &mut out).map_err(serde::de::Error::custom)?;
            Ok(out)
        } else {
            <[u8; 32]>::deserialize(d)
        }
    }
}

mod hex_digests {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(digests: &[[u8; 32]], s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.collect_seq(digests.iter().map(hex::encode))
        } else {
            s.collect_seq(digests.iter())
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<[u8; 32]>, D::Error> {
        if d.is_human_readable() {
            let strings = Vec::<String>::deserialize(d)?;
            strings
                .into_iter()
                .map(|s| {
                    let mut out = [0u8; 32];
                    hex::decode_to_slice(s, &mut out).map_err(serde::de::Error::custom)?;
                    Ok(out)
                })
                .collect()
        } else {
            Vec::<[u8; 32]>::deserialize(d)
        }
    }
}
