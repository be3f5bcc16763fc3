//! BLAKE3 chunk, tree node and file hashing.
//!
//! Leaf, interior node and CID digests each start with their own one-byte
//! prefix, so a value from one position in the tree can never stand in for
//! a value from another.

use blake3::Hasher;

/// Prefix for chunk (leaf) hashes
const LEAF_DOMAIN: u8 = 0x00;
/// Prefix for interior tree nodes
const NODE_DOMAIN: u8 = 0x01;
/// Prefix for the CID digest
const CID_DOMAIN: u8 = 0x02;

/// Hash a chunk
pub fn hash_chunk(data: &[u8]) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hasher.update(&[LEAF_DOMAIN]);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Hash two sibling nodes into their parent
pub fn hash_node(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hasher.update(&[NODE_DOMAIN]);
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

/// Digest carried by a CID
///
/// Covers the declared file size and chunk size as well as the Merkle root,
/// so the same chunk hashes under a different layout give a different CID.
pub fn content_digest(file_size: u64, chunk_size: u64, root: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hasher.update(&[CID_DOMAIN]);
    hasher.update(&file_size.to_le_bytes());
    hasher.update(&chunk_size.to_le_bytes());
    hasher.update(root);
    *hasher.finalize().as_bytes()
}

/// Hash an entire in-memory file
pub fn hash_file(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Verify a chunk against its expected hash
pub fn verify_chunk(data: &[u8], expected: &[u8; 32]) -> bool {
    blake3::Hash::from(hash_chunk(data)) == blake3::Hash::from(*expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_chunk() {
        let data = b"chunk data";
        let hash = hash_chunk(data);
        assert!(verify_chunk(data, &hash));
        assert!(!verify_chunk(b"other data", &hash));
    }

    #[test]
    fn test_leaf_and_node_hashes_differ_for_same_bytes() {
        let (left, right) = ([3u8; 32], [4u8; 32]);
        let mut joined = left.to_vec();
        joined.extend_from_slice(&right);

        assert_ne!(hash_chunk(&joined), hash_node(&left, &right));
        assert!(!verify_chunk(&joined, &hash_node(&left, &right)));
    }

    #[test]
    fn test_chunk_hash_is_not_plain_blake3() {
        assert_ne!(hash_chunk(b"abc"), hash_file(b"abc"));
    }

    #[test]
    fn test_content_digest_binds_layout() {
        let root = [9u8; 32];
        let digest = content_digest(128, 64, &root);

        assert_ne!(digest, root);
        assert_ne!(digest, content_digest(64, 64, &root));
        assert_ne!(digest, content_digest(128, 128, &root));
        assert_eq!(digest, content_digest(128, 64, &root));
    }
}
