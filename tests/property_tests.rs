//! Property-based tests for Torrentium
//!
//! Uses proptest to verify content-addressing invariants across large input
//! spaces.

use proptest::prelude::*;

// ============================================================================
// CID Properties
// ============================================================================

mod cid_properties {
    use super::*;
    use torrentium_files::Cid;

    proptest! {
        /// Text form parses back to the same CID, in either hex case
        #[test]
        fn text_form_parses_back(root in any::<[u8; 32]>()) {
            let cid = Cid::from_digest(root);
            let text = cid.to_string();

            prop_assert!(text.starts_with('f'));
            prop_assert_eq!(text.len(), 1 + 2 * 36);
            prop_assert_eq!(text.parse::<Cid>().unwrap(), cid);
            prop_assert_eq!(text.to_uppercase().parse::<Cid>().unwrap(), cid);
        }

        /// Any change to the binary header is rejected
        #[test]
        fn corrupted_header_rejected(
            root in any::<[u8; 32]>(),
            position in 0usize..4,
            flip in 1u8..=255,
        ) {
            let mut bytes = Cid::from_digest(root).to_bytes();
            bytes[position] ^= flip;
            prop_assert!(Cid::from_bytes(&bytes).is_err());
        }

        /// Truncated input never decodes
        #[test]
        fn truncated_bytes_rejected(root in any::<[u8; 32]>(), keep in 0usize..36) {
            let bytes = Cid::from_digest(root).to_bytes();
            prop_assert!(Cid::from_bytes(&bytes[..keep]).is_err());
        }
    }
}

// ============================================================================
// Tree Hash Properties
// ============================================================================

mod tree_hash_properties {
    use super::*;
    use torrentium_files::tree_hash::{
        IncrementalTreeHasher, compute_merkle_root, compute_tree_hash_from_data,
    };

    proptest! {
        /// Different data produces different hash (with high probability)
        #[test]
        fn different_data_different_cid(
            data1 in prop::collection::vec(any::<u8>(), 1..256),
            data2 in prop::collection::vec(any::<u8>(), 1..256),
            chunk_size in 64usize..256,
        ) {
            prop_assume!(data1 != data2);

            let tree1 = compute_tree_hash_from_data(&data1, chunk_size);
            let tree2 = compute_tree_hash_from_data(&data2, chunk_size);

            prop_assert_ne!(tree1.cid(), tree2.cid());
        }

        /// Chunk count is the ceiling of size over chunk size
        #[test]
        fn chunk_count_correct(
            data_len in 0usize..4096,
            chunk_size in 64usize..512,
        ) {
            let data: Vec<u8> = (0..data_len).map(|i| (i & 0xFF) as u8).collect();
            let tree = compute_tree_hash_from_data(&data, chunk_size);

            prop_assert_eq!(tree.chunk_count(), data_len.div_ceil(chunk_size));
            prop_assert_eq!(tree.file_size, data_len as u64);
        }

        /// How the bytes are fed in does not change the result
        #[test]
        fn incremental_independent_of_buffering(
            data in prop::collection::vec(any::<u8>(), 0..4096),
            chunk_size in 64usize..512,
            piece in 1usize..300,
        ) {
            let batch = compute_tree_hash_from_data(&data, chunk_size);

            let mut hasher = IncrementalTreeHasher::new(chunk_size);
            for part in data.chunks(piece) {
                hasher.update(part);
            }
            let incremental = hasher.finalize();

            prop_assert_eq!(batch.root, incremental.root);
            prop_assert_eq!(batch.chunks, incremental.chunks);
            prop_assert_eq!(batch.file_hash, incremental.file_hash);
        }

        /// Every chunk verifies against its own leaf and no other
        #[test]
        fn chunk_verification(
            data in prop::collection::vec(any::<u8>(), 64..1024),
            chunk_size in 64usize..256,
            wrong_byte in 1u8..=255,
        ) {
            let tree = compute_tree_hash_from_data(&data, chunk_size);

            for (i, chunk) in data.chunks(chunk_size).enumerate() {
                prop_assert!(tree.verify_chunk(i, chunk), "chunk {} should verify", i);

                let mut tampered = chunk.to_vec();
                tampered[0] ^= wrong_byte;
                prop_assert!(!tree.verify_chunk(i, &tampered), "tampered chunk {} verified", i);
            }
            prop_assert!(!tree.verify_chunk(tree.chunk_count(), &data[..1]));
        }

        /// Merkle root of single leaf equals the leaf
        #[test]
        fn merkle_single_leaf(leaf in any::<[u8; 32]>()) {
            prop_assert_eq!(compute_merkle_root(&[leaf]), leaf);
        }

        /// Leaf order matters
        #[test]
        fn merkle_order_sensitive(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
            prop_assume!(a != b);
            prop_assert_ne!(compute_merkle_root(&[a, b]), compute_merkle_root(&[b, a]));
        }

        /// Interior nodes never pass as chunk hashes of their children's bytes
        #[test]
        fn parent_never_verifies_as_chunk(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
            let mut joined = a.to_vec();
            joined.extend_from_slice(&b);
            prop_assert!(!torrentium_files::hasher::verify_chunk(
                &joined,
                &compute_merkle_root(&[a, b]),
            ));
        }
    }

    #[test]
    fn merkle_empty_leaves_is_empty_hash() {
        assert_eq!(compute_merkle_root(&[]), *blake3::hash(&[]).as_bytes());
    }
}

// ============================================================================
// Manifest Properties
// ============================================================================

mod manifest_properties {
    use super::*;
    use torrentium_files::Manifest;
    use torrentium_files::manifest::sanitize_filename;
    use torrentium_files::tree_hash::compute_tree_hash_from_data;

    proptest! {
        /// A manifest built from data verifies against its own CID, and the
        /// expected chunk lengths add up to the file size
        #[test]
        fn manifest_self_consistent(
            data in prop::collection::vec(any::<u8>(), 0..4096),
            chunk_size in 64usize..512,
        ) {
            let tree = compute_tree_hash_from_data(&data, chunk_size);
            let manifest = Manifest::from_tree("file.bin", &tree);

            prop_assert!(manifest.verify(&tree.cid()).is_ok());
            let total: usize = (0..manifest.chunk_count())
                .map(|i| manifest.chunk_len(i).unwrap())
                .sum();
            prop_assert_eq!(total, data.len());
            prop_assert!(manifest.chunk_len(manifest.chunk_count()).is_none());
        }

        /// Sanitized names never escape the download directory
        #[test]
        fn sanitized_names_are_plain(name in ".{0,64}") {
            let clean = sanitize_filename(&name);

            prop_assert!(!clean.is_empty());
            prop_assert!(!clean.contains('/'));
            prop_assert!(!clean.contains('\\'));
            prop_assert!(!clean.starts_with('.'));
            prop_assert!(!clean.chars().any(char::is_control));
        }
    }
}

// ============================================================================
// Node Distance Properties
// ============================================================================

mod distance_properties {
    use super::*;
    use torrentium_discovery::NodeId;

    proptest! {
        /// XOR distance is symmetric and zero only to itself
        #[test]
        fn distance_symmetric(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
            let (a, b) = (NodeId::from_bytes(a), NodeId::from_bytes(b));

            prop_assert_eq!(a.distance(&b), b.distance(&a));
            prop_assert_eq!(a.distance(&a), NodeId::from_bytes([0u8; 32]));
            if a != b {
                prop_assert_ne!(a.distance(&b), NodeId::from_bytes([0u8; 32]));
            }
        }
    }
}
