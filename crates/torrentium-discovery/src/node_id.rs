//! Node identity and the XOR distance metric.
//!
//! Node ids and CID digests live in the same 256-bit key space. The XOR
//! metric decides which peers are "responsible" for a CID: the ones whose
//! ids are closest to its digest.

use crate::error::DiscoveryError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use torrentium_files::Cid;

/// 256-bit node identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId([u8; 32]);

impl NodeId {
    /// Number of bits in a NodeId
    pub const BITS: usize = 256;

    /// Generate a random NodeId
    ///
    /// # Examples
    ///
    /// ```
    /// use torrentium_discovery::NodeId;
    ///
    /// let id = NodeId::random();
    /// assert_eq!(id.as_bytes().len(), 32);
    /// ```
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill(&mut bytes[..]);
        Self(bytes)
    }

    /// Derive a stable NodeId from an arbitrary seed
    ///
    /// Lets a node keep the same identity across restarts by persisting
    /// only the seed.
    #[must_use]
    pub fn from_seed(seed: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(seed);
        hasher.update(b"torrentium-node-id");
        Self(*hasher.finalize().as_bytes())
    }

    /// Position of a CID in the node key space
    #[must_use]
    pub fn from_cid(cid: &Cid) -> Self {
        Self(*cid.digest())
    }

    /// XOR distance to another NodeId
    ///
    /// # Examples
    ///
    /// ```
    /// use torrentium_discovery::NodeId;
    ///
    /// let a = NodeId::from_bytes([1u8; 32]);
    /// let b = NodeId::from_bytes([2u8; 32]);
    /// assert_eq!(a.distance(&b).as_bytes()[0], 3);
    /// ```
    #[must_use]
    pub fn distance(&self, other: &NodeId) -> NodeId {
        let mut result = [0u8; 32];
        for (i, byte) in result.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        NodeId(result)
    }

    /// Count leading zero bits
    #[must_use]
    pub fn leading_zeros(&self) -> usize {
        let mut count = 0;
        for byte in &self.0 {
            if *byte == 0 {
                count += 8;
            } else {
                count += byte.leading_zeros() as usize;
                break;
            }
        }
        count.min(Self::BITS)
    }

    /// Raw bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create NodeId from raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Full lowercase hex form
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl FromStr for NodeId {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim(), &mut bytes)
            .map_err(|e| DiscoveryError::InvalidNodeId(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_node_id_from_seed_is_stable() {
        assert_eq!(NodeId::from_seed(b"laptop"), NodeId::from_seed(b"laptop"));
        assert_ne!(NodeId::from_seed(b"laptop"), NodeId::from_seed(b"desktop"));
    }

    #[test]
    fn test_node_id_random_unique() {
        assert_ne!(NodeId::random(), NodeId::random());
    }

    #[test]
    fn test_xor_distance() {
        let id1 = NodeId::from_bytes([1u8; 32]);
        let id2 = NodeId::from_bytes([2u8; 32]);
        let distance = id1.distance(&id2);

        for byte in distance.as_bytes() {
            assert_eq!(*byte, 3);
        }
    }

    #[test]
    fn test_xor_distance_identity() {
        let id = NodeId::random();
        assert_eq!(id.distance(&id), NodeId::from_bytes([0u8; 32]));
    }

    #[test]
    fn test_leading_zeros() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0b0100_0000;
        assert_eq!(NodeId::from_bytes(bytes).leading_zeros(), 1);

        let mut bytes = [0u8; 32];
        bytes[1] = 0b1000_0000;
        assert_eq!(NodeId::from_bytes(bytes).leading_zeros(), 8);

        assert_eq!(NodeId::from_bytes([0u8; 32]).leading_zeros(), 256);
    }

    #[test]
    fn test_cid_maps_into_key_space() {
        let cid = Cid::from_digest([7u8; 32]);
        assert_eq!(NodeId::from_cid(&cid).as_bytes(), &[7u8; 32]);
    }

    #[test]
    fn test_hex_roundtrip() {
        let id = NodeId::random();
        assert_eq!(id.to_hex().parse::<NodeId>().unwrap(), id);
        assert!(matches!(
            "abc".parse::<NodeId>(),
            Err(DiscoveryError::InvalidNodeId(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_distance_symmetric(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
            let a = NodeId::from_bytes(a);
            let b = NodeId::from_bytes(b);
            prop_assert_eq!(a.distance(&b), b.distance(&a));
        }
    }
}
