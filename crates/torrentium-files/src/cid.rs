//! Content identifiers.
//!
//! A [`Cid`] is a CIDv1 with the `raw` codec and a BLAKE3-256 multihash. The
//! digest covers the Merkle root of the chunk hashes along with the file and
//! chunk sizes (see [`crate::hasher::content_digest`]). The text form uses
//! the base16 multibase prefix (`f`) followed by lowercase hex.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// CID version byte
const CID_VERSION: u8 = 0x01;
/// Multicodec for raw binary content
const CODEC_RAW: u8 = 0x55;
/// Multihash code for BLAKE3
const MULTIHASH_BLAKE3: u8 = 0x1e;
/// Digest length in bytes
const DIGEST_LEN: u8 = 0x20;
/// Multibase prefix for lowercase base16
const MULTIBASE_BASE16: char = 'f';

/// Length of the binary CID (4 header bytes + digest)
pub const CID_BYTES_LEN: usize = 4 + DIGEST_LEN as usize;

/// Errors parsing a CID
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CidError {
    /// Empty input
    #[error("empty CID")]
    Empty,

    /// Unsupported multibase prefix
    #[error("unsupported multibase prefix '{0}'")]
    UnsupportedMultibase(char),

    /// Body is not valid hex
    #[error("invalid hex in CID: {0}")]
    InvalidHex(String),

    /// Wrong number of bytes
    #[error("invalid CID length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Expected byte length
        expected: usize,
        /// Actual byte length
        actual: usize,
    },

    /// Header does not describe a CIDv1/raw/blake3 identifier
    #[error("unsupported CID header: version 0x{version:02x}, codec 0x{codec:02x}, hash 0x{hash:02x}")]
    UnsupportedHeader {
        /// Version byte
        version: u8,
        /// Codec byte
        codec: u8,
        /// Multihash code
        hash: u8,
    },
}

/// Content identifier (hash-derived, content-addressed)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid {
    digest: [u8; 32],
}

impl Cid {
    /// Build a CID from a content digest
    #[must_use]
    pub const fn from_digest(digest: [u8; 32]) -> Self {
        Self { digest }
    }

    /// The content digest carried by this CID
    #[must_use]
    pub const fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Binary CIDv1 encoding
    #[must_use]
    pub fn to_bytes(&self) -> [u8; CID_BYTES_LEN] {
        let mut out = [0u8; CID_BYTES_LEN];
        out[0] = CID_VERSION;
        out[1] = CODEC_RAW;
        out[2] = MULTIHASH_BLAKE3;
        out[3] = DIGEST_LEN;
        out[4..].copy_from_slice(&self.digest);
        out
    }

    /// Decode a binary CIDv1
    ///
    /// # Errors
    ///
    /// Returns [`CidError`] if the length or header is wrong.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CidError> {
        if bytes.len() != CID_BYTES_LEN {
            return Err(CidError::InvalidLength {
                expected: CID_BYTES_LEN,
                actual: bytes.len(),
            });
        }

        let (version, codec, hash, len) = (bytes[0], bytes[1], bytes[2], bytes[3]);
        if version != CID_VERSION
            || codec != CODEC_RAW
            || hash != MULTIHASH_BLAKE3
            || len != DIGEST_LEN
        {
            return Err(CidError::UnsupportedHeader {
                version,
                codec,
                hash,
            });
        }

        let mut digest = [0u8; 32];
        digest.copy_from_slice(&bytes[4..]);
        Ok(Self { digest })
    }

    /// Short form for log lines
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.digest[..6])
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{MULTIBASE_BASE16}{}", hex::encode(self.to_bytes()))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({self})")
    }
}

impl FromStr for Cid {
    type Err = CidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut chars = s.chars();
        let prefix = chars.next().ok_or(CidError::Empty)?;

        // Multibase 'F' is uppercase base16; accept both cases of the body
        if prefix != MULTIBASE_BASE16 && prefix != 'F' {
            return Err(CidError::UnsupportedMultibase(prefix));
        }

        let bytes = hex::decode(chars.as_str()).map_err(|e| CidError::InvalidHex(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl Serialize for Cid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            self.digest.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let digest = <[u8; 32]>::deserialize(deserializer)?;
            Ok(Self { digest })
        }
    }
}
