//! Wire protocol message definitions.

use crate::transport::{TransportError, TransportResult};
use serde::{Deserialize, Serialize};
use torrentium_discovery::{NodeId, PeerHandle};
use torrentium_files::{Cid, Manifest};

/// Protocol version carried in `Hello`
pub const PROTOCOL_VERSION: u16 = 1;

/// Requests a node can send to a peer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Request {
    /// Introduce ourselves and ask for known peers
    Hello {
        /// Sender's protocol version
        version: u16,
        /// Sender's id and listening address
        from: PeerHandle,
    },

    /// Tell the peer that `provider` serves `cid`
    Announce {
        /// Announced content
        cid: Cid,
        /// Providing node
        provider: PeerHandle,
    },

    /// Ask for providers of `cid`
    FindProviders {
        /// Wanted content
        cid: Cid,
    },

    /// Ask for the manifest of `cid`
    GetManifest {
        /// Wanted content
        cid: Cid,
    },

    /// Ask for one chunk
    GetChunk {
        /// Wanted content
        cid: Cid,
        /// Chunk index
        index: u64,
    },

    /// Liveness probe
    Ping,
}

/// Responses to [`Request`]s
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Response {
    /// Reply to `Hello`
    Peers {
        /// Responder's node id
        id: NodeId,
        /// Peers the responder knows
        peers: Vec<PeerHandle>,
    },

    /// Reply to `Announce`
    Ack,

    /// Reply to `FindProviders`
    Providers {
        /// Known providers of the CID
        providers: Vec<PeerHandle>,
        /// Peers closer to the CID worth asking
        closer: Vec<PeerHandle>,
    },

    /// Reply to `GetManifest`
    Manifest(Manifest),

    /// Reply to `GetChunk`
    Chunk {
        /// Chunk index
        index: u64,
        /// Chunk bytes
        data: Vec<u8>,
    },

    /// Reply to `Ping`
    Pong,

    /// The responder does not have the requested content
    NotFound,

    /// The responder failed to serve the request
    Error {
        /// Human-readable message
        message: String,
    },
}

impl Request {
    /// Serialize message to bytes
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> TransportResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| TransportError::Serialization(e.to_string()))
    }

    /// Deserialize message from bytes
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Deserialization`] on malformed input.
    pub fn from_bytes(bytes: &[u8]) -> TransportResult<Self> {
        bincode::deserialize(bytes).map_err(|e| TransportError::Deserialization(e.to_string()))
    }

    /// Get the message type name
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            Request::Hello { .. } => "Hello",
            Request::Announce { .. } => "Announce",
            Request::FindProviders { .. } => "FindProviders",
            Request::GetManifest { .. } => "GetManifest",
            Request::GetChunk { .. } => "GetChunk",
            Request::Ping => "Ping",
        }
    }
}

impl Response {
    /// Serialize message to bytes
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> TransportResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| TransportError::Serialization(e.to_string()))
    }

    /// Deserialize message from bytes
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Deserialization`] on malformed input.
    pub fn from_bytes(bytes: &[u8]) -> TransportResult<Self> {
        bincode::deserialize(bytes).map_err(|e| TransportError::Deserialization(e.to_string()))
    }

    /// Get the message type name
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            Response::Peers { .. } => "Peers",
            Response::Ack => "Ack",
            Response::Providers { .. } => "Providers",
            Response::Manifest(_) => "Manifest",
            Response::Chunk { .. } => "Chunk",
            Response::Pong => "Pong",
            Response::NotFound => "NotFound",
            Response::Error { .. } => "Error",
        }
    }

    /// Turn `NotFound` / `Error` replies into errors
    pub(crate) fn into_result(self) -> TransportResult<Self> {
        match self {
            Response::NotFound => Err(TransportError::NotFound),
            Response::Error { message } => Err(TransportError::Remote(message)),
            other => Ok(other),
        }
    }
}
