//! # Torrentium Transport
//!
//! Network transport layer for the Torrentium engine.
//!
//! This crate provides:
//! - The request/response wire protocol ([`protocol`])
//! - Length-prefixed framing over any async byte stream ([`codec`])
//! - A TCP client with per-request timeouts ([`client`])
//! - A TCP accept loop dispatching to a [`RequestHandler`] ([`server`])
//!
//! Every frame is a big-endian `u32` length followed by a bincode payload.
//! A connection carries any number of sequential request/response pairs.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod codec;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::PeerClient;
pub use codec::MAX_FRAME_SIZE;
pub use protocol::{PROTOCOL_VERSION, Request, Response};
pub use server::{RequestHandler, Server};
pub use transport::{StatsHandle, TransportError, TransportResult, TransportStats};

use std::time::Duration;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Upper bound on one request/response exchange, including connect
    pub request_timeout: Duration,
    /// Maximum simultaneous inbound connections
    pub max_connections: usize,
    /// Inbound connections idle longer than this are closed
    pub idle_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_connections: 256,
            idle_timeout: Duration::from_secs(60),
        }
    }
}
