//! File transfer layer.
//!
//! Per-download session state and its lifecycle.

pub mod session;

pub use session::{TransferSession, TransferStatus};
