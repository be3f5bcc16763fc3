//! Transfer session state machine for downloads.

use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};
use torrentium_files::Cid;

/// Download state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferStatus {
    /// Looking up providers and the manifest
    Resolving,
    /// Fetching chunks
    Fetching,
    /// All chunks in; committing and exporting
    Verifying,
    /// File written and recorded
    Completed,
    /// Gave up
    Failed,
    /// Stopped by request
    Cancelled,
}

impl TransferStatus {
    /// Whether no further transition is possible
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is allowed
    #[must_use]
    pub fn can_transition_to(self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        match (self, next) {
            (Resolving, Fetching | Verifying) => true,
            (Fetching, Verifying) => true,
            (Verifying, Completed) => true,
            (from, Failed | Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferStatus::Resolving => "resolving",
            TransferStatus::Fetching => "fetching",
            TransferStatus::Verifying => "verifying",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
            TransferStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Transfer session
///
/// Tracks one download from provider lookup to its terminal state. The
/// received set only grows, so the count reported in progress events is
/// non-decreasing.
#[derive(Debug, Clone)]
pub struct TransferSession {
    cid: Cid,
    total_chunks: u64,
    received: HashSet<u64>,
    bytes_received: u64,
    status: TransferStatus,
    error: Option<NodeError>,
    started_at: Instant,
    finished_at: Option<Instant>,
}

impl TransferSession {
    /// New session in [`TransferStatus::Resolving`]
    #[must_use]
    pub fn new(cid: Cid) -> Self {
        Self {
            cid,
            total_chunks: 0,
            received: HashSet::new(),
            bytes_received: 0,
            status: TransferStatus::Resolving,
            error: None,
            started_at: Instant::now(),
            finished_at: None,
        }
    }

    /// Content being downloaded
    #[must_use]
    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    /// Current state
    #[must_use]
    pub fn status(&self) -> TransferStatus {
        self.status
    }

    /// Terminal error, if the session failed or was cancelled
    #[must_use]
    pub fn error(&self) -> Option<&NodeError> {
        self.error.as_ref()
    }

    /// Total chunks (0 until the manifest is known)
    #[must_use]
    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Chunks received so far
    #[must_use]
    pub fn received_count(&self) -> u64 {
        self.received.len() as u64
    }

    /// Bytes received so far
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Manifest resolved; start fetching `total_chunks` chunks
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Transfer`] if the session is not resolving.
    pub fn begin_fetching(&mut self, total_chunks: u64) -> Result<()> {
        self.transition(TransferStatus::Fetching)?;
        self.total_chunks = total_chunks;
        Ok(())
    }

    /// Record a verified chunk; returns false for duplicates or out-of-range
    /// indices
    pub fn mark_received(&mut self, index: u64, len: usize) -> bool {
        if self.status != TransferStatus::Fetching || index >= self.total_chunks {
            return false;
        }
        if self.received.insert(index) {
            self.bytes_received += len as u64;
            true
        } else {
            false
        }
    }

    /// Whether `index` has landed
    #[must_use]
    pub fn has_chunk(&self, index: u64) -> bool {
        self.received.contains(&index)
    }

    /// Indices still to fetch, ascending
    #[must_use]
    pub fn missing_chunks(&self) -> Vec<u64> {
        (0..self.total_chunks)
            .filter(|i| !self.received.contains(i))
            .collect()
    }

    /// Whether every chunk has landed
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.received.len() as u64 == self.total_chunks
    }

    /// Move to verification
    ///
    /// Allowed from `Fetching` once every chunk is in, or straight from
    /// `Resolving` when the content is already stored locally.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Transfer`] on an invalid transition or if chunks
    /// are still missing.
    pub fn begin_verifying(&mut self) -> Result<()> {
        if self.status == TransferStatus::Fetching && !self.is_complete() {
            return Err(NodeError::transfer("cannot verify with chunks missing"));
        }
        self.transition(TransferStatus::Verifying)
    }

    /// Finish successfully
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Transfer`] unless the session is verifying.
    pub fn complete(&mut self) -> Result<()> {
        self.transition(TransferStatus::Completed)
    }

    /// Finish with `err`; cancellation errors end in
    /// [`TransferStatus::Cancelled`]
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Transfer`] if the session already ended.
    pub fn fail(&mut self, err: NodeError) -> Result<()> {
        let next = if matches!(err, NodeError::Cancelled) {
            TransferStatus::Cancelled
        } else {
            TransferStatus::Failed
        };
        self.transition(next)?;
        self.error = Some(err);
        Ok(())
    }

    /// Whether the session has ended
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Get transfer progress (0.0 to 1.0)
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.status == TransferStatus::Completed {
            return 1.0;
        }
        if self.total_chunks == 0 {
            return 0.0;
        }
        self.received.len() as f64 / self.total_chunks as f64
    }

    /// Time since the session started, or its total duration once ended
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.finished_at
            .unwrap_or_else(Instant::now)
            .duration_since(self.started_at)
    }

    /// Get transfer speed in bytes/sec
    #[must_use]
    pub fn speed(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.bytes_received as f64 / secs
        } else {
            0.0
        }
    }

    fn transition(&mut self, next: TransferStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(NodeError::Transfer(
                format!("invalid transition {} -> {next}", self.status).into(),
            ));
        }
        tracing::trace!(cid = %self.cid.short(), from = %self.status, to = %next, "session transition");
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Instant::now());
        }
        Ok(())
    }
}
