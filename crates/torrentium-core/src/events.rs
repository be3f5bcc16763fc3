//! Transfer notifications for UI consumers.
//!
//! Events serialize to the shapes a front end listens for:
//!
//! ```json
//! {"event":"download-progress","cid":"f0155…","received":3,"total":4}
//! {"event":"download-complete","cid":"f0155…","filename":"photo.jpg"}
//! {"event":"download-error","cid":"f0155…","message":"…","kind":"noProviders"}
//! ```

use crate::error::{ErrorKind, NodeError};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use torrentium_files::Cid;

/// Download lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum TransferEvent {
    /// A verified chunk landed
    DownloadProgress {
        /// Content being downloaded
        cid: Cid,
        /// Chunks received so far
        received: u64,
        /// Total chunks
        total: u64,
    },

    /// The file was written and recorded
    DownloadComplete {
        /// Downloaded content
        cid: Cid,
        /// Name of the written file
        filename: String,
    },

    /// The download ended without a file
    DownloadError {
        /// Content that failed
        cid: Cid,
        /// Human-readable reason
        message: String,
        /// Failure category
        kind: ErrorKind,
    },
}

impl TransferEvent {
    /// Build the error event for `err`
    #[must_use]
    pub fn error(cid: Cid, err: &NodeError) -> Self {
        TransferEvent::DownloadError {
            cid,
            message: err.to_string(),
            kind: err.kind(),
        }
    }

    /// CID the event is about
    #[must_use]
    pub fn cid(&self) -> &Cid {
        match self {
            TransferEvent::DownloadProgress { cid, .. }
            | TransferEvent::DownloadComplete { cid, .. }
            | TransferEvent::DownloadError { cid, .. } => cid,
        }
    }

    /// Whether this event ends a download
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferEvent::DownloadProgress { .. })
    }

    /// Event name as seen by the UI
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            TransferEvent::DownloadProgress { .. } => "download-progress",
            TransferEvent::DownloadComplete { .. } => "download-complete",
            TransferEvent::DownloadError { .. } => "download-error",
        }
    }
}

/// Fan-out of [`TransferEvent`]s to any number of subscribers
///
/// Publishing never blocks; a subscriber that falls more than the channel
/// capacity behind sees `RecvError::Lagged` and skips ahead.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TransferEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// New subscription, receiving events published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.tx.subscribe()
    }

    /// Publish an event
    pub fn publish(&self, event: TransferEvent) {
        tracing::trace!(event = event.name(), cid = %event.cid().short(), "publishing event");
        // No subscribers is not an error
        let _ = self.tx.send(event);
    }

    /// Current number of subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
