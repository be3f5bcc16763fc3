//! Two-node test fixture for integration testing
//!
//! A seeder and a leecher on loopback, each with its own data directory.
//! The leecher bootstraps from the seeder, so content the seeder adds can
//! be found and fetched by CID.
//!
//! # Example
//!
//! ```no_run
//! use torrentium_integration_tests::fixtures::TwoNodeFixture;
//!
//! #[tokio::test]
//! async fn test_basic_transfer() {
//!     let fixture = TwoNodeFixture::new().await.unwrap();
//!     let cid = fixture.share(b"hello", "hello.txt").await.unwrap();
//!     fixture.leecher.download_file(&cid.to_string()).unwrap();
//!     // ... wait for events ...
//!     fixture.cleanup().await;
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use torrentium_core::{Cid, Node, NodeConfig, NodeError, TransferEvent};

/// Two-node test fixture
pub struct TwoNodeFixture {
    /// Node that holds the content
    pub seeder: Node,
    /// Node that downloads it
    pub leecher: Node,
    dir: TempDir,
}

/// Loopback config rooted at `data_dir` with short timeouts
pub fn test_config(data_dir: &Path) -> NodeConfig {
    let mut config = NodeConfig::with_data_dir(data_dir);
    config.listen_addr = "127.0.0.1:0".parse().expect("loopback address");
    config.transfer.chunk_timeout = Duration::from_secs(5);
    config.transfer.retry.initial_backoff = Duration::from_millis(10);
    config.transfer.retry.max_backoff = Duration::from_millis(50);
    config.discovery.request_timeout = Duration::from_secs(2);
    config
}

impl TwoNodeFixture {
    /// Start a seeder, then a leecher bootstrapped from it
    ///
    /// # Errors
    ///
    /// Returns the first [`NodeError`] either node fails to start with.
    pub async fn new() -> Result<Self, NodeError> {
        Self::new_with_config(|_| {}, |_| {}).await
    }

    /// Like [`TwoNodeFixture::new`], letting callers adjust each config
    ///
    /// # Errors
    ///
    /// Returns the first [`NodeError`] either node fails to start with.
    pub async fn new_with_config(
        seeder_tweak: impl FnOnce(&mut NodeConfig),
        leecher_tweak: impl FnOnce(&mut NodeConfig),
    ) -> Result<Self, NodeError> {
        let dir = TempDir::new()?;

        let mut seeder_config = test_config(&dir.path().join("seeder"));
        seeder_tweak(&mut seeder_config);
        let seeder = Node::start(seeder_config).await?;

        let mut leecher_config = test_config(&dir.path().join("leecher"));
        leecher_config.discovery.bootstrap_nodes = vec![seeder.listen_addr()];
        leecher_tweak(&mut leecher_config);
        let leecher = Node::start(leecher_config).await?;

        Ok(Self {
            seeder,
            leecher,
            dir,
        })
    }

    /// Scratch directory shared by both nodes
    pub fn scratch(&self) -> &Path {
        self.dir.path()
    }

    /// Where the leecher writes finished downloads
    pub fn download_dir(&self) -> PathBuf {
        self.dir.path().join("leecher").join("downloads")
    }

    /// Write `data` to a file called `name` and add it on the seeder
    ///
    /// # Errors
    ///
    /// Returns the error from writing the file or adding it.
    pub async fn share(&self, data: &[u8], name: &str) -> Result<Cid, NodeError> {
        let path = self.dir.path().join(name);
        std::fs::write(&path, data)?;
        self.seeder.add_file(&path).await
    }

    /// Collect leecher events for `cid` until its terminal event
    ///
    /// # Panics
    ///
    /// Panics if no terminal event arrives within `timeout`.
    pub async fn wait_for_outcome(
        events: &mut broadcast::Receiver<TransferEvent>,
        cid: &Cid,
        timeout: Duration,
    ) -> Vec<TransferEvent> {
        let mut seen = Vec::new();
        let collect = async {
            loop {
                match events.recv().await {
                    Ok(event) if event.cid() == cid => {
                        let terminal = event.is_terminal();
                        seen.push(event);
                        if terminal {
                            break;
                        }
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        tokio::time::timeout(timeout, collect)
            .await
            .expect("download did not finish in time");
        seen
    }

    /// Stop both nodes
    pub async fn cleanup(self) {
        self.leecher.shutdown().await;
        self.seeder.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixture_creation() {
        let fixture = TwoNodeFixture::new().await.unwrap();
        assert_ne!(fixture.seeder.listen_addr(), fixture.leecher.listen_addr());
        assert_ne!(fixture.seeder.local_peer().id, fixture.leecher.local_peer().id);

        let known = fixture.leecher.known_peers().await;
        assert_eq!(known, vec![fixture.seeder.local_peer()]);
        fixture.cleanup().await;
    }

    #[tokio::test]
    async fn test_share_records_on_seeder() {
        let fixture = TwoNodeFixture::new().await.unwrap();
        let cid = fixture.share(b"fixture data", "fixture.txt").await.unwrap();

        let files = fixture.seeder.list_local_files().await;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].cid, cid.to_string());
        assert!(fixture.leecher.list_local_files().await.is_empty());
        fixture.cleanup().await;
    }
}
