//! Node configuration

use crate::error::{NodeError, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use torrentium_files::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Listen address for incoming peer connections
    pub listen_addr: SocketAddr,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Discovery configuration
    pub discovery: DiscoveryConfig,

    /// Transfer configuration
    pub transfer: TransferConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            // Use port 0 (auto-select) in tests to avoid port conflicts
            #[cfg(test)]
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            #[cfg(not(test))]
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 7070)),
            storage: StorageConfig::default(),
            discovery: DiscoveryConfig::default(),
            transfer: TransferConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Config rooted at `data_dir`, downloading into `data_dir/downloads`
    #[must_use]
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let mut config = Self::default();
        config.transfer.download_dir = data_dir.join("downloads");
        config.storage.data_dir = data_dir;
        config
    }

    /// Check the configuration for values the engine cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;
        self.discovery.validate()?;
        self.transfer.validate()
    }
}

/// On-disk storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root for the content store, the index and the node identity
    pub data_dir: PathBuf,

    /// Chunk size for newly added files
    pub chunk_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".torrentium"),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl StorageConfig {
    /// Content store root
    #[must_use]
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }

    /// Local index file
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join("index.json")
    }

    /// Persisted node identity
    #[must_use]
    pub fn identity_path(&self) -> PathBuf {
        self.data_dir.join("node.id")
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(NodeError::InvalidConfig(
                format!("chunk_size must be between 1 and {MAX_CHUNK_SIZE}").into(),
            ));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(NodeError::invalid_config("data_dir must not be empty"));
        }
        Ok(())
    }
}

/// Discovery configuration
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Peers contacted on startup
    pub bootstrap_nodes: Vec<SocketAddr>,

    /// How often every local CID is re-announced
    pub announce_interval: Duration,

    /// Lifetime of provider records learned from peers
    pub provider_ttl: Duration,

    /// Peers contacted per announce or provider query
    pub replication: usize,

    /// Timeout for discovery requests
    pub request_timeout: Duration,

    /// Maximum peers remembered
    pub max_peers: usize,

    /// Advertise stored content to peers
    ///
    /// Off for processes that exit right after their command, since nothing
    /// serves their listen address afterwards.
    pub announce: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            bootstrap_nodes: Vec::new(),
            announce_interval: Duration::from_secs(300), // 5 minutes
            provider_ttl: torrentium_discovery::DEFAULT_PROVIDER_TTL,
            replication: torrentium_discovery::K,
            request_timeout: Duration::from_secs(5),
            max_peers: 1024,
            announce: true,
        }
    }
}

impl DiscoveryConfig {
    fn validate(&self) -> Result<()> {
        if self.replication == 0 {
            return Err(NodeError::invalid_config("replication must be at least 1"));
        }
        if self.announce_interval.is_zero() {
            return Err(NodeError::invalid_config("announce_interval must be non-zero"));
        }
        if self.provider_ttl <= self.announce_interval {
            return Err(NodeError::invalid_config(
                "provider_ttl must exceed announce_interval",
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(NodeError::invalid_config("request_timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Transfer configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Where completed downloads are written
    pub download_dir: PathBuf,

    /// Maximum chunk requests in flight per download
    pub max_concurrent_chunks: usize,

    /// Attempts per chunk before the download fails
    pub max_chunk_attempts: u32,

    /// Timeout for one chunk or manifest request
    pub chunk_timeout: Duration,

    /// Optional deadline for a whole download
    pub download_timeout: Option<Duration>,

    /// Backoff between attempts of the same chunk
    pub retry: RetryConfig,

    /// Buffered events per subscriber before it starts lagging
    pub event_capacity: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            max_concurrent_chunks: 4,
            max_chunk_attempts: 3,
            chunk_timeout: Duration::from_secs(10),
            download_timeout: None,
            retry: RetryConfig::default(),
            event_capacity: 1024,
        }
    }
}

impl TransferConfig {
    /// Download directory
    #[must_use]
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrent_chunks == 0 {
            return Err(NodeError::invalid_config(
                "max_concurrent_chunks must be at least 1",
            ));
        }
        if self.max_chunk_attempts == 0 {
            return Err(NodeError::invalid_config(
                "max_chunk_attempts must be at least 1",
            ));
        }
        if self.chunk_timeout.is_zero() {
            return Err(NodeError::invalid_config("chunk_timeout must be non-zero"));
        }
        if self.download_timeout.is_some_and(|t| t.is_zero()) {
            return Err(NodeError::invalid_config("download_timeout must be non-zero"));
        }
        if self.event_capacity == 0 {
            return Err(NodeError::invalid_config("event_capacity must be at least 1"));
        }
        self.retry.validate()
    }
}

/// Retry backoff configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Backoff before the first retry
    pub initial_backoff: Duration,

    /// Upper bound on backoff
    pub max_backoff: Duration,

    /// Backoff multiplier
    pub multiplier: f64,

    /// Add random jitter to prevent thundering herd
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (0-based)
    #[must_use]
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = base.min(self.max_backoff.as_millis() as f64);

        let duration = if self.jitter {
            // Up to 25% jitter
            let mut buf = [0u8; 4];
            let _ = getrandom::getrandom(&mut buf);
            let jitter_factor = f64::from(u32::from_le_bytes(buf) % 25) / 100.0;
            capped * (1.0 + jitter_factor)
        } else {
            capped
        };

        Duration::from_millis(duration as u64)
    }

    fn validate(&self) -> Result<()> {
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(NodeError::invalid_config("retry multiplier must be >= 1.0"));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(NodeError::invalid_config(
                "initial_backoff must not exceed max_backoff",
            ));
        }
        Ok(())
    }
}
