//! Configuration system for the Torrentium CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use torrentium_core::NodeConfig as EngineConfig;
use torrentium_files::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};

/// Torrentium configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Node configuration
    #[serde(default)]
    pub node: NodeConfig,
    /// Discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Transfer configuration
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Store, index and identity location
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Listen address for `serve`
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Peers contacted on startup (`host:port`)
    #[serde(default)]
    pub bootstrap_nodes: Vec<String>,
    /// Seconds between re-announcements of local content
    #[serde(default = "default_announce_interval")]
    pub announce_interval_secs: u64,
    /// Seconds a learned provider record stays valid
    #[serde(default = "default_provider_ttl")]
    pub provider_ttl_secs: u64,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Where downloads are written
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Chunk size in bytes for added files
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Chunk requests in flight per download
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_chunks: usize,
    /// Attempts per chunk
    #[serde(default = "default_max_attempts")]
    pub max_chunk_attempts: u32,
    /// Per-request timeout in seconds
    #[serde(default = "default_chunk_timeout")]
    pub chunk_timeout_secs: u64,
    /// Optional whole-download deadline in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_timeout_secs: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("torrentium")
}

fn default_listen_addr() -> String {
    "0.0.0.0:7070".to_string()
}

fn default_announce_interval() -> u64 {
    300
}

fn default_provider_ttl() -> u64 {
    3600
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| default_data_dir().join("downloads"))
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_concurrent() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_chunk_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            bootstrap_nodes: Vec::new(),
            announce_interval_secs: default_announce_interval(),
            provider_ttl_secs: default_provider_ttl(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            chunk_size: default_chunk_size(),
            max_concurrent_chunks: default_max_concurrent(),
            max_chunk_attempts: default_max_attempts(),
            chunk_timeout_secs: default_chunk_timeout(),
            download_timeout_secs: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("torrentium/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            if let Err(e) = config.save(&path) {
                tracing::debug!(path = %path.display(), error = %e, "could not write default config");
            }
            Ok(config)
        }
    }

    /// Parse listen address as `SocketAddr`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.node
            .listen_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address '{}': {e}", self.node.listen_addr))
    }

    /// Resolve bootstrap nodes, skipping ones that do not resolve
    #[must_use]
    pub fn resolve_bootstrap(&self) -> Vec<SocketAddr> {
        self.discovery
            .bootstrap_nodes
            .iter()
            .filter_map(|node| match node.to_socket_addrs() {
                Ok(mut addrs) => addrs.next(),
                Err(e) => {
                    tracing::warn!(node = %node, error = %e, "cannot resolve bootstrap node");
                    None
                }
            })
            .collect()
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.parse_listen_addr()?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > MAX_CHUNK_SIZE {
            anyhow::bail!("Chunk size must be between 1 and 16MB");
        }

        if self.transfer.max_concurrent_chunks == 0 || self.transfer.max_concurrent_chunks > 256 {
            anyhow::bail!("Max concurrent chunks must be between 1 and 256");
        }

        if self.transfer.max_chunk_attempts == 0 {
            anyhow::bail!("Max chunk attempts must be at least 1");
        }

        if self.transfer.chunk_timeout_secs == 0 {
            anyhow::bail!("Chunk timeout must be at least 1 second");
        }

        if self.discovery.provider_ttl_secs <= self.discovery.announce_interval_secs {
            anyhow::bail!("Provider TTL must exceed the announce interval");
        }

        for node in &self.discovery.bootstrap_nodes {
            validate_host_port(node, "Bootstrap node")?;
        }

        Ok(())
    }

    /// Engine configuration for these settings
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address does not parse.
    pub fn to_node_config(&self) -> anyhow::Result<EngineConfig> {
        let mut config = EngineConfig::default();
        config.listen_addr = self.parse_listen_addr()?;

        config.storage.data_dir = self.node.data_dir.clone();
        config.storage.chunk_size = self.transfer.chunk_size;

        config.discovery.bootstrap_nodes = self.resolve_bootstrap();
        config.discovery.announce_interval = Duration::from_secs(self.discovery.announce_interval_secs);
        config.discovery.provider_ttl = Duration::from_secs(self.discovery.provider_ttl_secs);

        config.transfer.download_dir = self.transfer.download_dir.clone();
        config.transfer.max_concurrent_chunks = self.transfer.max_concurrent_chunks;
        config.transfer.max_chunk_attempts = self.transfer.max_chunk_attempts;
        config.transfer.chunk_timeout = Duration::from_secs(self.transfer.chunk_timeout_secs);
        config.transfer.download_timeout = self.transfer.download_timeout_secs.map(Duration::from_secs);

        Ok(config)
    }
}

/// Validate host:port format
fn validate_host_port(addr: &str, name: &str) -> anyhow::Result<()> {
    let Some((host, port_str)) = addr.rsplit_once(':') else {
        anyhow::bail!("{name} '{addr}' missing port (expected format: host:port)");
    };

    let port: u16 = port_str
        .parse()
        .map_err(|_| anyhow::anyhow!("{name} '{addr}' has invalid port: {port_str}"))?;
    if port == 0 {
        anyhow::bail!("{name} '{addr}' has invalid port: 0");
    }

    if host.is_empty() {
        anyhow::bail!("{name} '{addr}' has empty hostname");
    }
    if host.contains("..") || host.contains('/') || host.contains('\\') {
        anyhow::bail!("{name} '{addr}' contains invalid characters");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.node.listen_addr, "0.0.0.0:7070");
        assert_eq!(config.transfer.chunk_size, 256 * 1024);
        assert_eq!(config.transfer.max_concurrent_chunks, 4);
        assert_eq!(config.transfer.max_chunk_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transfer.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.discovery.bootstrap_nodes = vec!["no-port".to_string()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.discovery.bootstrap_nodes = vec!["seed.example.org:7070".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [transfer]
            max_concurrent_chunks = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.transfer.max_concurrent_chunks, 8);
        assert_eq!(config.transfer.chunk_size, 256 * 1024);
        assert_eq!(config.node.listen_addr, "0.0.0.0:7070");
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.transfer.download_timeout_secs = Some(600);
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.transfer.download_timeout_secs, Some(600));
        assert_eq!(loaded.node.data_dir, config.node.data_dir);
    }

    #[test]
    fn test_to_node_config() {
        let mut config = Config::default();
        config.node.listen_addr = "127.0.0.1:9100".to_string();
        config.discovery.bootstrap_nodes = vec!["127.0.0.1:9200".to_string()];
        config.transfer.download_timeout_secs = Some(30);

        let engine = config.to_node_config().unwrap();
        let bootstrap: SocketAddr = "127.0.0.1:9200".parse().unwrap();
        assert_eq!(engine.listen_addr, "127.0.0.1:9100".parse::<SocketAddr>().unwrap());
        assert_eq!(engine.discovery.bootstrap_nodes, vec![bootstrap]);
        assert_eq!(engine.transfer.download_timeout, Some(Duration::from_secs(30)));
        engine.validate().unwrap();
    }
}
