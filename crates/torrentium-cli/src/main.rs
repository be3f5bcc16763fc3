//! Torrentium CLI
//!
//! Share files by content and fetch them from peers.

mod config;
mod progress;

use clap::{Parser, Subcommand};
use console::style;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use torrentium_core::{LocalIndex, Node, NodeConfig, TransferEvent};

use config::Config;
use progress::{TransferProgress, format_bytes, format_duration};

/// Torrentium - content-addressed peer-to-peer file sharing
#[derive(Parser)]
#[command(name = "torrentium")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Extra bootstrap peer (`host:port`), may be repeated
    #[arg(short, long, global = true)]
    bootstrap: Vec<String>,

    /// Listen address (one-shot commands default to an ephemeral port and never announce)
    #[arg(short, long, global = true)]
    listen: Option<SocketAddr>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a file to the store; `serve` announces it
    Add {
        /// File to share
        #[arg(required = true)]
        file: PathBuf,
    },

    /// List files known to this node
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Download a file by CID
    Download {
        /// Content identifier
        #[arg(required = true)]
        cid: String,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Forget a file and stop sharing it
    Remove {
        /// Content identifier
        #[arg(required = true)]
        cid: String,
    },

    /// Run as a long-lived node, serving stored content
    Serve,

    /// Show node identity, peers and stored files
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    if let Some(data_dir) = cli.data_dir {
        config.node.data_dir = data_dir;
    }
    config.discovery.bootstrap_nodes.extend(cli.bootstrap);

    // Validate configuration
    config.validate()?;

    // Initialize logging
    let level = if cli.verbose { "debug" } else { config.logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let listen = cli.listen;
    match cli.command {
        Commands::Add { file } => {
            add_file(file, listen, &config).await?;
        }
        Commands::List { json } => {
            list_files(json, &config).await?;
        }
        Commands::Download { cid, output } => {
            if let Some(output) = output {
                config.transfer.download_dir = output;
            }
            download(cid, listen, &config).await?;
        }
        Commands::Remove { cid } => {
            remove_file(cid, listen, &config).await?;
        }
        Commands::Serve => {
            serve(listen, &config).await?;
        }
        Commands::Status => {
            show_status(listen, &config).await?;
        }
    }

    Ok(())
}

/// Engine settings for a command
///
/// One-shot commands bind an ephemeral port unless told otherwise and do not
/// announce, since nothing serves their content once they exit.
fn node_config(config: &Config, listen: Option<SocketAddr>, one_shot: bool) -> anyhow::Result<NodeConfig> {
    let mut engine = config.to_node_config()?;
    match listen {
        Some(addr) => engine.listen_addr = addr,
        None if one_shot => engine.listen_addr.set_port(0),
        None => {}
    }
    if one_shot {
        engine.discovery.announce = false;
    }
    Ok(engine)
}

async fn start_node(config: &Config, listen: Option<SocketAddr>, one_shot: bool) -> anyhow::Result<Node> {
    Ok(Node::start(node_config(config, listen, one_shot)?).await?)
}

/// Add a file to the local store and index
async fn add_file(file: PathBuf, listen: Option<SocketAddr>, config: &Config) -> anyhow::Result<()> {
    if !file.is_file() {
        anyhow::bail!("File not found: {}", file.display());
    }

    let node = start_node(config, listen, true).await?;
    let started = Instant::now();
    let result = node.add_file(&file).await;
    node.shutdown().await;
    let cid = result?;

    let size = std::fs::metadata(&file).map(|m| m.len()).unwrap_or(0);
    println!("{} {}", style("Added").green().bold(), file.display());
    println!("  Size: {}", format_bytes(size));
    println!("  Time: {}", format_duration(started.elapsed()));
    println!("  CID:  {}", style(cid).cyan());
    println!("Run `torrentium serve` to share it");
    Ok(())
}

/// Print the local index without starting the network
async fn list_files(json: bool, config: &Config) -> anyhow::Result<()> {
    let node_config = config.to_node_config()?;
    let index = LocalIndex::open(node_config.storage.index_path()).await?;
    let records = index.list().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No files yet. Share one with `torrentium add <file>`.");
        return Ok(());
    }

    for record in records {
        println!(
            "{}  {:>10}  {}",
            style(record.cid).cyan(),
            format_bytes(record.file_size),
            record.filename
        );
        println!("    {}", style(record.file_path.display()).dim());
    }
    Ok(())
}

/// Download a CID, showing chunk progress; Ctrl+C cancels
async fn download(cid: String, listen: Option<SocketAddr>, config: &Config) -> anyhow::Result<()> {
    let node = start_node(config, listen, true).await?;
    let mut events = node.subscribe();
    let cid = match node.download_file(&cid) {
        Ok(cid) => cid,
        Err(e) => {
            node.shutdown().await;
            return Err(e.into());
        }
    };

    println!("{} {}", style("Fetching").bold(), style(cid).cyan());
    let progress = TransferProgress::new(&cid.short());
    let started = Instant::now();

    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) if event.cid() != &cid => {}
                Ok(TransferEvent::DownloadProgress { received, total, .. }) => {
                    progress.update(received, total);
                }
                Ok(TransferEvent::DownloadComplete { filename, .. }) => {
                    progress.finish_with_message(format!("Downloaded: {filename}"));
                    break Ok(filename);
                }
                Ok(TransferEvent::DownloadError { message, kind, .. }) => {
                    progress.abandon_with_message(format!("Failed: {message}"));
                    break Err(anyhow::anyhow!("download failed ({kind:?}): {message}"));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "progress events dropped");
                }
                Err(RecvError::Closed) => {
                    break Err(anyhow::anyhow!("node stopped before the download finished"));
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("cancelling download");
                node.cancel_download(&cid.to_string())?;
            }
        }
    };

    node.shutdown().await;
    let filename = outcome?;

    let path = config.transfer.download_dir.join(&filename);
    println!("{} {}", style("Saved").green().bold(), path.display());
    println!("  Time: {}", format_duration(started.elapsed()));
    Ok(())
}

/// Remove a file from the index and the store
async fn remove_file(cid: String, listen: Option<SocketAddr>, config: &Config) -> anyhow::Result<()> {
    let node = start_node(config, listen, true).await?;
    let result = node.remove_file(&cid).await;
    node.shutdown().await;

    if result? {
        println!("{} {}", style("Removed").green().bold(), cid.trim());
    } else {
        println!("{} {} is not known here", style("Nothing to do:").yellow(), cid.trim());
    }
    Ok(())
}

/// Run until Ctrl+C, serving stored content
async fn serve(listen: Option<SocketAddr>, config: &Config) -> anyhow::Result<()> {
    let node = start_node(config, listen, false).await?;
    let files = node.list_local_files().await;

    println!("{} {}", style("Node").bold(), node.local_peer().id);
    println!("  Listening on {}", node.listen_addr());
    println!("  Sharing {} file(s)", files.len());
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    let stats = node.server_stats();
    node.shutdown().await;
    println!(
        "Served {} in {} frame(s)",
        format_bytes(stats.bytes_sent),
        stats.frames_sent
    );
    Ok(())
}

/// Print node identity, reachable peers and stored files
async fn show_status(listen: Option<SocketAddr>, config: &Config) -> anyhow::Result<()> {
    let node = start_node(config, listen, true).await?;
    let peers = node.known_peers().await;
    let files = node.list_local_files().await;
    let stored: u64 = files.iter().map(|f| f.file_size).sum();

    println!("{}", style("Torrentium Status").bold());
    println!("  Node ID:    {}", node.local_peer().id);
    println!("  Data dir:   {}", config.node.data_dir.display());
    println!("  Downloads:  {}", config.transfer.download_dir.display());
    println!("  Files:      {} ({})", files.len(), format_bytes(stored));
    println!("  Peers:      {}", peers.len());
    for peer in peers {
        println!("    {peer}");
    }

    node.shutdown().await;
    Ok(())
}
