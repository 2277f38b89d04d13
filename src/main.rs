//! Peerlink - single-peer chat over a duplex byte link
//!
//! Listens for an inbound connection and dials discovered peers, keeping
//! exactly one live link at a time. Lines typed on stdin are sent to the
//! connected peer; received bytes are printed to the terminal.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use peerlink::config::ConfigManager;
use peerlink::link::{LinkEvent, LinkManager, PeerAddr};
use peerlink::transport::TcpTransport;

/// CLI arguments for Peerlink
#[derive(Parser, Debug)]
#[command(name = "peerlink")]
#[command(about = "Peerlink - single-peer chat over a duplex byte link")]
#[command(version)]
#[command(long_about = "
Peerlink - single-peer chat over a duplex byte link

Maintains one logical connection to a remote peer while staying ready to
accept an inbound connection or dial an outbound one. Stdin lines go to the
peer; received bytes are printed.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  PEERLINK_BIND_ADDR        - Bind address (e.g., 127.0.0.1:7655)
  PEERLINK_NODE_NAME        - Name advertised to peers
  PEERLINK_SERVICE_UUID     - Well-known service identifier
  PEERLINK_READ_BUFFER_SIZE - Read buffer size in bytes
  PEERLINK_DIAL_TIMEOUT     - Dial timeout (e.g., 10s, 1m)
  PEERLINK_LOG_LEVEL        - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "config.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Bind address (e.g., 127.0.0.1:7655)")]
    pub bind: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(short, long, help = "Port to bind to")]
    pub port: Option<u16>,

    /// Peer address to dial immediately after startup
    #[arg(long, help = "Peer address to dial (e.g., 192.168.1.20:7655)")]
    pub peer: Option<String>,

    /// Node name advertised to peers
    #[arg(short, long, help = "Node name advertised to peers")]
    pub name: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Dial timeout in seconds
    #[arg(long, help = "Dial timeout in seconds")]
    pub timeout: Option<u64>,

    /// Read buffer size in bytes
    #[arg(long, help = "Read buffer size in bytes")]
    pub buffer_size: Option<usize>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Initialize tracing
    init_tracing(&args)?;

    info!("Starting Peerlink v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        info!("Config file not found, checking environment variables");
        ConfigManager::load_from_env()?
    };

    // Apply CLI argument overrides (highest priority)
    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        args.name.as_deref(),
        args.timeout,
        args.buffer_size,
    );

    // Final validation after all overrides
    config
        .validate()
        .context("Final configuration validation failed")?;

    // If validate-config flag is set, just validate and exit
    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Bind address: {}", config.transport.bind_addr);
        info!("  Node name: {}", config.link.node_name);
        info!("  Service UUID: {}", config.link.service_uuid);
        info!("  Dial timeout: {:?}", config.transport.dial_timeout);
        info!(
            "  Read buffer size: {} bytes",
            config.transport.read_buffer_size
        );
        return Ok(());
    }

    info!("Configuration loaded successfully");
    info!("Bind address: {}", config.transport.bind_addr);
    info!("Node name: {}", config.link.node_name);

    let transport = Arc::new(
        TcpTransport::new(config.transport.bind_addr)
            .with_read_buffer_size(config.transport.read_buffer_size)
            .with_dial_timeout(config.transport.dial_timeout),
    );

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let manager = LinkManager::new(transport, config.service_id(), event_tx);

    manager.start();
    if let Some(peer) = &args.peer {
        info!("Dialing {}", peer);
        manager.connect(PeerAddr::from(peer.as_str()));
    }

    info!("Type a line to send it to the connected peer");
    info!("Press Ctrl+C to shut down");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                match event {
                    Some(event) => print_event(event),
                    None => break,
                }
            }
            line = lines.next_line() => {
                match line.context("Failed to read from stdin")? {
                    Some(line) => manager.write(Bytes::from(line.into_bytes())),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    manager.stop();
    info!("Shutdown complete");

    Ok(())
}

fn print_event(event: LinkEvent) {
    match event {
        LinkEvent::StateChanged(state) => info!("Link state: {}", state),
        LinkEvent::PeerIdentified(peer) => info!("Connected to {}", peer),
        LinkEvent::Received(bytes) => println!("<{}", String::from_utf8_lossy(&bytes)),
        LinkEvent::Sent(bytes) => println!(">{}", String::from_utf8_lossy(&bytes)),
        LinkEvent::Fault(message) => warn!("{}", message),
    }
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
