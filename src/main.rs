//! Towerloop: escape-room broadcast relay
//!
//! Accepts WebSocket connections from the room's displays and control
//! panels and forwards every message to all connected peers. Optionally
//! serves the display bundle from a static directory on the same port.
//!
//! Usage:
//!   towerloop                                  # Port 3030 (or $PORT), all interfaces
//!   towerloop --port 3000                      # Custom port
//!   towerloop --static-dir ./dist              # Also serve the views
//!   towerloop --no-echo                        # Do not send frames back to their sender

use std::path::PathBuf;

use clap::Parser;
use towerloop_protocol::EventTypes;
use towerloop_relay::{RelayConfig, RelayServer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "towerloop", about = "Towerloop: escape-room broadcast relay")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, env = "PORT", default_value = "3030")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "0.0.0.0")]
    hostname: String,

    /// Path the WebSocket endpoint is mounted at
    #[arg(long, default_value = "/ws")]
    ws_path: String,

    /// Directory of static assets (index.html, 404.html, bundles)
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Maximum concurrent connections
    #[arg(long, default_value = "64")]
    max_connections: usize,

    /// Frames buffered per peer before a slow peer starts missing frames
    #[arg(long, default_value = "256")]
    peer_queue_capacity: usize,

    /// Do not echo frames back to the peer that sent them
    #[arg(long)]
    no_echo: bool,

    /// Enable verbose logging (includes frame contents)
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_tracing(cli: &Cli) {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Some(ref log_path) = cli.log_file {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        match std::fs::OpenOptions::new().create(true).append(true).open(log_path) {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .init();
                eprintln!("Logging to {}", log_path.display());
                return;
            }
            Err(e) => {
                eprintln!("Failed to open log file {}: {e}; logging to stderr", log_path.display());
            }
        }
    }

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    if let Some(ref dir) = cli.static_dir {
        if !dir.is_dir() {
            error!("Static directory {} does not exist", dir.display());
            std::process::exit(1);
        }
    }

    let config = RelayConfig {
        port: cli.port,
        hostname: cli.hostname.clone(),
        ws_path: cli.ws_path.clone(),
        static_dir: cli.static_dir.clone(),
        max_connections: Some(cli.max_connections),
        peer_queue_capacity: cli.peer_queue_capacity,
        echo_to_sender: !cli.no_echo,
        verbose_logging: cli.verbose,
    };

    let mut relay = match RelayServer::start(config).await {
        Ok(relay) => relay,
        Err(e) => {
            error!("Failed to start relay: {e}");
            std::process::exit(1);
        }
    };

    println!();
    println!("  Towerloop relay running");
    println!();
    println!("  WebSocket:  ws://{}:{}{}", cli.hostname, relay.port(), cli.ws_path);
    match &cli.static_dir {
        Some(dir) => println!("  Static:     {}", dir.display()),
        None => println!("  Static:     disabled"),
    }
    println!("  Echo:       {}", if cli.no_echo { "off" } else { "on" });
    println!("  Heartbeat:  clients send `{}` events", EventTypes::PING);
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {e}");
    }

    info!("Shutting down ({} peers connected)", relay.peer_count());
    relay.stop().await;
}
