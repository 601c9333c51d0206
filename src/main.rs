//! craftnet - Block-game server data plane
//!
//! Runs the TCP reactor, the worker pool and the session logic.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use craftnet::config::{self, Config};
use craftnet::job::Dispatcher;
use craftnet::network::{Server, ServerEvent, SessionHandler};
use craftnet::protocol::{self, PROTOCOL_VERSION};

/// craftnet - block-game server
#[derive(Parser)]
#[command(name = "craftnet")]
#[command(author = "CraftNet Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Serve block-game clients over the legacy wire protocol", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server
    Serve {
        /// Port to listen on (overrides the configuration)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show build and protocol information
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    match cli.command {
        Commands::Serve { port } => {
            run_server(config, port).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_info(&config);
        }
    }

    Ok(())
}

/// Run the server until Ctrl+C
async fn run_server(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let mut listener = config.listener();
    if let Some(port) = port {
        listener.port = port;
    }

    let handler = Arc::new(SessionHandler::new(config.session()));
    let dispatcher = Arc::new(Dispatcher::start(
        config.workers.count,
        config.workers.queue_capacity,
        handler.clone(),
    )?);

    let mut server = Server::new(listener, dispatcher.clone());
    let mut event_rx = server
        .take_event_receiver()
        .ok_or_else(|| anyhow::anyhow!("server event receiver already taken"))?;

    let addr = server.start().await?;

    println!("\n========================================");
    println!("  {} running", config.server.name);
    println!("========================================");
    println!("  Address: {}", addr);
    println!("  Protocol: {}", PROTOCOL_VERSION);
    println!("  Workers: {}", dispatcher.workers());
    println!("========================================");
    println!("\nPress Ctrl+C to stop.\n");

    // Main event loop
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ServerEvent::ClientConnected { id, addr } => {
                        tracing::debug!("Client {} connected from {}", id, addr);
                    }
                    ServerEvent::ClientDisconnected { id, addr, reason } => {
                        tracing::debug!("Client {} ({}) disconnected: {}", id, addr, reason);
                    }
                    ServerEvent::Started { .. } | ServerEvent::Stopped => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    server.stop().await?;
    dispatcher.shutdown().await;
    tracing::info!(
        "Server stopped ({} players were online)",
        handler.players().len()
    );

    Ok(())
}

/// Print build and protocol information
fn print_info(config: &Config) {
    println!("craftnet {}", env!("CARGO_PKG_VERSION"));
    println!("======================\n");

    println!("Protocol version: {}", PROTOCOL_VERSION);
    println!("Default port: {}", protocol::DEFAULT_PORT);
    println!(
        "Read watermarks: low {} / high {} bytes",
        config.network.low_watermark, config.network.high_watermark
    );
    println!(
        "Workers: {} (queue {})",
        config.workers.count, config.workers.queue_capacity
    );

    if let Some(dir) = dirs::config_dir() {
        println!(
            "\nConfiguration is read from {} or ./craftnet.toml",
            dir.join("craftnet/craftnet.toml").display()
        );
    }
}
