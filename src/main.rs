//! Soulwire - Game server message transport
//!
//! Runs the framed TCP server, or connects to one as a test client.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use soulwire::config::{self, Config};
use soulwire::dispatch::Dispatcher;
use soulwire::network::{self, NetworkConfig as NetConfig, Server, ServerEvent};
use soulwire::protocol::{self, kinds, ByteOrder, Message, WireFormat};

/// Soulwire - length-prefixed message transport
#[derive(Parser)]
#[command(name = "soulwire")]
#[command(author = "Soulwire Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Framed TCP message server for game clients", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Interface to bind to
        #[arg(short, long)]
        bind: Option<IpAddr>,

        /// Use little-endian headers
        #[arg(long)]
        little_endian: bool,
    },

    /// Connect to a server and exchange a greeting
    Connect {
        /// Server address to connect to
        #[arg(short, long)]
        server: String,

        /// Server port
        #[arg(short, long)]
        port: Option<u16>,

        /// Greeting to send
        #[arg(short, long, default_value = "Hello")]
        message: String,

        /// Use little-endian headers
        #[arg(long)]
        little_endian: bool,
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

    /// Show protocol information
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve {
            port,
            bind,
            little_endian,
        } => {
            let mut net_config = config.network_config()?;
            if let Some(port) = port {
                net_config.port = port;
            }
            if let Some(bind) = bind {
                net_config.bind_address = bind;
            }
            if little_endian {
                net_config.wire.byte_order = ByteOrder::Little;
            }
            run_server(&config, net_config).await?;
        }
        Commands::Connect {
            server,
            port,
            message,
            little_endian,
        } => {
            let mut net_config = config.network_config()?;
            if little_endian {
                net_config.wire.byte_order = ByteOrder::Little;
            }
            let port = port.unwrap_or(net_config.port);
            run_client(net_config, &server, port, &message).await?;
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
            print_protocol_info(&config.network_config()?.wire);
        }
    }

    Ok(())
}

/// Handlers the server answers out of the box
fn demo_dispatcher() -> anyhow::Result<Dispatcher> {
    let mut dispatcher = Dispatcher::new();

    dispatcher.register_fn(kinds::INIT_CONNECTION, |conn, message| async move {
        tracing::info!(
            "Greeting from {}: {}",
            conn.peer_addr(),
            message.payload_text()
        );
        conn.send(&Message::text(kinds::INIT_CONNECTION, "Yo!")).await
    })?;

    Ok(dispatcher)
}

/// Run the server until Ctrl+C
async fn run_server(config: &Config, net_config: NetConfig) -> anyhow::Result<()> {
    tracing::info!(
        "Starting Soulwire server '{}' on port {}",
        config.general.name,
        net_config.port
    );

    let mut server = Server::new(net_config, demo_dispatcher()?);
    let mut event_rx = server
        .take_event_receiver()
        .ok_or_else(|| anyhow::anyhow!("event receiver already taken"))?;

    // Binding failures are fatal.
    server.start().await?;

    println!("\n========================================");
    println!("  Soulwire Server Running");
    println!("========================================");
    println!("  Name: {}", config.general.name);
    if let Some(addr) = server.local_addr() {
        println!("  Listening: {}", addr);
    }
    println!("========================================");
    println!("\nWaiting for clients to connect...");
    println!("Press Ctrl+C to stop.\n");

    // Main event loop
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ServerEvent::ClientConnected { addr } => {
                        println!("+ Client connected: {}", addr);
                    }
                    ServerEvent::ClientDisconnected { addr, reason } => {
                        println!("- Client disconnected: {} ({})", addr, reason);
                    }
                    ServerEvent::Error { message } => {
                        tracing::error!("Server error: {}", message);
                    }
                    ServerEvent::Started { bind_addr } => {
                        tracing::debug!("Server started on {}", bind_addr);
                    }
                    ServerEvent::Stopped => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    server.stop().await?;
    tracing::info!("Server stopped");

    Ok(())
}

/// Connect, greet, and print the server's reply
async fn run_client(
    net_config: NetConfig,
    server: &str,
    port: u16,
    greeting: &str,
) -> anyhow::Result<()> {
    let addr: SocketAddr = match server.parse() {
        Ok(addr) => addr,
        Err(_) if server.contains(':') => {
            let (host, port) = server
                .rsplit_once(':')
                .ok_or_else(|| anyhow::anyhow!("invalid server address: {}", server))?;
            network::resolve_host(host, port.parse()?).await?
        }
        Err(_) => network::resolve_host(server, port).await?,
    };

    println!("Connecting to {}...", addr);
    let conn = network::connect_and_greet(addr, &net_config, greeting).await?;
    println!("Sent greeting: {}", greeting);

    let reply = conn.receive_timeout(Duration::from_secs(5)).await?;
    println!(
        "Reply (kind {}): {}",
        reply.kind(),
        reply.payload_text()
    );

    conn.close().await;
    Ok(())
}

/// Print protocol information
fn print_protocol_info(wire: &WireFormat) {
    println!("Soulwire Protocol Information");
    println!("=============================\n");

    println!("Header size: {} bytes (kind: u32, payload length: u32)", protocol::HEADER_SIZE);
    println!("Byte order: {:?}", wire.byte_order);
    println!("Max payload: {} bytes", wire.max_payload_size);
    println!("Default port: {}", protocol::DEFAULT_PORT);
    println!("\nWell-known kinds:");
    println!("  {:>3}  INIT_CONNECTION", kinds::INIT_CONNECTION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["soulwire", "info"]);
        assert!(cli.is_ok());

        let cli = Cli::try_parse_from(["soulwire", "serve", "--port", "9000", "--little-endian"]).unwrap();
        match cli.command {
            Commands::Serve { port, little_endian, .. } => {
                assert_eq!(port, Some(9000));
                assert!(little_endian);
            }
            _ => panic!("Wrong command"),
        }
    }

    #[test]
    fn test_connect_requires_server() {
        assert!(Cli::try_parse_from(["soulwire", "connect"]).is_err());
    }

    #[test]
    fn test_demo_dispatcher_handles_greeting() {
        let dispatcher = demo_dispatcher().unwrap();
        assert!(dispatcher.has_handler(kinds::INIT_CONNECTION));
    }
}
