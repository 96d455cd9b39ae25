//! Blockgate - Minimal game server front end
//!
//! Answers server list pings and acknowledges logins for clients speaking
//! the length-prefixed VarInt protocol.

mod config;
mod network;
mod protocol;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use network::{InMemoryRegistry, Server, ServerEvent};

/// Blockgate - game server handshake front end
#[derive(Parser)]
#[command(name = "blockgate")]
#[command(author = "Blockgate Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Answer server list pings and logins", long_about = None)]
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

        /// Maximum concurrent sessions
        #[arg(short, long)]
        max_players: Option<u32>,

        /// Description shown in the server list
        #[arg(long)]
        motd: Option<String>,
    },

    /// Query a server's status and latency
    Status {
        /// Server host, optionally with :port
        host: String,

        /// Server port
        #[arg(short, long, default_value_t = protocol::DEFAULT_PORT)]
        port: u16,
    },

    /// Send a login start and show the granted identity
    Login {
        /// Server host, optionally with :port
        host: String,

        /// Server port
        #[arg(short, long, default_value_t = protocol::DEFAULT_PORT)]
        port: u16,

        /// Name to log in with
        #[arg(short, long)]
        username: String,
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
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve {
            port,
            max_players,
            motd,
        } => {
            let mut config = config;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(max_players) = max_players {
                config.server.max_players = max_players;
            }
            if let Some(motd) = motd {
                config.server.motd = motd;
            }
            run_server(config).await?;
        }
        Commands::Status { host, port } => {
            run_status(config, &host, port).await?;
        }
        Commands::Login {
            host,
            port,
            username,
        } => {
            run_login(config, &host, port, &username).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                if let Some(path) = output {
                    config::sample_config().save(&path)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", config::generate_sample_config()?);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_protocol_info();
        }
    }

    Ok(())
}

/// Run the server until Ctrl+C
async fn run_server(config: Config) -> anyhow::Result<()> {
    let descriptor = config.descriptor();

    tracing::info!(
        "Starting blockgate server on port {} (protocol {} / {})",
        config.server.port,
        descriptor.protocol_version,
        descriptor.version_name
    );
    tracing::info!("Max players: {}", descriptor.max_players);

    let registry = Arc::new(InMemoryRegistry::new());
    let mut server = Server::new(config.network(), descriptor, registry);

    let mut event_rx = server
        .take_event_receiver()
        .ok_or_else(|| anyhow::anyhow!("server event receiver already taken"))?;

    let bind_addr = server.start().await?;

    println!("\n========================================");
    println!("  Blockgate Server Running");
    println!("========================================");
    println!("  Address: {}", bind_addr);
    println!("  Version: {}", config.protocol.version_name);
    println!("  Players: {}", config.server.max_players);
    println!("========================================");
    println!("\nPress Ctrl+C to stop.\n");

    // Main event loop
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ServerEvent::Started { bind_addr } => {
                        tracing::debug!("Accepting connections on {}", bind_addr);
                    }
                    ServerEvent::SessionOpened { id, addr } => {
                        tracing::debug!("Session {} opened from {}", id, addr);
                    }
                    ServerEvent::SessionClosed { id, addr, username, reason } => {
                        let online = server.online().await;
                        match username {
                            Some(name) => tracing::info!(
                                "Player {} ({}) disconnected: {}. Online: {}",
                                name, addr, reason, online
                            ),
                            None => tracing::info!(
                                "Session {} ({}) ended: {}. Online: {}",
                                id, addr, reason, online
                            ),
                        }
                    }
                    ServerEvent::Rejected { addr, reason } => {
                        tracing::info!("Rejected {}: {}", addr, reason);
                    }
                    ServerEvent::Error { message } => {
                        tracing::error!("Server error: {}", message);
                    }
                    ServerEvent::Stopped => {
                        tracing::warn!("Listener stopped unexpectedly");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    if server.is_running().await {
        server.stop().await?;
    }
    tracing::info!("Server stopped");

    Ok(())
}

/// Print the status of a remote server
async fn run_status(config: Config, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = network::resolve_host(host, port).await?;
    tracing::debug!("Querying status of {}", addr);

    let report = network::query_status(addr, &config.network()).await?;
    let status = &report.status;

    println!("Server:   {}", addr);
    println!(
        "Version:  {} (protocol {})",
        status.version.name, status.version.protocol
    );
    println!("Players:  {}/{}", status.players.online, status.players.max);
    println!("MOTD:     {}", status.description.text);
    println!("Latency:  {} ms", report.latency.as_millis());

    Ok(())
}

/// Log in to a remote server and print the granted identity
async fn run_login(config: Config, host: &str, port: u16, username: &str) -> anyhow::Result<()> {
    let addr = network::resolve_host(host, port).await?;
    tracing::debug!("Logging in to {} as {}", addr, username);

    let grant = network::login(addr, username, &config.network()).await?;

    println!("Logged in as {} ({})", grant.username, grant.uuid);

    Ok(())
}

/// Print protocol constants
fn print_protocol_info() {
    println!("Blockgate Protocol Information");
    println!("==============================\n");

    println!("Protocol Version: {}", protocol::PROTOCOL_VERSION);
    println!("Game Version: {}", protocol::VERSION_NAME);
    println!("Default Port: {}", protocol::DEFAULT_PORT);
    println!("Max Frame Size: {} bytes", protocol::DEFAULT_MAX_FRAME_SIZE);
    println!("Max String Length: {} bytes", protocol::DEFAULT_MAX_STRING_LENGTH);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["blockgate", "info"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_serve_overrides() {
        let cli = Cli::try_parse_from(["blockgate", "serve", "--port", "25570", "-m", "5"]).unwrap();
        match cli.command {
            Commands::Serve {
                port, max_players, ..
            } => {
                assert_eq!(port, Some(25570));
                assert_eq!(max_players, Some(5));
            }
            _ => panic!("expected serve command"),
        }
    }

    #[test]
    fn test_login_requires_username() {
        assert!(Cli::try_parse_from(["blockgate", "login", "localhost"]).is_err());
        assert!(Cli::try_parse_from(["blockgate", "login", "localhost", "-u", "Steve"]).is_ok());
    }
}
