//! Agent Relay - share one agent session over HTTP and SSE
//!
//! This is the main entry point for the relay server.

mod cli;

use agent_relay::{error::Result, RelayConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(name = "agent-relay")]
#[command(about = "Share one long-lived agent session with many observers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set log level
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/SSE server and relay the agent session
    Serve {
        /// Server address (overrides server.addr)
        #[arg(long)]
        addr: Option<String>,

        /// Agent executable (overrides agent.command)
        #[arg(long)]
        agent_command: Option<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Use specified level for the relay, but WARN for noisy transport crates
    let filter = EnvFilter::new(format!(
        "agent_relay={},tower_http={},hyper=warn,tokio_util=warn",
        level.as_str().to_lowercase(),
        level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // Write logs to stderr, not stdout
        .init();

    debug!("Agent Relay v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = RelayConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            addr,
            agent_command,
        } => cli::serve::handle(config, addr, agent_command).await,
        Commands::Config => cli::config::handle(&config),
    }
}
