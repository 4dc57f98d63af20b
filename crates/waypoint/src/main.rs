//! Waypoint - a tool-using agent that delegates to other agents

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{chat_command, init_command, serve_command, status_command};

/// Waypoint - tool-using agent for your terminal
#[derive(Parser)]
#[command(name = "waypoint")]
#[command(about = "◆ A tool-using agent that delegates to other agents")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config
    Init,
    /// Show configuration and backend status
    Status,
    /// Chat with the agent
    Chat {
        /// Message to send; omit for interactive mode
        #[arg(short, long)]
        message: Option<String>,
        /// Remote agent whose skills become tools (repeatable)
        #[arg(short, long = "remote", value_name = "URL")]
        remotes: Vec<String>,
    },
    /// Host the agent for other agents
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Init => init_command().await,
        Commands::Status => status_command().await,
        Commands::Chat { message, remotes } => chat_command(message, remotes).await,
        Commands::Serve { port } => serve_command(port).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
