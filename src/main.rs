//! thoth-core: document-ingestion and semantic-search control plane.
//!
//! A thin `serve` entry point binding the HTTP control-plane surface of
//! §6.1; the rest of the core is a library other processes (batch worker,
//! CLI) link against (§6.4).

mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};

use thoth_core::config::RuntimeConfig;
use thoth_core::logging;

#[derive(Parser)]
#[command(name = "thoth-core")]
#[command(about = "Document ingestion and semantic-search control plane")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP control-plane server
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = RuntimeConfig::from_env();
    logging::init(config.log_format_json);

    let port = match Cli::parse().command {
        Some(Commands::Serve { port }) => port,
        None => None,
    };
    if let Some(port) = port {
        config.bind_port = port;
    }
    server::run_server(config).await
}
