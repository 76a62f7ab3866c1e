// src/main.rs
//! CLI launcher: `olaf <listen_addr> <num_neighbours> <neighbour_url>...
//! [--key-path <path>] [--peer-keys <path>]` (spec §6).

use clap::Parser;
use olaf::config::{Cli, Config};
use olaf::{Server, ServerIdentity};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match Config::from_cli(cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            std::process::exit(1);
        }
    };

    let identity = match ServerIdentity::load_or_create(&config.key_path) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::error!(error = %e, "failed to load or create server identity");
            std::process::exit(1);
        }
    };

    let server = Server::new(config, identity);
    if let Err(e) = server.run().await {
        tracing::error!(error = %e, "server exited with error");
        std::process::exit(1);
    }
}
