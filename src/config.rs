// src/config.rs
//! CLI configuration and startup validation (spec §6).

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use rsa::RsaPublicKey;

use crate::crypto::keys::parse_public_key_pem;
use crate::error::ProtocolError;

/// `olaf <listen_addr> <num_neighbours> <neighbour_url>... [--key-path <path>] [--peer-keys <path>]`
#[derive(Debug, Parser)]
#[command(name = "olaf", about = "Federated end-to-end-encrypted chat overlay server")]
pub struct Cli {
    /// Address this server listens on, e.g. `127.0.0.1:9000`.
    pub listen_addr: String,

    /// Number of neighbour URLs that follow.
    pub num_neighbours: usize,

    /// Neighbour server URLs to dial at startup.
    pub neighbour_urls: Vec<String>,

    /// This server's RSA identity keypair (generated on first run).
    #[arg(long, default_value = "./server_identity.pem")]
    pub key_path: PathBuf,

    /// JSON map of `neighbour_url -> PEM public key`, advertised out-of-band.
    #[arg(long)]
    pub peer_keys: Option<PathBuf>,
}

/// Validated runtime configuration, resolved from `Cli`.
pub struct Config {
    pub listen_addr: String,
    pub neighbour_urls: Vec<String>,
    pub key_path: PathBuf,
    pub peer_keys: HashMap<String, RsaPublicKey>,
}

impl Config {
    /// Parse and validate configuration, per spec §6 ("Fatal; abort
    /// process" on `ConfigError`).
    pub fn from_cli(cli: Cli) -> Result<Self, ProtocolError> {
        if cli.neighbour_urls.len() != cli.num_neighbours {
            return Err(ProtocolError::ConfigError(format!(
                "expected {} neighbour url(s), got {}",
                cli.num_neighbours,
                cli.neighbour_urls.len()
            )));
        }

        cli.listen_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| ProtocolError::ConfigError(format!("invalid listen_addr: {e}")))?;

        for url in &cli.neighbour_urls {
            url::Url::parse(url)
                .map_err(|e| ProtocolError::ConfigError(format!("invalid neighbour url {url}: {e}")))?;
        }

        let peer_keys = match cli.peer_keys {
            Some(path) => load_peer_keys(&path)?,
            None => HashMap::new(),
        };

        Ok(Config {
            listen_addr: cli.listen_addr,
            neighbour_urls: cli.neighbour_urls,
            key_path: cli.key_path,
            peer_keys,
        })
    }
}

fn load_peer_keys(path: &std::path::Path) -> Result<HashMap<String, RsaPublicKey>, ProtocolError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ProtocolError::ConfigError(format!("read peer-keys file {}: {e}", path.display())))?;
    let pem_map: HashMap<String, String> = serde_json::from_str(&raw)
        .map_err(|e| ProtocolError::ConfigError(format!("parse peer-keys file {}: {e}", path.display())))?;

    let mut keys = HashMap::with_capacity(pem_map.len());
    for (url, pem) in pem_map {
        let key = parse_public_key_pem(&pem)
            .map_err(|e| ProtocolError::ConfigError(format!("peer-keys entry {url}: {e}")))?;
        keys.insert(url, key);
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(listen: &str, n: usize, urls: Vec<&str>) -> Cli {
        Cli {
            listen_addr: listen.into(),
            num_neighbours: n,
            neighbour_urls: urls.into_iter().map(String::from).collect(),
            key_path: PathBuf::from("./server_identity.pem"),
            peer_keys: None,
        }
    }

    #[test]
    fn rejects_neighbour_count_mismatch() {
        let result = Config::from_cli(cli("127.0.0.1:9000", 2, vec!["ws://localhost:9001"]));
        assert!(matches!(result, Err(ProtocolError::ConfigError(_))));
    }

    #[test]
    fn rejects_invalid_listen_addr() {
        let result = Config::from_cli(cli("not-an-addr", 0, vec![]));
        assert!(matches!(result, Err(ProtocolError::ConfigError(_))));
    }

    #[test]
    fn accepts_well_formed_config() {
        let result = Config::from_cli(cli(
            "127.0.0.1:9000",
            1,
            vec!["ws://localhost:9001"],
        ));
        assert!(result.is_ok());
    }
}
