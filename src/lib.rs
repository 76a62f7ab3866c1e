// src/lib.rs
//! A federated, end-to-end-encrypted chat overlay server: signed-envelope
//! protocol, federation/roster state machine, hybrid RSA+AES-GCM message
//! format.

pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod federation;
pub mod session;
pub mod transport;

use std::sync::Arc;

use rsa::{RsaPrivateKey, RsaPublicKey};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::crypto::keys;
use crate::error::ProtocolError;
use crate::federation::FederationState;
use crate::session::{LinkId, PeerKeys};
use crate::transport::WsLink;

/// This server's own RSA identity (spec §3 Identity, §6 `--key-path`).
pub struct ServerIdentity {
    pub private_key: RsaPrivateKey,
    pub public_key: RsaPublicKey,
    pub public_key_pem: String,
}

impl ServerIdentity {
    pub fn load_or_create(path: &std::path::Path) -> anyhow::Result<Self> {
        let (private_key, public_key) = keys::load_or_create(path)?;
        let public_key_pem = keys::export_public_key_pem(&public_key)?;
        Ok(ServerIdentity {
            private_key,
            public_key,
            public_key_pem,
        })
    }
}

/// The running server: owns federation state, identity, and configuration.
/// Constructed and `run()` explicitly in `main` — no hidden global
/// singleton (spec §9 "Global state").
pub struct Server {
    pub fed: Arc<FederationState>,
    pub identity: Arc<ServerIdentity>,
    pub peer_keys: Arc<PeerKeys>,
    pub listen_addr: String,
    pub neighbour_urls: Vec<String>,
}

impl Server {
    pub fn new(config: Config, identity: ServerIdentity) -> Self {
        let self_url = format!("ws://{}", config.listen_addr);
        Server {
            fed: FederationState::new(self_url),
            identity: Arc::new(identity),
            peer_keys: Arc::new(config.peer_keys),
            listen_addr: config.listen_addr,
            neighbour_urls: config.neighbour_urls,
        }
    }

    /// Bind the listener, dial every configured neighbour once, then accept
    /// inbound connections until the process is killed (spec §6, §4.3
    /// bootstrap dial sweep).
    pub async fn run(self) -> Result<(), ProtocolError> {
        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .map_err(|e| ProtocolError::ConfigError(format!("bind {}: {e}", self.listen_addr)))?;
        info!(addr = %self.listen_addr, "listening");

        for url in self.neighbour_urls.clone() {
            let fed = self.fed.clone();
            let identity = self.identity.clone();
            let peer_keys = self.peer_keys.clone();
            tokio::spawn(async move {
                if let Err(e) = dial_and_run(fed, identity, peer_keys, url.clone()).await {
                    warn!(%url, error = %e, "initial dial failed");
                }
            });
        }

        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    continue;
                }
            };

            let fed = self.fed.clone();
            let identity = self.identity.clone();
            let peer_keys = self.peer_keys.clone();

            tokio::spawn(async move {
                let ws_stream = match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(e) => {
                        warn!(%peer_addr, error = %e, "websocket handshake failed");
                        return;
                    }
                };
                let link = WsLink::new(ws_stream);
                let link_id = LinkId::next();
                session::run_inbound(fed, identity, peer_keys, link_id, link).await;
            });
        }
    }
}

async fn dial_and_run(
    fed: Arc<FederationState>,
    identity: Arc<ServerIdentity>,
    peer_keys: Arc<PeerKeys>,
    url: String,
) -> anyhow::Result<()> {
    let (ws_stream, _response) = tokio_tungstenite::connect_async(&url).await?;
    let link = WsLink::new(ws_stream);
    let link_id = LinkId::next();
    session::dial_neighbour(fed, identity, peer_keys, link_id, link, url).await;
    Ok(())
}
