// src/federation/roster.rs
//! Roster broadcast and chat relay logic (spec §4.3). The server never
//! holds a client's private key, so chat payloads are forwarded as opaque,
//! already-signed bytes — decryption (and thus recipient determination) is
//! entirely a client-side affair.

use std::sync::Arc;

use bytes::Bytes;
use tracing::warn;

use crate::envelope::{InnerMessage, ServerClients, SignedEnvelope};
use crate::federation::FederationState;

/// Announce this server's current local client set to every peered
/// neighbour (spec §4.3 "roster update rules: local change").
pub async fn broadcast_client_update(fed: &Arc<FederationState>) {
    let update = InnerMessage::ClientUpdate {
        clients: fed.local_client_pems(),
    };
    let bytes = Bytes::from(update.to_unsigned_bytes());
    for (link_id, outbox) in fed.neighbour_outboxes() {
        if outbox.send(bytes.clone()).is_err() {
            warn!(%link_id, "neighbour outbox closed during client_update broadcast");
        }
    }
}

/// Build a `client_list` reply from the full roster snapshot (spec §4.3
/// "client roster fetch").
pub fn build_client_list(fed: &Arc<FederationState>) -> InnerMessage {
    let servers = fed
        .roster_snapshot()
        .into_iter()
        .map(|(address, clients)| ServerClients { address, clients })
        .collect();
    InnerMessage::ClientList { servers }
}

/// Ingest a peer's `client_update` or `client_list` response into the
/// roster. Idempotent and authoritative-per-peer (spec §4.3, §9 Open
/// Question resolution).
pub fn ingest_client_update(fed: &Arc<FederationState>, peer_url: &str, clients: Vec<String>) {
    fed.ingest_roster(peer_url.to_string(), clients);
}

pub fn ingest_client_list(fed: &Arc<FederationState>, servers: Vec<ServerClients>) {
    for entry in servers {
        if entry.address == fed.self_url {
            continue;
        }
        fed.ingest_roster(entry.address, entry.clients);
    }
}

/// Relay a signed `public_chat` envelope: deliver to every local client,
/// and if it originated from a local client (not a neighbour re-delivery),
/// broadcast it onward to every peered neighbour exactly once (spec §4.3
/// "public-chat relay ... deliver-only and no re-broadcast from a peer").
pub async fn relay_public_chat(fed: &Arc<FederationState>, envelope: &SignedEnvelope, from_neighbour: bool) {
    let bytes = Bytes::from(envelope.to_wire_bytes());

    for outbox in fed.all_client_outboxes() {
        let _ = outbox.send(bytes.clone());
    }

    if !from_neighbour {
        for (link_id, outbox) in fed.neighbour_outboxes() {
            if outbox.send(bytes.clone()).is_err() {
                warn!(%link_id, "neighbour outbox closed during public_chat broadcast");
            }
        }
    }
}

/// Relay a signed `chat` (private/group) envelope to each server named in
/// `destination_servers`: deliver to all local clients if this server is
/// named, forward the opaque envelope to the matching neighbour otherwise
/// (spec §4.3 "private/group chat relay via destination_servers").
pub async fn relay_chat(fed: &Arc<FederationState>, envelope: &SignedEnvelope, destination_servers: &[String]) {
    let bytes = Bytes::from(envelope.to_wire_bytes());

    for server in destination_servers {
        if *server == fed.self_url {
            for outbox in fed.all_client_outboxes() {
                let _ = outbox.send(bytes.clone());
            }
        } else if let Some(outbox) = fed.neighbour_outbox_by_url(server) {
            if outbox.send(bytes.clone()).is_err() {
                warn!(%server, "neighbour outbox closed during chat relay");
            }
        } else {
            warn!(%server, "chat destination is not a known peered neighbour; dropping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::generate_keypair;
    use crate::envelope::InnerMessage;
    use crate::session::LinkId;

    fn dummy_public_chat(sender: &str) -> SignedEnvelope {
        let (sk, _pk) = generate_keypair().unwrap();
        SignedEnvelope::sign(
            InnerMessage::PublicChat {
                sender: sender.into(),
                message: "hi".into(),
            },
            1,
            &sk,
        )
    }

    #[tokio::test]
    async fn public_chat_from_client_rebroadcasts_to_neighbours() {
        let fed = FederationState::new("ws://me:9000".into());
        let neighbour_id = LinkId::next();
        let mut neighbour_rx = fed.insert_neighbour(neighbour_id, "ws://peer:9000".into());

        let envelope = dummy_public_chat("alice");
        relay_public_chat(&fed, &envelope, false).await;

        assert!(neighbour_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn public_chat_from_neighbour_does_not_rebroadcast() {
        let fed = FederationState::new("ws://me:9000".into());
        let neighbour_id = LinkId::next();
        let mut neighbour_rx = fed.insert_neighbour(neighbour_id, "ws://peer:9000".into());

        let envelope = dummy_public_chat("alice");
        relay_public_chat(&fed, &envelope, true).await;

        assert!(neighbour_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn chat_relay_routes_to_named_destinations_only() {
        let fed = FederationState::new("ws://me:9000".into());
        let known_id = LinkId::next();
        let mut known_rx = fed.insert_neighbour(known_id, "ws://known:9000".into());

        let envelope = dummy_public_chat("alice");
        relay_chat(&fed, &envelope, &["ws://known:9000".to_string()]).await;
        relay_chat(&fed, &envelope, &["ws://unknown:9000".to_string()]).await;

        assert!(known_rx.try_recv().is_ok());
    }

    #[test]
    fn ingest_client_list_skips_self_entry() {
        let fed = FederationState::new("ws://me:9000".into());
        ingest_client_list(
            &fed,
            vec![
                ServerClients {
                    address: "ws://me:9000".into(),
                    clients: vec!["should-not-overwrite".into()],
                },
                ServerClients {
                    address: "ws://peer:9000".into(),
                    clients: vec!["fp-remote".into()],
                },
            ],
        );
        let snapshot = fed.roster_snapshot();
        assert!(snapshot.get("ws://me:9000").unwrap().is_empty());
        assert_eq!(snapshot.get("ws://peer:9000").unwrap(), &vec!["fp-remote".to_string()]);
    }
}
