// src/session/mod.rs
//! Link abstraction and per-link dispatch loops (spec §4.2). Session logic
//! is generic over `Link` so it never touches a socket directly; the
//! `transport` module supplies the concrete adapters.

pub mod client;
pub mod neighbour;

pub use client::{ClientSession, ClientState};
pub use neighbour::{NeighbourSession, NeighbourState};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use rsa::RsaPublicKey;
use tracing::{info, warn};

use crate::crypto;
use crate::crypto::keys::parse_public_key_pem;
use crate::envelope::{Frame, InnerMessage, SignedEnvelope};
use crate::error::ProtocolError;
use crate::federation::{roster, FederationState};
use crate::ServerIdentity;

/// Identifies one link (client or neighbour) for the lifetime of its
/// connection. Not reused after the link closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(u64);

impl LinkId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        LinkId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// A bidirectional stream of whole JSON text frames (spec §4.2 "Link
/// abstraction"). Framing and backpressure are the adapter's concern;
/// session logic only ever sees complete frames.
#[async_trait]
pub trait Link: Send {
    async fn send(&mut self, bytes: Bytes) -> Result<(), ProtocolError>;
    async fn recv(&mut self) -> Option<Result<Bytes, ProtocolError>>;
}

/// A known set of peer server identity keys, advertised out-of-band (spec
/// §4.1, §6 `--peer-keys`).
pub type PeerKeys = HashMap<String, RsaPublicKey>;

async fn send_server_hello<L: Link>(
    identity: &ServerIdentity,
    fed: &Arc<FederationState>,
    link: &mut L,
) -> Result<(), ProtocolError> {
    let envelope = SignedEnvelope::sign(
        InnerMessage::ServerHello {
            sender: fed.self_url.clone(),
        },
        fed.next_counter(),
        &identity.private_key,
    );
    link.send(Bytes::from(envelope.to_wire_bytes())).await
}

/// Drive an inbound, not-yet-identified link: the first signed frame
/// determines whether this is a client (`hello`) or a neighbour
/// (`server_hello`) (spec §4.2 dispatch-by-type).
pub async fn run_inbound<L: Link>(
    fed: Arc<FederationState>,
    identity: Arc<ServerIdentity>,
    peer_keys: Arc<PeerKeys>,
    link_id: LinkId,
    mut link: L,
) {
    loop {
        let bytes = match link.recv().await {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                warn!(%link_id, error = %e, "inbound link failed before identification");
                return;
            }
            None => return,
        };

        let frame = match Frame::parse(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%link_id, error = %e, "dropping malformed frame before identification");
                continue;
            }
        };

        let Frame::Signed(envelope) = frame else {
            warn!(%link_id, "dropping unsigned frame before identification");
            continue;
        };

        match &envelope.data {
            InnerMessage::Hello { .. } => {
                let mut session = ClientSession::new();
                if let Some(fingerprint) = try_hello(&mut session, &envelope) {
                    return run_client_registered(fed, link_id, link, session, fingerprint).await;
                }
                warn!(%link_id, "rejected hello");
            }
            InnerMessage::ServerHello { .. } => {
                let mut session = NeighbourSession::new();
                if let Some(peer_url) = try_server_hello(&mut session, &envelope, &peer_keys) {
                    if send_server_hello(&identity, &fed, &mut link).await.is_err() {
                        return;
                    }
                    return run_neighbour_peered(fed, link_id, link, session, peer_url).await;
                }
                warn!(%link_id, "rejected server_hello");
            }
            other => {
                warn!(%link_id, kind = other.type_name(), "dropping out-of-order frame before identification");
            }
        }
    }
}

/// Drive an outbound link this server dialed: send our `server_hello`
/// first, then wait for the peer's reply (spec §4.3 bootstrap sweep).
pub async fn dial_neighbour<L: Link>(
    fed: Arc<FederationState>,
    identity: Arc<ServerIdentity>,
    peer_keys: Arc<PeerKeys>,
    link_id: LinkId,
    mut link: L,
    neighbour_url: String,
) {
    if send_server_hello(&identity, &fed, &mut link).await.is_err() {
        warn!(%link_id, %neighbour_url, "failed to send initial server_hello");
        return;
    }

    let mut session = NeighbourSession::dialed(neighbour_url.clone());

    loop {
        let bytes = match link.recv().await {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                warn!(%link_id, error = %e, "dialed link failed before server_hello reply");
                return;
            }
            None => return,
        };

        let frame = match Frame::parse(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%link_id, error = %e, "dropping malformed frame awaiting server_hello reply");
                continue;
            }
        };

        let Frame::Signed(envelope) = frame else {
            continue;
        };

        if let InnerMessage::ServerHello { .. } = &envelope.data {
            if let Some(peer_url) = try_server_hello(&mut session, &envelope, &peer_keys) {
                return run_neighbour_peered(fed, link_id, link, session, peer_url).await;
            }
            warn!(%link_id, %neighbour_url, "rejected server_hello reply");
        }
    }
}

/// Pure: verify and accept a `hello`, returning the client's fingerprint.
fn try_hello(session: &mut ClientSession, envelope: &SignedEnvelope) -> Option<String> {
    if !session.accepts(envelope.data.type_name()) {
        return None;
    }
    let InnerMessage::Hello { public_key } = &envelope.data else {
        return None;
    };
    let parsed_key = parse_public_key_pem(public_key).ok()?;
    envelope.verify(&parsed_key).ok()?;
    session.check_counter(envelope.counter).ok()?;

    let fingerprint = crypto::fingerprint_of_pem(public_key);
    session.register(parsed_key, public_key.clone(), fingerprint.clone());
    Some(fingerprint)
}

/// Pure: verify and accept a `server_hello` against the configured peer
/// key (trust-on-first-use if none is configured; spec §1 Non-goals).
fn try_server_hello(
    session: &mut NeighbourSession,
    envelope: &SignedEnvelope,
    peer_keys: &PeerKeys,
) -> Option<String> {
    if !session.accepts(envelope.data.type_name()) {
        return None;
    }
    let InnerMessage::ServerHello { sender } = &envelope.data else {
        return None;
    };

    let expect_url = session.peer_url.clone().unwrap_or_else(|| sender.clone());
    if let Some(known_key) = peer_keys.get(&expect_url) {
        envelope.verify(known_key).ok()?;
    } else {
        warn!(%expect_url, "no configured public key for neighbour; accepting on trust");
    }
    session.check_counter(envelope.counter).ok()?;

    session.peer(sender.clone());
    session.peer_url.clone()
}

async fn run_client_registered<L: Link>(
    fed: Arc<FederationState>,
    link_id: LinkId,
    mut link: L,
    mut session: ClientSession,
    fingerprint: String,
) {
    let public_key = session.public_key.clone().expect("register sets public_key");
    let public_key_pem = session
        .public_key_pem
        .clone()
        .expect("register sets public_key_pem");
    let mut outbox_rx = fed.insert_client(link_id, fingerprint.clone(), public_key, public_key_pem);
    info!(%link_id, %fingerprint, "client registered");
    roster::broadcast_client_update(&fed).await;

    loop {
        tokio::select! {
            outgoing = outbox_rx.recv() => {
                match outgoing {
                    Some(bytes) => {
                        if link.send(bytes).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = link.recv() => {
                match incoming {
                    None => break,
                    Some(Err(e)) => {
                        warn!(%link_id, error = %e, "client link failed");
                        break;
                    }
                    Some(Ok(bytes)) => {
                        if !handle_client_frame(&fed, &mut session, &mut link, &fingerprint, &bytes).await {
                            break;
                        }
                    }
                }
            }
        }
    }

    session.close();
    fed.remove_client(link_id, Some(&fingerprint));
    roster::broadcast_client_update(&fed).await;
    info!(%link_id, %fingerprint, "client disconnected");
}

/// Returns `false` when the link should close.
async fn handle_client_frame<L: Link>(
    fed: &Arc<FederationState>,
    session: &mut ClientSession,
    link: &mut L,
    fingerprint: &str,
    bytes: &Bytes,
) -> bool {
    let frame = match Frame::parse(bytes) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "dropping malformed frame");
            return true;
        }
    };

    match frame {
        Frame::Unsigned(InnerMessage::ClientListRequest) => {
            if !session.accepts("client_list_request") {
                return true;
            }
            let reply = roster::build_client_list(fed);
            let _ = link.send(Bytes::from(reply.to_unsigned_bytes())).await;
            true
        }
        Frame::Unsigned(other) => {
            warn!(kind = other.type_name(), "dropping unsigned frame from client");
            true
        }
        Frame::Signed(envelope) => {
            let public_key = match &session.public_key {
                Some(key) => key.clone(),
                None => {
                    let err = ProtocolError::Unidentified;
                    warn!(%fingerprint, error = %err, "no public key resolvable for registered client");
                    return true;
                }
            };
            if envelope.verify(&public_key).is_err() {
                warn!(%fingerprint, "signature verification failed");
                return true;
            }
            if !session.accepts(envelope.data.type_name()) {
                warn!(%fingerprint, kind = envelope.data.type_name(), "frame not valid in current state");
                return true;
            }
            if let Err(e) = session.check_counter(envelope.counter) {
                warn!(%fingerprint, error = %e, "replayed or out-of-order counter");
                return true;
            }

            match &envelope.data {
                InnerMessage::PublicChat { .. } => {
                    roster::relay_public_chat(fed, &envelope, false).await;
                }
                InnerMessage::Chat { destination_servers, .. } => {
                    roster::relay_chat(fed, &envelope, destination_servers).await;
                }
                other => {
                    warn!(kind = other.type_name(), "unexpected signed frame from registered client");
                }
            }
            true
        }
    }
}

async fn run_neighbour_peered<L: Link>(
    fed: Arc<FederationState>,
    link_id: LinkId,
    mut link: L,
    mut session: NeighbourSession,
    peer_url: String,
) {
    let mut outbox_rx = fed.insert_neighbour(link_id, peer_url.clone());
    info!(%link_id, %peer_url, "neighbour peered");

    // After peering, request the peer's current client roster (spec §4.3
    // "After the initial dial sweep, ... client_update_request").
    let request = InnerMessage::ClientUpdateRequest.to_unsigned_bytes();
    let _ = link.send(Bytes::from(request)).await;

    loop {
        tokio::select! {
            outgoing = outbox_rx.recv() => {
                match outgoing {
                    Some(bytes) => {
                        if link.send(bytes).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = link.recv() => {
                match incoming {
                    None => break,
                    Some(Err(e)) => {
                        warn!(%link_id, error = %e, "neighbour link failed");
                        break;
                    }
                    Some(Ok(bytes)) => {
                        if !handle_neighbour_frame(&fed, &mut session, &mut link, &peer_url, &bytes).await {
                            break;
                        }
                    }
                }
            }
        }
    }

    session.part();
    fed.remove_neighbour(link_id);
    info!(%link_id, %peer_url, "neighbour parted");
}

/// Returns `false` when the link should close.
async fn handle_neighbour_frame<L: Link>(
    fed: &Arc<FederationState>,
    session: &mut NeighbourSession,
    link: &mut L,
    peer_url: &str,
    bytes: &Bytes,
) -> bool {
    let frame = match Frame::parse(bytes) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "dropping malformed frame from neighbour");
            return true;
        }
    };

    match frame {
        Frame::Unsigned(InnerMessage::ClientUpdateRequest) => {
            let update = InnerMessage::ClientUpdate {
                clients: fed.local_client_pems(),
            };
            let _ = link.send(Bytes::from(update.to_unsigned_bytes())).await;
            true
        }
        Frame::Unsigned(InnerMessage::ClientUpdate { clients }) => {
            roster::ingest_client_update(fed, peer_url, clients);
            true
        }
        Frame::Unsigned(InnerMessage::ClientList { servers }) => {
            roster::ingest_client_list(fed, servers);
            true
        }
        Frame::Unsigned(other) => {
            warn!(kind = other.type_name(), "dropping unsigned frame from neighbour");
            true
        }
        Frame::Signed(envelope) => {
            if !session.accepts(envelope.data.type_name()) {
                warn!(%peer_url, kind = envelope.data.type_name(), "frame not valid from neighbour");
                return true;
            }
            if let Err(e) = session.check_counter(envelope.counter) {
                warn!(%peer_url, error = %e, "replayed or out-of-order neighbour counter");
                return true;
            }

            match &envelope.data {
                InnerMessage::PublicChat { .. } => {
                    roster::relay_public_chat(fed, &envelope, true).await;
                }
                InnerMessage::Chat { destination_servers, .. } => {
                    roster::relay_chat(fed, &envelope, destination_servers).await;
                }
                InnerMessage::ServerHello { .. } => {
                    // Idempotent refresh: already PEERED, nothing to do.
                }
                other => {
                    warn!(kind = other.type_name(), "unexpected signed frame from neighbour");
                }
            }
            true
        }
    }
}
