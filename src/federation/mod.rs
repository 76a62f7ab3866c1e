// src/federation/mod.rs
//! Federation membership state: connected local clients, connected
//! neighbour servers, and the cross-server client roster (spec §3 "Server
//! side state", §4.3).

pub mod roster;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rsa::RsaPublicKey;
use tokio::sync::mpsc;

use crate::session::LinkId;

/// A connected, registered client (spec §4.2 client session REGISTERED).
pub struct ClientEntry {
    pub public_key: RsaPublicKey,
    /// The client's own PEM SubjectPublicKeyInfo, as advertised in its
    /// `hello` — this, not a fingerprint, is what `roster`/`client_update`/
    /// `client_list` carry, so peers can learn the actual key material they
    /// need to RSA-OAEP-wrap an AES key for this client (spec §3).
    pub public_key_pem: String,
    pub outbox: mpsc::UnboundedSender<bytes::Bytes>,
}

/// A connected, peered neighbour server (spec §4.2 neighbour session PEERED).
pub struct NeighbourEntry {
    pub peer_url: String,
    pub outbox: mpsc::UnboundedSender<bytes::Bytes>,
}

/// Federation-wide shared state: the one place spec §9's "Mutable shared
/// state" design note asks to consolidate `local_clients`, `neighbour_links`,
/// and `roster` into. `local_clients` and `roster` are each paired with an
/// auxiliary reverse index kept in sync on insert/remove rather than a
/// second independent source of truth (spec §9 "Cyclic references").
pub struct FederationState {
    /// This server's own URL, as advertised to peers and used as this
    /// server's key in `roster`.
    pub self_url: String,

    local_clients: DashMap<LinkId, ClientEntry>,
    fingerprint_to_link: DashMap<String, LinkId>,

    neighbour_links: DashMap<LinkId, NeighbourEntry>,
    url_to_neighbour: DashMap<String, LinkId>,

    /// `peer_url -> PEM public keys of clients known to be on that server`,
    /// including `self_url`'s own entry (spec Invariant 1).
    roster: DashMap<String, Vec<String>>,

    /// Monotonic counter for this server's own signed frames (`server_hello`).
    self_counter: AtomicU64,
}

impl FederationState {
    pub fn next_counter(&self) -> u64 {
        self.self_counter.fetch_add(1, Ordering::Relaxed)
    }

    pub fn new(self_url: String) -> Arc<Self> {
        let state = FederationState {
            self_url: self_url.clone(),
            local_clients: DashMap::new(),
            fingerprint_to_link: DashMap::new(),
            neighbour_links: DashMap::new(),
            url_to_neighbour: DashMap::new(),
            roster: DashMap::new(),
            self_counter: AtomicU64::new(1),
        };
        state.roster.insert(self_url, Vec::new());
        Arc::new(state)
    }

    /// Register a newly-`hello`'d client, returning its outbox receiver.
    pub fn insert_client(
        &self,
        link_id: LinkId,
        fingerprint: String,
        public_key: RsaPublicKey,
        public_key_pem: String,
    ) -> mpsc::UnboundedReceiver<bytes::Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.local_clients.insert(
            link_id,
            ClientEntry {
                public_key,
                public_key_pem: public_key_pem.clone(),
                outbox: tx,
            },
        );
        self.fingerprint_to_link.insert(fingerprint, link_id);
        self.roster
            .entry(self.self_url.clone())
            .or_default()
            .push(public_key_pem);
        rx
    }

    pub fn remove_client(&self, link_id: LinkId, fingerprint: Option<&str>) {
        if let Some((_, entry)) = self.local_clients.remove(&link_id) {
            if let Some(mut roster_entry) = self.roster.get_mut(&self.self_url) {
                roster_entry.retain(|pem| pem != &entry.public_key_pem);
            }
        }
        if let Some(fp) = fingerprint {
            self.fingerprint_to_link.remove(fp);
        }
    }

    pub fn client_outbox(&self, fingerprint: &str) -> Option<mpsc::UnboundedSender<bytes::Bytes>> {
        let link_id = *self.fingerprint_to_link.get(fingerprint)?;
        self.local_clients.get(&link_id).map(|e| e.outbox.clone())
    }

    /// This server's own locally-connected clients' PEM public keys (spec
    /// §3 `client_update`/`client_list` payloads carry PEMs, not
    /// fingerprints, so peers can learn the key material they need).
    pub fn local_client_pems(&self) -> Vec<String> {
        self.roster
            .get(&self.self_url)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn insert_neighbour(&self, link_id: LinkId, peer_url: String) -> mpsc::UnboundedReceiver<bytes::Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.url_to_neighbour.insert(peer_url.clone(), link_id);
        self.neighbour_links.insert(
            link_id,
            NeighbourEntry {
                peer_url,
                outbox: tx,
            },
        );
        rx
    }

    pub fn remove_neighbour(&self, link_id: LinkId) {
        if let Some((_, entry)) = self.neighbour_links.remove(&link_id) {
            self.url_to_neighbour.remove(&entry.peer_url);
            self.roster.remove(&entry.peer_url);
        }
    }

    /// All currently-peered neighbour outboxes, for best-effort broadcast
    /// (spec §4.3 "Broadcast delivery").
    pub fn neighbour_outboxes(&self) -> Vec<(LinkId, mpsc::UnboundedSender<bytes::Bytes>)> {
        self.neighbour_links
            .iter()
            .map(|e| (*e.key(), e.value().outbox.clone()))
            .collect()
    }

    pub fn neighbour_outbox_by_url(&self, peer_url: &str) -> Option<mpsc::UnboundedSender<bytes::Bytes>> {
        let link_id = *self.url_to_neighbour.get(peer_url)?;
        self.neighbour_links.get(&link_id).map(|e| e.outbox.clone())
    }

    pub fn all_client_outboxes(&self) -> Vec<mpsc::UnboundedSender<bytes::Bytes>> {
        self.local_clients.iter().map(|e| e.outbox.clone()).collect()
    }

    /// Authoritative ingest of one peer's client list, replacing whatever
    /// this server previously believed that peer had (spec §4.3 "ingest is
    /// idempotent per peer and authoritative-per-peer").
    pub fn ingest_roster(&self, peer_url: String, client_pems: Vec<String>) {
        self.roster.insert(peer_url, client_pems);
    }

    /// Snapshot of the full roster as `peer_url -> client PEM public keys`,
    /// for building a `client_list` reply.
    pub fn roster_snapshot(&self) -> HashMap<String, Vec<String>> {
        self.roster
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}
