// src/session/neighbour.rs
//! Neighbour session state machine (spec §4.2):
//!
//! ```text
//!   DIALED --(server_hello exchanged)--> PEERED --(link close)--> PARTED
//! ```

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighbourState {
    Dialed,
    Peered,
    Parted,
}

/// Per-link neighbour session state. `peer_url` is known immediately for a
/// link we dialed, and only after `server_hello` for one that dialed us.
pub struct NeighbourSession {
    pub state: NeighbourState,
    pub peer_url: Option<String>,
    last_counter: Option<u64>,
}

impl Default for NeighbourSession {
    fn default() -> Self {
        NeighbourSession {
            state: NeighbourState::Dialed,
            peer_url: None,
            last_counter: None,
        }
    }
}

impl NeighbourSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dialed(peer_url: String) -> Self {
        NeighbourSession {
            state: NeighbourState::Dialed,
            peer_url: Some(peer_url),
            last_counter: None,
        }
    }

    pub fn accepts(&self, inner_type: &str) -> bool {
        match self.state {
            NeighbourState::Dialed => inner_type == "server_hello",
            NeighbourState::Peered => matches!(
                inner_type,
                "server_hello"
                    | "public_chat"
                    | "chat"
                    | "client_update"
                    | "client_update_request"
                    | "client_list"
            ),
            NeighbourState::Parted => false,
        }
    }

    /// Transition DIALED -> PEERED on an accepted `server_hello`.
    pub fn peer(&mut self, sender_url: String) {
        if self.peer_url.is_none() {
            self.peer_url = Some(sender_url);
        }
        self.state = NeighbourState::Peered;
    }

    pub fn check_counter(&mut self, counter: u64) -> Result<(), ProtocolError> {
        if let Some(last) = self.last_counter {
            if counter <= last {
                return Err(ProtocolError::Replay {
                    received: counter,
                    last_accepted: last,
                });
            }
        }
        self.last_counter = Some(counter);
        Ok(())
    }

    pub fn part(&mut self) {
        self.state = NeighbourState::Parted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialed_state_only_accepts_server_hello() {
        let session = NeighbourSession::new();
        assert!(session.accepts("server_hello"));
        assert!(!session.accepts("chat"));
    }

    #[test]
    fn peered_state_accepts_federation_traffic() {
        let mut session = NeighbourSession::new();
        session.peer("ws://peer:9000".into());
        assert!(session.accepts("public_chat"));
        assert!(session.accepts("chat"));
        assert!(session.accepts("client_update"));
        assert!(session.accepts("server_hello"));
    }

    #[test]
    fn dial_back_preserves_known_url() {
        let mut session = NeighbourSession::dialed("ws://peer:9000".into());
        session.peer("ws://someone-else:9000".into());
        assert_eq!(session.peer_url.as_deref(), Some("ws://peer:9000"));
    }

    #[test]
    fn inbound_link_learns_url_from_server_hello() {
        let mut session = NeighbourSession::new();
        assert!(session.peer_url.is_none());
        session.peer("ws://peer:9000".into());
        assert_eq!(session.peer_url.as_deref(), Some("ws://peer:9000"));
    }

    #[test]
    fn parted_state_accepts_nothing() {
        let mut session = NeighbourSession::new();
        session.part();
        assert!(!session.accepts("server_hello"));
        assert!(!session.accepts("chat"));
    }
}
