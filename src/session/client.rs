// src/session/client.rs
//! Client session state machine (spec §4.2):
//!
//! ```text
//!   NEW --(hello accepted)--> REGISTERED --(link close)--> CLOSED
//!    |
//!    +-(link close before hello)--> CLOSED
//! ```

use rsa::RsaPublicKey;

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    New,
    Registered,
    Closed,
}

/// Per-link client session state: the advertised public key and the
/// monotonic counter baseline (spec §3 "Server-side state").
pub struct ClientSession {
    pub state: ClientState,
    pub public_key: Option<RsaPublicKey>,
    pub public_key_pem: Option<String>,
    pub fingerprint: Option<String>,
    last_counter: Option<u64>,
}

impl Default for ClientSession {
    fn default() -> Self {
        ClientSession {
            state: ClientState::New,
            public_key: None,
            public_key_pem: None,
            fingerprint: None,
            last_counter: None,
        }
    }
}

impl ClientSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `inner_type` is accepted in the current state (spec §4.2).
    pub fn accepts(&self, inner_type: &str) -> bool {
        match self.state {
            ClientState::New => inner_type == "hello",
            ClientState::Registered => {
                matches!(inner_type, "chat" | "public_chat" | "client_list_request")
            }
            ClientState::Closed => false,
        }
    }

    /// Transition NEW -> REGISTERED on an accepted `hello`.
    pub fn register(&mut self, public_key: RsaPublicKey, public_key_pem: String, fingerprint: String) {
        self.public_key = Some(public_key);
        self.public_key_pem = Some(public_key_pem);
        self.fingerprint = Some(fingerprint);
        self.state = ClientState::Registered;
    }

    /// Enforce strictly-increasing counters per sender key (spec §3
    /// Invariant 2, §4.2 "Counter enforcement").
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

    pub fn close(&mut self) {
        self.state = ClientState::Closed;
    }
}
