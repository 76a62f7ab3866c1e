// src/error.rs
use thiserror::Error;

/// Typed protocol error taxonomy (spec §7).
///
/// Every variant here is reachable from an untrusted peer; none of them
/// should ever propagate as a panic.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    ParseError(String),

    #[error("no public key resolvable for signed envelope")]
    Unidentified,

    #[error("signature verification failed")]
    BadSignature,

    #[error("counter {received} did not exceed last accepted counter {last_accepted}")]
    Replay { received: u64, last_accepted: u64 },

    #[error("AEAD tag check failed")]
    AeadFailure,

    #[error("link failure: {0}")]
    LinkFailure(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Per §7: all variants except `LinkFailure` are non-fatal to the link —
    /// the frame is dropped and logged but the session continues.
    pub fn closes_link(&self) -> bool {
        matches!(self, ProtocolError::LinkFailure(_))
    }
}
