// src/envelope.rs
//! Wire types for the envelope layer (spec §3, §4.1).
//!
//! The `type` discriminant at both levels is a closed tagged sum (spec §9
//! "Polymorphism") — modeled here as `#[serde(tag = "type")]` enums, not a
//! class hierarchy.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::crypto::signing;
use crate::error::ProtocolError;
use rsa::{RsaPrivateKey, RsaPublicKey};

/// One server's entry in a `client_list` reply (spec §3 `client_list`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerClients {
    pub address: String,
    pub clients: Vec<String>,
}

/// The inner message carried by a `signed_data` envelope, or sent bare as
/// an unsigned control request. A closed tagged sum (spec §3 table, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InnerMessage {
    #[serde(rename = "hello")]
    Hello { public_key: String },

    #[serde(rename = "server_hello")]
    ServerHello { sender: String },

    #[serde(rename = "chat")]
    Chat {
        destination_servers: Vec<String>,
        iv: String,
        symm_keys: Vec<String>,
        chat: String,
    },

    #[serde(rename = "public_chat")]
    PublicChat { sender: String, message: String },

    #[serde(rename = "client_update")]
    ClientUpdate { clients: Vec<String> },

    #[serde(rename = "client_list")]
    ClientList { servers: Vec<ServerClients> },

    #[serde(rename = "client_list_request")]
    ClientListRequest,

    #[serde(rename = "client_update_request")]
    ClientUpdateRequest,
}

impl InnerMessage {
    /// Serialize as a bare, unsigned control frame: `{"type": ..., ...}`
    /// with no enclosing `signed_data` envelope (spec §3 "Unsigned control
    /// messages").
    pub fn to_unsigned_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("InnerMessage always serializes")
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            InnerMessage::Hello { .. } => "hello",
            InnerMessage::ServerHello { .. } => "server_hello",
            InnerMessage::Chat { .. } => "chat",
            InnerMessage::PublicChat { .. } => "public_chat",
            InnerMessage::ClientUpdate { .. } => "client_update",
            InnerMessage::ClientList { .. } => "client_list",
            InnerMessage::ClientListRequest => "client_list_request",
            InnerMessage::ClientUpdateRequest => "client_update_request",
        }
    }
}

/// The AEAD plaintext carried inside `chat.chat` (spec §3 `chat`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPlaintext {
    #[serde(default)]
    pub participants: Vec<String>,
    pub message: String,
}

/// A `signed_data` envelope: `{ type, data, counter, signature }`.
///
/// `data_bytes` is the serialized form of `data` captured once at
/// construction/parse time and carried verbatim — this is what both signer
/// and verifier hash, resolving spec §4.1's canonical-JSON note and §9 Open
/// Question 2.
#[derive(Debug, Clone)]
pub struct SignedEnvelope {
    pub data: InnerMessage,
    pub data_bytes: Vec<u8>,
    pub counter: u64,
    pub signature: String,
}

/// The wire shape actually (de)serialized for a signed envelope.
///
/// `data` is carried as a `RawValue` rather than a `serde_json::Value`:
/// `Value::Object` is a `BTreeMap` (this crate builds without the
/// `preserve_order` feature), so round-tripping `data` through it would
/// re-sort its keys alphabetically and no longer match the bytes that
/// `sign()` actually hashed. `RawValue` preserves `data_bytes` verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SignedEnvelopeWire {
    #[serde(rename = "type")]
    kind: WireTag,
    data: Box<RawValue>,
    counter: u64,
    signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum WireTag {
    #[serde(rename = "signed_data")]
    SignedData,
}

impl SignedEnvelope {
    /// Build and sign a new envelope for `data` at `counter`.
    pub fn sign(data: InnerMessage, counter: u64, private_key: &RsaPrivateKey) -> Self {
        let data_bytes = serde_json::to_vec(&data).expect("InnerMessage always serializes");
        let signature = signing::sign(&data_bytes, counter, private_key);
        SignedEnvelope {
            data,
            data_bytes,
            counter,
            signature,
        }
    }

    /// Verify this envelope's signature against `public_key`.
    pub fn verify(&self, public_key: &RsaPublicKey) -> Result<(), ProtocolError> {
        signing::verify(&self.data_bytes, self.counter, &self.signature, public_key)
    }

    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let raw = std::str::from_utf8(&self.data_bytes).expect("data_bytes is valid utf8 json");
        let data = RawValue::from_string(raw.to_string()).expect("data_bytes is valid JSON");
        let wire = SignedEnvelopeWire {
            kind: WireTag::SignedData,
            data,
            counter: self.counter,
            signature: self.signature.clone(),
        };
        serde_json::to_vec(&wire).expect("SignedEnvelopeWire always serializes")
    }

    pub fn from_wire_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let wire: SignedEnvelopeWire = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::ParseError(format!("signed_data: {e}")))?;
        let data_bytes = wire.data.get().as_bytes().to_vec();
        let data: InnerMessage = serde_json::from_str(wire.data.get())
            .map_err(|e| ProtocolError::ParseError(format!("inner message: {e}")))?;
        Ok(SignedEnvelope {
            data,
            data_bytes,
            counter: wire.counter,
            signature: wire.signature,
        })
    }
}

/// Top-level frame shape: either a `signed_data` envelope or a bare,
/// unsigned control request.
#[derive(Clone)]
pub enum Frame {
    Signed(SignedEnvelope),
    Unsigned(InnerMessage),
}

impl Frame {
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let probe: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::ParseError(format!("not JSON: {e}")))?;
        let kind = probe
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProtocolError::ParseError("missing `type`".into()))?;

        if kind == "signed_data" {
            Ok(Frame::Signed(SignedEnvelope::from_wire_bytes(bytes)?))
        } else {
            let inner: InnerMessage = serde_json::from_slice(bytes)
                .map_err(|e| ProtocolError::ParseError(format!("unsigned request: {e}")))?;
            Ok(Frame::Unsigned(inner))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::generate_keypair;

    #[test]
    fn signed_envelope_wire_roundtrip() {
        let (sk, pk) = generate_keypair().unwrap();
        let env = SignedEnvelope::sign(
            InnerMessage::Hello {
                public_key: "pem".into(),
            },
            1,
            &sk,
        );
        let bytes = env.to_wire_bytes();

        let frame = Frame::parse(&bytes).unwrap();
        match frame {
            Frame::Signed(parsed) => {
                assert!(parsed.verify(&pk).is_ok());
                assert_eq!(parsed.counter, 1);
                assert_eq!(parsed.data.type_name(), "hello");
            }
            Frame::Unsigned(_) => panic!("expected signed envelope"),
        }
    }

    #[test]
    fn wire_roundtrip_preserves_signature_over_multi_field_variant() {
        // A regression check for the tag-first vs. alphabetical key-order
        // mismatch: `Chat` has enough fields that a key-sorting round trip
        // (e.g. through `serde_json::Value`) would reorder them and break
        // `verify()`. `to_wire_bytes`/`from_wire_bytes` must carry
        // `data_bytes` through untouched instead.
        let (sk, pk) = generate_keypair().unwrap();
        let env = SignedEnvelope::sign(
            InnerMessage::Chat {
                destination_servers: vec!["ws://a:9000".into()],
                iv: "iv".into(),
                symm_keys: vec!["wrapped".into()],
                chat: "ciphertext".into(),
            },
            1,
            &sk,
        );
        let bytes = env.to_wire_bytes();

        match Frame::parse(&bytes).unwrap() {
            Frame::Signed(parsed) => assert!(parsed.verify(&pk).is_ok()),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unsigned_request_roundtrip() {
        let bytes = br#"{"type":"client_list_request"}"#;
        match Frame::parse(bytes).unwrap() {
            Frame::Unsigned(InnerMessage::ClientListRequest) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frame::Signed(e) => write!(f, "Frame::Signed({:?})", e.data.type_name()),
            Frame::Unsigned(m) => write!(f, "Frame::Unsigned({:?})", m.type_name()),
        }
    }
}
