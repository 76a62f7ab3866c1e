// src/crypto/signing.rs
//! RSA-PSS signing over `data_bytes || decimal(counter)` (spec §4.1).
//!
//! This is the contract spec §9 Open Question 2 resolves: the source signs
//! `json(data)` on the way out but verifies `content+counter` on the (unused)
//! way in. We sign and verify the same bytes: the serialized `data` value
//! concatenated with the decimal counter, nothing else.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rsa::pss::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::ProtocolError;

/// Build the exact byte sequence that gets signed: `utf8(data_bytes) ||
/// utf8(decimal(counter))`. `data_bytes` must be the already-serialized
/// bytes of the inner `data` value, captured once and reused verbatim by
/// both signer and verifier (spec §4.1 canonical JSON note).
fn signing_input(data_bytes: &[u8], counter: u64) -> Vec<u8> {
    let mut input = Vec::with_capacity(data_bytes.len() + 20);
    input.extend_from_slice(data_bytes);
    input.extend_from_slice(counter.to_string().as_bytes());
    input
}

/// Sign `data_bytes || decimal(counter)` with RSA-PSS/MGF1-SHA256.
pub fn sign(data_bytes: &[u8], counter: u64, private_key: &RsaPrivateKey) -> String {
    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let input = signing_input(data_bytes, counter);
    let signature = signing_key.sign_with_rng(&mut OsRng, &input);
    BASE64.encode(signature.to_bytes())
}

/// Verify a base64 RSA-PSS signature over `data_bytes || decimal(counter)`.
pub fn verify(
    data_bytes: &[u8],
    counter: u64,
    signature_b64: &str,
    public_key: &RsaPublicKey,
) -> Result<(), ProtocolError> {
    let raw = BASE64
        .decode(signature_b64)
        .map_err(|_| ProtocolError::BadSignature)?;
    let signature =
        Signature::try_from(raw.as_slice()).map_err(|_| ProtocolError::BadSignature)?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key.clone());
    let input = signing_input(data_bytes, counter);
    verifying_key
        .verify(&input, &signature)
        .map_err(|_| ProtocolError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::generate_keypair;

    #[test]
    fn sign_verify_roundtrip() {
        let (sk, pk) = generate_keypair().unwrap();
        let data = br#"{"type":"hello"}"#;

        let sig = sign(data, 1, &sk);
        assert!(verify(data, 1, &sig, &pk).is_ok());
    }

    #[test]
    fn verify_rejects_mutated_data() {
        let (sk, pk) = generate_keypair().unwrap();
        let data = br#"{"type":"hello"}"#;
        let sig = sign(data, 1, &sk);

        assert!(verify(br#"{"type":"hellx"}"#, 1, &sig, &pk).is_err());
    }

    #[test]
    fn verify_rejects_mutated_counter() {
        let (sk, pk) = generate_keypair().unwrap();
        let data = br#"{"type":"hello"}"#;
        let sig = sign(data, 1, &sk);

        assert!(verify(data, 2, &sig, &pk).is_err());
    }

    #[test]
    fn verify_rejects_mutated_signature() {
        let (sk, pk) = generate_keypair().unwrap();
        let (_other_sk, other_pk) = generate_keypair().unwrap();
        let data = br#"{"type":"hello"}"#;
        let sig = sign(data, 1, &sk);

        assert!(verify(data, 1, &sig, &other_pk).is_err());
    }
}
