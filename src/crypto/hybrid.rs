// src/crypto/hybrid.rs
//! Hybrid RSA-OAEP + AES-256-GCM message encryption (spec §4.1).
//!
//! Every private/group `chat` payload wraps a fresh per-message AES-256 key
//! once per recipient with RSA-OAEP, then seals the plaintext once with
//! that key under AES-256-GCM. The IV is 16 bytes, matching the original
//! source's `os.urandom(16)` (spec §3's `chat.iv`), so the AES-GCM instance
//! here is parameterized over a 16-byte nonce rather than the RustCrypto
//! default of 12.

use aes_gcm::aead::generic_array::typenum::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{AesGcm, Key};
use anyhow::{anyhow, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::ProtocolError;

/// AES-256-GCM with a 16-byte nonce, matching the wire format's `iv` field.
type Aes256Gcm16 = AesGcm<aes_gcm::aes::Aes256, U16>;

pub const AES_KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;

/// Generate a fresh random 32-byte AES key.
pub fn generate_aes_key() -> [u8; AES_KEY_LEN] {
    let mut key = [0u8; AES_KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// Generate a fresh random 16-byte IV.
pub fn generate_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// RSA-OAEP/MGF1-SHA256, empty label, wrapping an AES key for one recipient.
pub fn wrap_key(aes_key: &[u8; AES_KEY_LEN], recipient_public_key: &RsaPublicKey) -> Result<String> {
    let padding = Oaep::new::<Sha256>();
    let wrapped = recipient_public_key
        .encrypt(&mut OsRng, padding, aes_key)
        .map_err(|e| anyhow!("RSA-OAEP wrap failed: {e}"))?;
    Ok(base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        wrapped,
    ))
}

/// Inverse of `wrap_key`. Returns `Err` if this key is not the intended
/// recipient (or the blob is malformed) — callers use this fallibility to
/// find which `symm_keys` slot, if any, belongs to them (spec §4.3).
pub fn unwrap_key(wrapped_b64: &str, private_key: &RsaPrivateKey) -> Result<[u8; AES_KEY_LEN]> {
    let wrapped = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, wrapped_b64)
        .map_err(|e| anyhow!("invalid base64 symm_key: {e}"))?;
    let padding = Oaep::new::<Sha256>();
    let raw = private_key
        .decrypt(padding, &wrapped)
        .map_err(|e| anyhow!("RSA-OAEP unwrap failed: {e}"))?;
    raw.try_into()
        .map_err(|_| anyhow!("unwrapped key has wrong length"))
}

/// AES-256-GCM seal. The authentication tag is appended to the ciphertext,
/// matching the `cryptography` library's combined-output convention used by
/// the original source.
pub fn seal(plaintext: &[u8], aes_key: &[u8; AES_KEY_LEN], iv: &[u8; IV_LEN]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm16::new(Key::<Aes256Gcm16>::from_slice(aes_key));
    cipher
        .encrypt(iv.into(), plaintext)
        .map_err(|e| anyhow!("AES-GCM seal failed: {e}"))
}

/// AES-256-GCM open. Fails with `AeadFailure` if the tag check fails — the
/// expected outcome for every `symm_keys` slot that isn't this recipient's.
pub fn open(
    ciphertext: &[u8],
    aes_key: &[u8; AES_KEY_LEN],
    iv: &[u8; IV_LEN],
) -> Result<Vec<u8>, ProtocolError> {
    let cipher = Aes256Gcm16::new(Key::<Aes256Gcm16>::from_slice(aes_key));
    cipher
        .decrypt(iv.into(), ciphertext)
        .map_err(|_| ProtocolError::AeadFailure)
}
