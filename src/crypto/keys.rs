// src/crypto/keys.rs
//! RSA keypair generation, PEM (de)serialization, and load-or-create for the
//! server's own identity key. Client keys arrive over the wire as PEM and
//! never touch disk on the server.

use anyhow::{Context, Result};
use rand::rngs::OsRng;
use rsa::pkcs8::{
    DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding,
};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fs;
use std::path::Path;

/// 2048-bit RSA modulus, per spec §3 Identity.
const KEY_BITS: usize = 2048;

pub fn generate_keypair() -> Result<(RsaPrivateKey, RsaPublicKey)> {
    let mut rng = OsRng;
    let private_key =
        RsaPrivateKey::new(&mut rng, KEY_BITS).context("generate RSA private key")?;
    let public_key = RsaPublicKey::from(&private_key);
    Ok((private_key, public_key))
}

/// Load this server's identity keypair from `path`, generating and
/// persisting a fresh one if it doesn't exist yet.
///
/// Mirrors the teacher's `generate_and_write_signing_key` / `load_signing_key`
/// pair: private key material is written with owner-only permissions.
pub fn load_or_create(path: &Path) -> Result<(RsaPrivateKey, RsaPublicKey)> {
    if path.exists() {
        let pem = fs::read_to_string(path)
            .with_context(|| format!("read key file {}", path.display()))?;
        let private_key = RsaPrivateKey::from_pkcs8_pem(&pem)
            .with_context(|| format!("parse key file {}", path.display()))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok((private_key, public_key))
    } else {
        let (private_key, public_key) = generate_keypair()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .context("encode private key to PKCS8 PEM")?;
        fs::write(path, pem.as_bytes())
            .with_context(|| format!("write key file {}", path.display()))?;
        set_restrictive_permissions(path);
        Ok((private_key, public_key))
    }
}

/// Set file permissions to owner-only (0600) on Unix systems.
pub fn set_restrictive_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
            tracing::warn!("failed to set permissions on {}: {}", path.display(), e);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

/// Export a public key as PEM SubjectPublicKeyInfo, the exact wire format
/// used for `hello.public_key` and fingerprinting (spec §3).
pub fn export_public_key_pem(public_key: &RsaPublicKey) -> Result<String> {
    public_key
        .to_public_key_pem(LineEnding::LF)
        .context("encode public key to PEM")
}

/// Parse a PEM SubjectPublicKeyInfo string into an `RsaPublicKey`.
pub fn parse_public_key_pem(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem.trim()).context("parse PEM public key")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_roundtrips_through_pem() {
        let (_sk, pk) = generate_keypair().unwrap();
        let pem = export_public_key_pem(&pk).unwrap();
        let parsed = parse_public_key_pem(&pem).unwrap();
        assert_eq!(pk, parsed);
    }

    #[test]
    fn load_or_create_persists_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.pem");

        let (sk1, _pk1) = load_or_create(&path).unwrap();
        let (sk2, _pk2) = load_or_create(&path).unwrap();

        assert_eq!(
            sk1.to_pkcs8_pem(LineEnding::LF).unwrap().as_str(),
            sk2.to_pkcs8_pem(LineEnding::LF).unwrap().as_str()
        );
    }
}
