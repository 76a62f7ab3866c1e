pub mod hybrid;
pub mod keys;
pub mod signing;

use rsa::pkcs8::EncodePublicKey;
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};

/// A client or server identity fingerprint: lowercase hex SHA-256 of the
/// key's PEM SubjectPublicKeyInfo encoding (spec §3 Identity).
pub fn fingerprint(public_key: &RsaPublicKey) -> anyhow::Result<String> {
    let pem = public_key
        .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
        .map_err(|e| anyhow::anyhow!("encode public key: {e}"))?;
    Ok(fingerprint_of_pem(&pem))
}

/// Fingerprint computed directly from a PEM string, for callers that only
/// have the wire-format PEM (e.g. a `hello.public_key` they haven't parsed).
pub fn fingerprint_of_pem(pem: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pem.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{export_public_key_pem, generate_keypair, parse_public_key_pem};

    #[test]
    fn fingerprint_is_stable_across_pem_roundtrip() {
        let (_sk, pk) = generate_keypair().unwrap();
        let fp1 = fingerprint(&pk).unwrap();

        let pem = export_public_key_pem(&pk).unwrap();
        let reparsed = parse_public_key_pem(&pem).unwrap();
        let fp2 = fingerprint(&reparsed).unwrap();

        assert_eq!(fp1, fp2);
        assert_eq!(fp1.len(), 64);
        assert!(fp1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
