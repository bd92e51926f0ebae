//! `enc:` envelopes for sensitive config values.
//!
//! Values are XOR-sealed against a keystream derived from a machine
//! identifier, so a copied config file does not leak credentials in plain
//! text on another host. This is obfuscation keyed to the machine, not a
//! substitute for OS-level secret storage.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

const PREFIX: &str = "enc:";

/// Derive a per-machine key: SHA-256 over `/etc/machine-id` contents when
/// readable, otherwise the hostname.
fn machine_key() -> [u8; 32] {
    let seed = std::fs::read_to_string("/etc/machine-id")
        .ok()
        .map(|s| s.trim().to_string())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "vigil-local".to_string());
    let mut hasher = Sha256::new();
    hasher.update(b"vigil-seal-v1:");
    hasher.update(seed.as_bytes());
    hasher.finalize().into()
}

fn keystream(len: usize) -> Vec<u8> {
    let key = machine_key();
    let mut out = Vec::with_capacity(len);
    let mut counter: u64 = 0;
    while out.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(key);
        hasher.update(counter.to_le_bytes());
        out.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    out.truncate(len);
    out
}

/// Seal a plaintext value into an `enc:<base64>` envelope.
pub fn seal(plain: &str) -> String {
    let stream = keystream(plain.len());
    let sealed: Vec<u8> = plain
        .bytes()
        .zip(stream)
        .map(|(b, k)| b ^ k)
        .collect();
    format!("{PREFIX}{}", STANDARD.encode(sealed))
}

/// Unseal an `enc:` envelope. Returns `None` for plaintext values (no
/// prefix) or undecodable envelopes, leaving the caller's value untouched.
pub fn unseal(value: &str) -> Option<String> {
    let body = value.strip_prefix(PREFIX)?;
    let sealed = STANDARD.decode(body).ok()?;
    let stream = keystream(sealed.len());
    let plain: Vec<u8> = sealed.iter().zip(stream).map(|(b, k)| b ^ k).collect();
    String::from_utf8(plain).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_unseal_round_trip() {
        let sealed = seal("hunter2");
        assert!(sealed.starts_with("enc:"));
        assert_eq!(unseal(&sealed).as_deref(), Some("hunter2"));
    }

    #[test]
    fn plaintext_passes_through_as_none() {
        assert!(unseal("just-a-token").is_none());
    }

    #[test]
    fn bad_base64_is_none() {
        assert!(unseal("enc:!!!not-base64!!!").is_none());
    }

    #[test]
    fn long_values_round_trip() {
        let long = "x".repeat(500);
        assert_eq!(unseal(&seal(&long)).as_deref(), Some(long.as_str()));
    }
}
