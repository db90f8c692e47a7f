//! Room passphrase hashing.
//!
//! Stored format: `sha256$<salt>$<hex digest of salt + passphrase>`.

use std::fmt::Write;

use sha2::{Digest, Sha256};
use uuid::Uuid;

const SCHEME: &str = "sha256";

/// Hash a passphrase with a fresh random salt.
pub fn hash_secret(passphrase: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("{}${}${}", SCHEME, salt, digest_hex(&salt, passphrase))
}

/// Check a passphrase against a stored hash. Unknown formats never verify.
pub fn verify_secret(stored: &str, passphrase: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(SCHEME), Some(salt), Some(expected)) => {
            constant_time_eq(digest_hex(salt, passphrase).as_bytes(), expected.as_bytes())
        }
        _ => false,
    }
}

fn digest_hex(salt: &str, passphrase: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(passphrase.as_bytes());
    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{:02x}", byte);
            out
        })
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
