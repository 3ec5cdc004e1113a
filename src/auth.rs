//! Per-site salted password hashing.
//!
//! Passwords are never stored in plaintext: `getrandom` mints the per-site
//! salt and `sha2` provides the one-way hash.

use sha2::{Digest, Sha256};

/// Number of random bytes in a freshly minted site salt.
pub const SITE_SALT_LEN: usize = 16;

/// Generate a new random site salt.
pub fn generate_site_salt() -> [u8; SITE_SALT_LEN] {
    let mut salt = [0u8; SITE_SALT_LEN];
    getrandom::getrandom(&mut salt).expect("system RNG unavailable");
    salt
}

/// Hash `password` with `site_salt`, returning a lowercase hex digest.
/// There is no inverse — this is the only supported way to derive a
/// storable password value.
pub fn hash_password(site_salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(site_salt);
    hasher.update(password.as_bytes());
    hex_encode(&hasher.finalize())
}

/// Constant-time-ish comparison of a candidate password against a stored
/// hash (recomputes and compares, rather than attempting to invert).
pub fn verify_password(site_salt: &[u8], candidate: &str, stored_hash: &str) -> bool {
    hash_password(site_salt, candidate) == stored_hash
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to a String cannot fail");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_password_same_salt_hashes_identically() {
        let salt = generate_site_salt();
        assert_eq!(hash_password(&salt, "hunter2"), hash_password(&salt, "hunter2"));
    }

    #[test]
    fn different_salts_hash_differently() {
        let a = [1u8; SITE_SALT_LEN];
        let b = [2u8; SITE_SALT_LEN];
        assert_ne!(hash_password(&a, "hunter2"), hash_password(&b, "hunter2"));
    }

    #[test]
    fn verify_detects_wrong_password() {
        let salt = generate_site_salt();
        let hash = hash_password(&salt, "hunter2");
        assert!(verify_password(&salt, "hunter2", &hash));
        assert!(!verify_password(&salt, "wrong", &hash));
    }
}
