//! SHA-256 digest helpers shared across the engine: input hashes,
//! cross-proof link hashes, and mock proof payloads all go through here
//! so every component produces byte-identical digests for the same input.

use sha2::{Digest, Sha256};

/// SHA-256 over the concatenation of `parts`, hex-encoded.
pub fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

/// Digest of an ordered list of hex input scalars, used as the
/// `input_hash` of a composition.
pub fn input_hash(inputs: &[String]) -> String {
    let parts: Vec<&[u8]> = inputs.iter().map(|i| i.as_bytes()).collect();
    sha256_hex(&parts)
}
