//! Content-addressed cache keys.

use sha2::{Digest, Sha256};

/// Fingerprint of an (instruction, input) pair.
///
/// The hash is SHA-256, stored hex encoded (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Computes the cache key for a rendered instruction and input.
///
/// The instruction is prefixed with its byte length (u64, little endian) so
/// that moving text across the boundary always changes the key.
pub fn fingerprint(instruction: &str, input: &str) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update((instruction.len() as u64).to_le_bytes());
    hasher.update(instruction.as_bytes());
    hasher.update(input.as_bytes());
    CacheKey(hex::encode(hasher.finalize()))
}
